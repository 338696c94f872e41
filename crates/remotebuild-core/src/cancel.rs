//! Single-use cancellation signal.
//!
//! A signal carries at most one token through a channel of depth 1. Sending
//! never blocks, so any caller may cancel without waiting for a listener.
//! Observation is cooperative: builds and uploads check it at their own
//! suspension points.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};

#[derive(Debug, Clone)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    fired: AtomicBool,
    tx: mpsc::Sender<()>,
    rx: Mutex<mpsc::Receiver<()>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                fired: AtomicBool::new(false),
                tx,
                rx: Mutex::new(rx),
            }),
        }
    }

    /// Send the token. Returns `true` only for the call that actually sent it.
    pub fn cancel(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.tx.try_send(()).is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Resolves once the token has been sent.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut rx = self.inner.rx.lock().await;
        // Another listener may have consumed the token while we waited for the lock.
        if self.is_cancelled() {
            return;
        }
        let _ = rx.recv().await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
