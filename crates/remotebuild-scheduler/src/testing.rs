//! Test doubles shared by the scheduler tests.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use remotebuild_core::executor::{
    ContainerHandle, ContainerResult, ContainerSpec, ContainerStatus, Executor, LogLine, LogStream,
};
use remotebuild_core::spec::keys;
use remotebuild_core::{BuildArgs, BuildSpec, Error, Job, JobType, Result, UploadType};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

pub fn aur_spec(package: &str, upload_type: UploadType) -> BuildSpec {
    BuildSpec {
        job_type: JobType::Aur,
        upload_type,
        args: BuildArgs::new().with(keys::AUR_PACKAGE, package),
    }
}

pub fn aur_job(package: &str) -> Job {
    Job::new(aur_spec(package, UploadType::LocalStorage))
}

/// Executor that pretends to build: it writes a package and manifest into the
/// mounted output directory and "runs" for a configurable delay.
#[derive(Default)]
pub struct MockExecutor {
    delay: Duration,
    fail: bool,
    skip_manifest: bool,
    spawn_error: bool,
    follow_logs: bool,
    stopped: Arc<Notify>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    spawned: AtomicUsize,
    cancelled: AtomicUsize,
    cleaned_up: AtomicUsize,
    packages: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn without_manifest(mut self) -> Self {
        self.skip_manifest = true;
        self
    }

    pub fn refusing_spawn(mut self) -> Self {
        self.spawn_error = true;
        self
    }

    /// Log streams stay open until the container is cancelled, like a
    /// followed Docker log stream.
    pub fn following_logs(mut self) -> Self {
        self.follow_logs = true;
        self
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cleaned_up(&self) -> usize {
        self.cleaned_up.load(Ordering::SeqCst)
    }

    /// Packages in the order their containers were spawned.
    pub fn packages(&self) -> Vec<String> {
        self.packages.lock().unwrap().clone()
    }

    fn write_output(&self, spec: &ContainerSpec) {
        let out = PathBuf::from(&spec.volumes[0].source);
        let package = spec.env.get("AUR_PACKAGE").cloned().unwrap_or_default();
        let file = format!("{}-1.0-1-x86_64.pkg.tar.zst", package);
        std::fs::write(out.join(&file), b"package").unwrap();
        if !self.skip_manifest {
            let manifest = serde_json::json!({
                "name": package,
                "version": "1.0-1",
                "files": [file],
            });
            std::fs::write(out.join("result.json"), manifest.to_string()).unwrap();
        }
    }

    fn finish_one(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Executor for MockExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn spawn(&self, spec: ContainerSpec) -> Result<ContainerHandle> {
        if self.spawn_error {
            return Err(Error::Execution("docker daemon unavailable".to_string()));
        }
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.packages
            .lock()
            .unwrap()
            .push(spec.env.get("AUR_PACKAGE").cloned().unwrap_or_default());
        self.write_output(&spec);

        Ok(ContainerHandle {
            id: spec.id,
            executor_id: format!("mock-{}", spec.id),
            executor_name: "mock".to_string(),
        })
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<BoxStream<'static, LogLine>> {
        let line = LogLine {
            timestamp: Utc::now(),
            stream: LogStream::Stdout,
            content: format!("==> Building {}", handle.executor_id),
        };
        let head = futures::stream::iter(vec![line]);
        if !self.follow_logs {
            return Ok(head.boxed());
        }
        let stopped = self.stopped.clone();
        let tail = futures::stream::once(async move { stopped.notified().await })
            .filter_map(|()| async { None::<LogLine> });
        Ok(head.chain(tail).boxed())
    }

    async fn status(&self, _handle: &ContainerHandle) -> Result<ContainerStatus> {
        Ok(ContainerStatus::Running {
            started_at: Utc::now(),
        })
    }

    async fn wait(&self, _handle: &ContainerHandle) -> Result<ContainerResult> {
        tokio::time::sleep(self.delay).await;
        self.finish_one();
        let status = if self.fail {
            ContainerStatus::Failed {
                started_at: None,
                finished_at: Utc::now(),
                exit_code: Some(1),
                message: "makepkg exited with 1".to_string(),
            }
        } else {
            ContainerStatus::Succeeded {
                started_at: Utc::now(),
                finished_at: Utc::now(),
            }
        };
        Ok(ContainerResult {
            exit_code: Some(if self.fail { 1 } else { 0 }),
            status,
        })
    }

    async fn cancel(&self, _handle: &ContainerHandle) -> Result<()> {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        self.finish_one();
        self.stopped.notify_one();
        Ok(())
    }

    async fn cleanup(&self, _handle: &ContainerHandle) -> Result<()> {
        self.cleaned_up.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
