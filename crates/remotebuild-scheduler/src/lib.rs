//! Job scheduling for remotebuild.
//!
//! The [`JobQueue`] admits queued jobs in position order up to a concurrency
//! ceiling and drives each one through build then upload. [`JobService`] is
//! the operation surface used by the transport layer.

pub mod build;
pub mod queue;
pub mod service;
pub mod upload;

#[cfg(test)]
mod testing;

pub use build::{BuildOutcome, BuildRunner};
pub use queue::{JobQueue, QueueConfig};
pub use service::JobService;
pub use upload::UploadRunner;
