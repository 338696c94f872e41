//! Core domain types and traits for remotebuild.
//!
//! This crate contains:
//! - Record identifiers and the error taxonomy
//! - The Job / BuildJob / UploadJob state machine
//! - The single-use cancellation signal
//! - Collaborator traits: executor, container resolver, upload backend
//! - Declarative validation of submitted build specs

pub mod cancel;
pub mod error;
pub mod executor;
pub mod id;
pub mod job;
pub mod resolver;
pub mod spec;
pub mod state;
pub mod upload;
pub mod validate;

pub use cancel::CancelSignal;
pub use error::{Error, Result};
pub use id::RecordId;
pub use job::{BuildJob, BuildResult, Job, QueueItem, UploadJob};
pub use spec::{BuildArgs, BuildSpec, DataManagerArgs, JobType, UploadType};
pub use state::JobState;
