//! Container image resolution.

use crate::{JobType, Result};

/// Maps a job type to the container image that builds it.
///
/// Failure is fatal to the admission attempt that asked; callers do not retry.
pub trait ContainerResolver: Send + Sync {
    fn resolve(&self, job_type: JobType) -> Result<String>;
}
