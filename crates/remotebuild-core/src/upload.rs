//! Upload backend abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{BuildResult, CancelSignal, RecordId, Result, UploadType};

/// Metadata attached to every transferred artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub job_id: RecordId,
    pub name: String,
    pub version: String,
    /// Remote namespace, when the client supplied one.
    pub namespace: Option<String>,
}

impl UploadMetadata {
    pub fn from_result(result: &BuildResult, namespace: Option<String>) -> Self {
        Self {
            job_id: result.job_id,
            name: result.name.clone(),
            version: result.version.clone(),
            namespace,
        }
    }
}

/// A destination for built artifacts.
///
/// Implementations transfer `files` in order and stop at the first failure.
/// Files already transferred stay where they are.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    fn kind(&self) -> UploadType;

    async fn upload(
        &self,
        files: &[PathBuf],
        metadata: &UploadMetadata,
        cancel: &CancelSignal,
    ) -> Result<()>;
}
