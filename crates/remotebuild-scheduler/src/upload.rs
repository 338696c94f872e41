//! Upload stage: hands build artifacts to the selected backend.

use remotebuild_core::spec::keys;
use remotebuild_core::upload::UploadMetadata;
use remotebuild_core::{BuildArgs, BuildResult, CancelSignal, JobState, Result, UploadType};
use remotebuild_upload::backend_for;
use std::path::PathBuf;
use tracing::info;

/// Runs artifact transfers for finished builds.
pub struct UploadRunner {
    local_storage: PathBuf,
}

impl UploadRunner {
    pub fn new(local_storage: impl Into<PathBuf>) -> Self {
        Self {
            local_storage: local_storage.into(),
        }
    }

    /// Transfer the artifacts of `result`.
    ///
    /// Prerequisites are checked before any I/O: an unselected method yields
    /// `NoValidUploadMethod` and missing remote credentials a configuration error.
    pub async fn run(
        &self,
        upload_type: UploadType,
        result: &BuildResult,
        args: &BuildArgs,
        cancel: &CancelSignal,
    ) -> Result<()> {
        let backend = backend_for(upload_type, args, &self.local_storage)?;
        let namespace = args.get(keys::DM_NAMESPACE).map(str::to_string);
        let metadata = UploadMetadata::from_result(result, namespace);

        info!(
            job_id = %result.job_id,
            backend = %backend.kind(),
            files = result.files.len(),
            "Uploading artifacts"
        );
        backend.upload(&result.files, &metadata, cancel).await
    }
}

/// Terminal state a stage settles in after returning `outcome`.
pub(crate) fn outcome_state<T>(outcome: &Result<T>) -> JobState {
    match outcome {
        Ok(_) => JobState::Done,
        Err(remotebuild_core::Error::Cancelled) => JobState::Cancelled,
        Err(_) => JobState::Failed,
    }
}
