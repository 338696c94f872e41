//! Local storage upload backend.

use async_trait::async_trait;
use remotebuild_core::upload::{UploadBackend, UploadMetadata};
use remotebuild_core::{CancelSignal, Error, Result, UploadType};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Copies artifacts into `<root>/<job id>-<name>-<version>`.
///
/// An existing destination is removed first, so re-running the same job
/// replaces its artifacts instead of merging with them.
#[derive(Debug, Clone)]
pub struct LocalStorageBackend {
    root: PathBuf,
}

impl LocalStorageBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn destination(&self, metadata: &UploadMetadata) -> Result<PathBuf> {
        let dir = format!("{}-{}-{}", metadata.job_id, metadata.name, metadata.version);
        let mut components = Path::new(&dir).components();
        let single_normal = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if !single_normal {
            return Err(Error::Transfer(format!(
                "refusing unsafe destination name {:?}",
                dir
            )));
        }
        Ok(self.root.join(dir))
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Transfer(format!("{} {}: {}", action, path.display(), e))
}

#[async_trait]
impl UploadBackend for LocalStorageBackend {
    fn kind(&self) -> UploadType {
        UploadType::LocalStorage
    }

    async fn upload(
        &self,
        files: &[PathBuf],
        metadata: &UploadMetadata,
        cancel: &CancelSignal,
    ) -> Result<()> {
        let destination = self.destination(metadata)?;
        info!(job_id = %metadata.job_id, destination = %destination.display(), "Saving to local storage");

        if tokio::fs::try_exists(&destination)
            .await
            .map_err(|e| io_error("inspect", &destination, e))?
        {
            debug!(destination = %destination.display(), "Clearing old build result");
            tokio::fs::remove_dir_all(&destination)
                .await
                .map_err(|e| io_error("clear", &destination, e))?;
        }
        tokio::fs::create_dir_all(&destination)
            .await
            .map_err(|e| io_error("create", &destination, e))?;

        for file in files {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let name = file
                .file_name()
                .ok_or_else(|| Error::Transfer(format!("not a file: {}", file.display())))?;
            tokio::fs::copy(file, destination.join(name))
                .await
                .map_err(|e| io_error("copy", file, e))?;
        }

        Ok(())
    }
}
