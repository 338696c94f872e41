//! Sequential, best-effort remote upload.

use async_trait::async_trait;
use remotebuild_core::upload::{UploadBackend, UploadMetadata};
use remotebuild_core::{CancelSignal, Error, Result, UploadType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Group added to packages uploaded without a namespace.
pub const DEFAULT_GROUP: &str = "AURPackage";

/// Attributes attached to every remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    pub groups: Vec<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl From<&UploadMetadata> for FileAttributes {
    fn from(metadata: &UploadMetadata) -> Self {
        let mut groups = vec![metadata.name.clone()];
        if metadata.namespace.is_none() {
            groups.push(DEFAULT_GROUP.to_string());
        }
        Self {
            groups,
            tags: vec![metadata.version.clone()],
            namespace: metadata.namespace.clone(),
        }
    }
}

/// Moves one file to a remote service.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn send_file(&self, file: &Path, attributes: &FileAttributes) -> Result<()>;
}

/// Uploads files one after another and stops at the first failure.
///
/// Files transferred before a failure are left on the remote side.
pub struct RemoteBackend<T> {
    transfer: T,
}

impl<T: FileTransfer> RemoteBackend<T> {
    pub fn new(transfer: T) -> Self {
        Self { transfer }
    }
}

#[async_trait]
impl<T: FileTransfer> UploadBackend for RemoteBackend<T> {
    fn kind(&self) -> UploadType {
        UploadType::DataManager
    }

    async fn upload(
        &self,
        files: &[PathBuf],
        metadata: &UploadMetadata,
        cancel: &CancelSignal,
    ) -> Result<()> {
        let attributes = FileAttributes::from(metadata);

        for (index, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            debug!(job_id = %metadata.job_id, file = %file.display(), "Uploading file");

            let sent = tokio::select! {
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = self.transfer.send_file(file, &attributes) => result,
            };

            if let Err(e) = sent {
                warn!(
                    job_id = %metadata.job_id,
                    file = %file.display(),
                    uploaded = index,
                    error = %e,
                    "Upload aborted"
                );
                return Err(match e {
                    Error::Cancelled => Error::Cancelled,
                    Error::Transfer(msg) => Error::Transfer(msg),
                    other => Error::Transfer(format!("{}: {}", file.display(), other)),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remotebuild_core::RecordId;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every attempt and fails on the configured file name.
    struct ScriptedTransfer {
        fail_on: Option<&'static str>,
        delay: Duration,
        attempts: Mutex<Vec<String>>,
    }

    impl ScriptedTransfer {
        fn new(fail_on: Option<&'static str>) -> Self {
            Self {
                fail_on,
                delay: Duration::ZERO,
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FileTransfer for &ScriptedTransfer {
        async fn send_file(&self, file: &Path, _attributes: &FileAttributes) -> Result<()> {
            let name = file.file_name().unwrap().to_string_lossy().to_string();
            self.attempts.lock().unwrap().push(name.clone());
            tokio::time::sleep(self.delay).await;
            if self.fail_on == Some(name.as_str()) {
                return Err(Error::Transfer(format!("{}: 502 Bad Gateway", name)));
            }
            Ok(())
        }
    }

    fn metadata(namespace: Option<&str>) -> UploadMetadata {
        UploadMetadata {
            job_id: RecordId::new(),
            name: "yay".to_string(),
            version: "12.3.5-1".to_string(),
            namespace: namespace.map(str::to_string),
        }
    }

    fn files() -> Vec<PathBuf> {
        vec![
            PathBuf::from("/out/one.pkg.tar.zst"),
            PathBuf::from("/out/two.pkg.tar.zst"),
            PathBuf::from("/out/three.pkg.tar.zst"),
        ]
    }

    #[tokio::test]
    async fn test_uploads_every_file_in_order() {
        let transfer = ScriptedTransfer::new(None);
        let backend = RemoteBackend::new(&transfer);
        backend
            .upload(&files(), &metadata(None), &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(
            transfer.attempts(),
            vec!["one.pkg.tar.zst", "two.pkg.tar.zst", "three.pkg.tar.zst"]
        );
    }

    #[tokio::test]
    async fn test_second_file_failure_stops_upload() {
        let transfer = ScriptedTransfer::new(Some("two.pkg.tar.zst"));
        let backend = RemoteBackend::new(&transfer);
        let err = backend
            .upload(&files(), &metadata(None), &CancelSignal::new())
            .await
            .unwrap_err();

        assert!(matches!(&err, Error::Transfer(msg) if msg.contains("two.pkg.tar.zst")));
        // The first file stays uploaded, the third is never attempted.
        assert_eq!(transfer.attempts(), vec!["one.pkg.tar.zst", "two.pkg.tar.zst"]);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_transfer() {
        let mut transfer = ScriptedTransfer::new(None);
        transfer.delay = Duration::from_secs(30);
        let backend = RemoteBackend::new(&transfer);
        let cancel = CancelSignal::new();

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            }
        };
        let files = files();
        let metadata = metadata(None);
        let (result, _) = tokio::join!(backend.upload(&files, &metadata, &cancel), canceller);

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(transfer.attempts(), vec!["one.pkg.tar.zst"]);
    }

    #[test]
    fn test_attributes_without_namespace() {
        let attributes = FileAttributes::from(&metadata(None));
        assert_eq!(attributes.groups, vec!["yay", DEFAULT_GROUP]);
        assert_eq!(attributes.tags, vec!["12.3.5-1"]);
        assert_eq!(attributes.namespace, None);
    }

    #[test]
    fn test_attributes_with_namespace() {
        let attributes = FileAttributes::from(&metadata(Some("packages")));
        assert_eq!(attributes.groups, vec!["yay"]);
        assert_eq!(attributes.namespace.as_deref(), Some("packages"));
    }
}
