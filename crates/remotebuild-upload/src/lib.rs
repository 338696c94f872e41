//! Artifact upload backends for remotebuild.
//!
//! - [`LocalStorageBackend`] copies artifacts below a local directory.
//! - [`RemoteBackend`] transfers artifacts one by one through a [`FileTransfer`],
//!   with [`DataManagerTransfer`] talking to a DataManager server.

pub mod datamanager;
pub mod local;
pub mod remote;

pub use datamanager::DataManagerTransfer;
pub use local::LocalStorageBackend;
pub use remote::{FileAttributes, FileTransfer, RemoteBackend};

use remotebuild_core::upload::UploadBackend;
use remotebuild_core::{BuildArgs, Error, Result, UploadType};
use std::path::Path;

/// Build the backend for `upload_type`, checking its prerequisites first.
///
/// Performs no I/O. Missing remote credentials yield a configuration error and
/// an unselected type yields [`Error::NoValidUploadMethod`].
pub fn backend_for(
    upload_type: UploadType,
    args: &BuildArgs,
    local_storage: &Path,
) -> Result<Box<dyn UploadBackend>> {
    match upload_type {
        UploadType::LocalStorage => Ok(Box::new(LocalStorageBackend::new(local_storage))),
        UploadType::DataManager => {
            let dm = args.data_manager().ok_or_else(|| {
                Error::Configuration("no DataManager credentials supplied".to_string())
            })?;
            let transfer = DataManagerTransfer::new(&dm)?;
            Ok(Box::new(RemoteBackend::new(transfer)))
        }
        UploadType::None => Err(Error::NoValidUploadMethod),
    }
}
