//! DataManager file transfer.

use async_trait::async_trait;
use base64::prelude::*;
use reqwest::multipart::{Form, Part};
use remotebuild_core::{DataManagerArgs, Error, Result};
use std::path::Path;
use url::Url;

use crate::remote::{FileAttributes, FileTransfer};

/// Uploads files to a DataManager server with a user session token.
#[derive(Debug, Clone)]
pub struct DataManagerTransfer {
    client: reqwest::Client,
    endpoint: Url,
    username: String,
    session_token: String,
}

impl DataManagerTransfer {
    /// Validate credentials and build a transfer. Performs no I/O.
    pub fn new(args: &DataManagerArgs) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: upload_endpoint(&args.host)?,
            username: args.username.clone(),
            session_token: decode_token(&args.token)?,
        })
    }
}

/// Session tokens arrive base64 encoded.
fn decode_token(encoded: &str) -> Result<String> {
    let bytes = BASE64_STANDARD
        .decode(encoded.trim().as_bytes())
        .map_err(|e| Error::Configuration(format!("invalid DataManager token encoding: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::Configuration(format!("invalid DataManager token: {}", e)))
}

fn upload_endpoint(host: &str) -> Result<Url> {
    let mut base = Url::parse(host)
        .map_err(|e| Error::Configuration(format!("invalid DataManager host {:?}: {}", host, e)))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(Error::Configuration(format!(
            "unsupported DataManager scheme: {}",
            base.scheme()
        )));
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("upload/file")
        .map_err(|e| Error::Configuration(format!("invalid DataManager host: {}", e)))
}

#[async_trait]
impl FileTransfer for DataManagerTransfer {
    async fn send_file(&self, file: &Path, attributes: &FileAttributes) -> Result<()> {
        let transfer_error = |e: &dyn std::fmt::Display| {
            Error::Transfer(format!("{}: {}", file.display(), e))
        };

        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| transfer_error(&"not a file"))?;

        let handle = tokio::fs::File::open(file)
            .await
            .map_err(|e| transfer_error(&e))?;
        let length = handle
            .metadata()
            .await
            .map_err(|e| transfer_error(&e))?
            .len();

        let attributes = serde_json::to_string(attributes).map_err(|e| transfer_error(&e))?;
        let part = Part::stream_with_length(reqwest::Body::from(handle), length).file_name(file_name);
        let form = Form::new().text("attributes", attributes).part("file", part);

        self.client
            .post(self.endpoint.clone())
            .bearer_auth(&self.session_token)
            .header("X-Username", &self.username)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transfer_error(&e))?
            .error_for_status()
            .map_err(|e| transfer_error(&e))?;

        Ok(())
    }
}
