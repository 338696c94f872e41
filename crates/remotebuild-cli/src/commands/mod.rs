//! CLI command implementations.

pub mod jobs;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

/// Response body shared by every API endpoint.
#[derive(Debug, serde::Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    pub message: String,
    pub payload: Option<T>,
}

impl<T> Envelope<T> {
    /// The payload of a successful response, or the server's message as an error.
    pub fn into_result(self) -> Result<Option<T>> {
        match self.status.as_str() {
            "success" => Ok(self.payload),
            "error" => Err(anyhow!(self.message)),
            other => bail!("unexpected response status: {}", other),
        }
    }
}

/// Thin client for the remotebuild HTTP API.
pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let mut base = Url::parse(api_url).with_context(|| format!("invalid API URL {}", api_url))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            http: reqwest::Client::new(),
        })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let response = self.http.get(self.endpoint(path)?).send().await?;
        decode(response).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>> {
        let response = self.http.post(self.endpoint(path)?).json(body).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<Option<T>> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .with_context(|| format!("server answered {} without an envelope", status))?;
    let envelope: Envelope<T> = serde_json::from_value(body)?;
    envelope.into_result()
}

pub fn validate(path: &str) -> Result<()> {
    match remotebuild_config::load_server_config(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  listen:         {}", config.listen);
            println!("  max concurrent: {}", config.max_concurrent);
            for (job_type, image) in &config.images {
                println!("  image {}: {}", job_type, image);
            }
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
