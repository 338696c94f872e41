//! Image resolution backed by the server configuration.

use remotebuild_config::ServerConfig;
use remotebuild_core::resolver::ContainerResolver;
use remotebuild_core::{Error, JobType, Result};
use std::collections::HashMap;

/// Resolves images from the `images` block of the server config.
#[derive(Debug, Clone, Default)]
pub struct ConfigImageResolver {
    images: HashMap<String, String>,
}

impl ConfigImageResolver {
    pub fn new(images: HashMap<String, String>) -> Self {
        Self { images }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.images.clone())
    }
}

impl ContainerResolver for ConfigImageResolver {
    fn resolve(&self, job_type: JobType) -> Result<String> {
        self.images
            .get(job_type.as_str())
            .filter(|image| !image.trim().is_empty())
            .cloned()
            .ok_or_else(|| {
                Error::Configuration(format!("no image configured for job type '{}'", job_type))
            })
    }
}
