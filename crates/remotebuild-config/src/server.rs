//! Server configuration.
//!
//! ```kdl
//! server {
//!     listen "0.0.0.0:8090"
//!     database-url "postgres://remotebuild@localhost/remotebuild"
//!     local-storage "/var/lib/remotebuild/packages"
//!     work-dir "/var/lib/remotebuild/jobs"
//!     max-concurrent 2
//!     poll-interval-ms 1000
//! }
//! images {
//!     aur "jojii/buildaur:v1.0"
//! }
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP transport binds to.
    pub listen: String,
    /// PostgreSQL URL. Jobs are kept in memory when unset.
    pub database_url: Option<String>,
    /// Root of the local-storage upload destination.
    pub local_storage_path: PathBuf,
    /// Per-job host directories mounted into build containers.
    pub work_dir: PathBuf,
    /// Maximum number of jobs running at once.
    pub max_concurrent: usize,
    pub poll_interval: Duration,
    /// Container image per job type.
    pub images: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8090".to_string(),
            database_url: None,
            local_storage_path: PathBuf::from("packages"),
            work_dir: PathBuf::from("jobs"),
            max_concurrent: 1,
            poll_interval: Duration::from_millis(1000),
            images: HashMap::new(),
        }
    }
}

/// Read and parse a configuration file.
pub fn load_server_config(path: impl AsRef<Path>) -> ConfigResult<ServerConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_server_config(&content)
}

/// Parse server configuration from KDL text.
pub fn parse_server_config(kdl: &str) -> ConfigResult<ServerConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = ServerConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => parse_server_block(node, &mut config)?,
            "images" => {
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        let job_type = child.name().value().to_string();
                        let image = get_first_string_arg(child).ok_or_else(|| {
                            ConfigError::MissingField(format!("image for job type '{}'", job_type))
                        })?;
                        config.images.insert(job_type, image);
                    }
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_server_block(node: &KdlNode, config: &mut ServerConfig) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        let field = child.name().value();
        match field {
            "listen" => config.listen = require_string(child)?,
            "database-url" => config.database_url = Some(require_string(child)?),
            "local-storage" => config.local_storage_path = PathBuf::from(require_string(child)?),
            "work-dir" => config.work_dir = PathBuf::from(require_string(child)?),
            "max-concurrent" => {
                let value = require_integer(child)?;
                if value < 1 {
                    return Err(ConfigError::InvalidValue {
                        field: field.to_string(),
                        message: "must be at least 1".to_string(),
                    });
                }
                config.max_concurrent = value as usize;
            }
            "poll-interval-ms" => {
                let value = require_integer(child)?;
                if value < 1 {
                    return Err(ConfigError::InvalidValue {
                        field: field.to_string(),
                        message: "must be positive".to_string(),
                    });
                }
                config.poll_interval = Duration::from_millis(value as u64);
            }
            _ => {}
        }
    }
    Ok(())
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn require_string(node: &KdlNode) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| ConfigError::InvalidValue {
        field: node.name().value().to_string(),
        message: "expected a string".to_string(),
    })
}

fn require_integer(node: &KdlNode) -> ConfigResult<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: node.name().value().to_string(),
            message: "expected an integer".to_string(),
        })
}
