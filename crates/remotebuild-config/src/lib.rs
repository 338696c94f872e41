//! KDL configuration parsing for remotebuild.

pub mod error;
pub mod server;

pub use error::{ConfigError, ConfigResult};
pub use server::{ServerConfig, load_server_config, parse_server_config};
