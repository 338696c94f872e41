//! Container execution backends for remotebuild.
//!
//! - [`LocalDockerExecutor`] runs build containers on the local Docker daemon.
//! - [`ConfigImageResolver`] maps job types to images from the server config.

pub mod docker;
pub mod resolver;

pub use docker::LocalDockerExecutor;
pub use remotebuild_core::executor::{
    ContainerHandle, ContainerResult, ContainerSpec, ContainerStatus, Executor, LogLine, LogStream,
};
pub use resolver::ConfigImageResolver;
