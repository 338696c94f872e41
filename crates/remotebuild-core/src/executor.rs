//! Executor trait and container run types.
//!
//! Executors run a build container to completion in an isolated environment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{RecordId, Result};

/// Specification for one container run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// The build job this run belongs to.
    pub id: RecordId,
    pub image: String,
    /// Command override. Empty keeps the image entrypoint.
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    pub volumes: Vec<VolumeMount>,
}

/// A host directory bound into the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Host path.
    pub source: String,
    /// Path inside the container.
    pub mount_path: String,
    pub read_only: bool,
}

/// Handle to a running or finished container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: RecordId,
    /// Executor-specific identifier, e.g. the container ID.
    pub executor_id: String,
    pub executor_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContainerStatus {
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Succeeded {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    Failed {
        started_at: Option<DateTime<Utc>>,
        finished_at: DateTime<Utc>,
        exit_code: Option<i32>,
        message: String,
    },
    Cancelled {
        started_at: Option<DateTime<Utc>>,
        cancelled_at: DateTime<Utc>,
    },
}

impl ContainerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContainerStatus::Succeeded { .. }
                | ContainerStatus::Failed { .. }
                | ContainerStatus::Cancelled { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerResult {
    pub status: ContainerStatus,
    pub exit_code: Option<i32>,
}

/// A line of container output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

/// Trait for container executors.
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create and start a container.
    async fn spawn(&self, spec: ContainerSpec) -> Result<ContainerHandle>;

    /// Follow the container's output.
    async fn logs(&self, handle: &ContainerHandle) -> Result<BoxStream<'static, LogLine>>;

    async fn status(&self, handle: &ContainerHandle) -> Result<ContainerStatus>;

    /// Wait for the container to stop.
    async fn wait(&self, handle: &ContainerHandle) -> Result<ContainerResult>;

    /// Stop and remove the container.
    async fn cancel(&self, handle: &ContainerHandle) -> Result<()>;

    /// Remove a stopped container.
    async fn cleanup(&self, handle: &ContainerHandle) -> Result<()>;
}
