//! Local Docker executor implementation.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use remotebuild_core::executor::*;
use remotebuild_core::{Error, RecordId, Result};
use tracing::{debug, info, warn};

/// Runs build containers on the local Docker daemon.
pub struct LocalDockerExecutor {
    docker: Docker,
}

impl LocalDockerExecutor {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn container_name(build_id: &RecordId) -> String {
        format!("remotebuild-{}", build_id)
    }

    async fn remove_container(&self, container_name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(container_name, Some(options))
            .await
            .map_err(|e| Error::Execution(format!("Failed to remove container: {}", e)))
    }

    async fn pull_image(&self, image: &str) {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                // A locally built image cannot be pulled but still runs.
                Err(e) => warn!(error = %e, "Pull warning"),
            }
        }
    }
}

fn parse_docker_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn env_list(spec: &ContainerSpec) -> Vec<String> {
    let mut env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    env.sort();
    env
}

fn binds(spec: &ContainerSpec) -> Option<Vec<String>> {
    if spec.volumes.is_empty() {
        return None;
    }
    Some(
        spec.volumes
            .iter()
            .map(|v| {
                let mode = if v.read_only { "ro" } else { "rw" };
                format!("{}:{}:{}", v.source, v.mount_path, mode)
            })
            .collect(),
    )
}

#[async_trait]
impl Executor for LocalDockerExecutor {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn spawn(&self, spec: ContainerSpec) -> Result<ContainerHandle> {
        let container_name = Self::container_name(&spec.id);

        self.pull_image(&spec.image).await;

        let host_config = HostConfig {
            binds: binds(&spec),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: if spec.command.is_empty() {
                None
            } else {
                Some(spec.command.clone())
            },
            env: Some(env_list(&spec)),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };

        info!(container = %container_name, "Creating container");
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| Error::Execution(format!("Failed to create container: {}", e)))?;

        info!(container = %container_name, "Starting container");
        if let Err(e) = self
            .docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await
        {
            // No handle reaches the caller, so nothing else would remove it.
            if let Err(remove) = self.remove_container(&container_name).await {
                warn!(container = %container_name, error = %remove, "Failed to remove unstarted container");
            }
            return Err(Error::Execution(format!("Failed to start container: {}", e)));
        }

        Ok(ContainerHandle {
            id: spec.id,
            executor_id: container.id,
            executor_name: self.name().to_string(),
        })
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<BoxStream<'static, LogLine>> {
        let container_name = Self::container_name(&handle.id);

        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let stream = self.docker.logs(&container_name, Some(options));

        let mapped_stream = stream.filter_map(|result| async move {
            match result {
                Ok(output) => {
                    let (stream, message) = match output {
                        LogOutput::StdErr { message } => (LogStream::Stderr, message),
                        LogOutput::StdOut { message }
                        | LogOutput::Console { message }
                        | LogOutput::StdIn { message } => (LogStream::Stdout, message),
                    };
                    Some(LogLine {
                        timestamp: Utc::now(),
                        stream,
                        content: String::from_utf8_lossy(&message).trim_end().to_string(),
                    })
                }
                Err(e) => {
                    warn!(error = %e, "Log stream error");
                    None
                }
            }
        });

        Ok(Box::pin(mapped_stream))
    }

    async fn status(&self, handle: &ContainerHandle) -> Result<ContainerStatus> {
        let container_name = Self::container_name(&handle.id);

        let inspect = self
            .docker
            .inspect_container(&container_name, None)
            .await
            .map_err(|e| Error::NotFound(format!("Container not found: {}", e)))?;

        let state = inspect
            .state
            .ok_or_else(|| Error::Internal("No state".to_string()))?;

        if state.running.unwrap_or(false) {
            let started_at = parse_docker_time(state.started_at).unwrap_or_else(Utc::now);
            return Ok(ContainerStatus::Running { started_at });
        }
        if state.paused.unwrap_or(false) {
            return Ok(ContainerStatus::Pending);
        }

        let exit_code = state.exit_code.map(|c| c as i32);
        let started_at = parse_docker_time(state.started_at);
        let finished_at = parse_docker_time(state.finished_at).unwrap_or_else(Utc::now);

        if exit_code == Some(0) {
            Ok(ContainerStatus::Succeeded {
                started_at: started_at.unwrap_or(finished_at),
                finished_at,
            })
        } else {
            Ok(ContainerStatus::Failed {
                started_at,
                finished_at,
                exit_code,
                message: state
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| format!("exit code {:?}", exit_code)),
            })
        }
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<ContainerResult> {
        let container_name = Self::container_name(&handle.id);

        let current = self.status(handle).await?;
        if current.is_terminal() {
            let exit_code = match &current {
                ContainerStatus::Succeeded { .. } => Some(0),
                ContainerStatus::Failed { exit_code, .. } => *exit_code,
                _ => None,
            };
            return Ok(ContainerResult {
                status: current,
                exit_code,
            });
        }

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(&container_name, Some(options));

        let exit_code = match stream.next().await {
            Some(Ok(response)) => Some(response.status_code as i32),
            Some(Err(e)) => {
                // Non-zero exits surface as errors from the wait endpoint.
                warn!(error = %e, "Wait error");
                None
            }
            None => None,
        };

        let status = self.status(handle).await?;
        Ok(ContainerResult { status, exit_code })
    }

    async fn cancel(&self, handle: &ContainerHandle) -> Result<()> {
        let container_name = Self::container_name(&handle.id);
        info!(container = %container_name, "Stopping container");

        self.docker
            .stop_container(&container_name, None)
            .await
            .map_err(|e| Error::Execution(format!("Failed to stop container: {}", e)))?;

        self.cleanup(handle).await
    }

    async fn cleanup(&self, handle: &ContainerHandle) -> Result<()> {
        self.remove_container(&Self::container_name(&handle.id)).await
    }
}
