//! Build stage: runs one build container and collects its artifacts.

use futures::StreamExt;
use remotebuild_core::executor::{ContainerSpec, ContainerStatus, Executor, VolumeMount};
use remotebuild_core::{BuildResult, CancelSignal, Error, Job, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Where the output directory is mounted inside the build container.
pub const OUTPUT_MOUNT: &str = "/out";

/// Manifest the build image writes into the output directory.
pub const RESULT_FILE: &str = "result.json";

/// Env var carrying the job id into the container.
pub const JOB_ID_ENV: &str = "REMOTEBUILD_JOB_ID";

/// Upper bound on retained container output. Older output is dropped first.
pub const MAX_CAPTURED_LOGS: usize = 1024 * 1024;

/// How long to keep draining output once the container has stopped.
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of one build attempt together with whatever output was captured.
#[derive(Debug)]
pub struct BuildOutcome {
    pub result: Result<BuildResult>,
    pub logs: String,
}

#[derive(Debug, Deserialize)]
struct ResultManifest {
    name: String,
    version: String,
    files: Vec<String>,
}

/// Runs build containers through an [`Executor`].
pub struct BuildRunner {
    executor: Arc<dyn Executor>,
    work_dir: PathBuf,
}

impl BuildRunner {
    pub fn new(executor: Arc<dyn Executor>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            work_dir: work_dir.into(),
        }
    }

    /// Host directory mounted as the container's output directory.
    pub fn output_dir(&self, job: &Job) -> PathBuf {
        self.work_dir.join(job.id.to_string())
    }

    /// Remove the output directory of `job`. A missing directory is fine.
    pub async fn discard_output(&self, job: &Job) -> Result<()> {
        let dir = self.output_dir(job);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Execution(format!(
                "output directory {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    /// Run the build for `job` in `image`.
    ///
    /// Returns [`Error::Cancelled`] once `cancel` fires; the container is
    /// stopped before returning. The container is removed in every case.
    pub async fn run(&self, job: &Job, image: &str, cancel: &CancelSignal) -> BuildOutcome {
        let logs = Arc::new(Mutex::new(String::new()));
        let result = self.run_inner(job, image, cancel, &logs).await;
        let logs = logs.lock().await.clone();
        BuildOutcome { result, logs }
    }

    async fn run_inner(
        &self,
        job: &Job,
        image: &str,
        cancel: &CancelSignal,
        logs: &Arc<Mutex<String>>,
    ) -> Result<BuildResult> {
        let out_dir = prepare_output_dir(&self.output_dir(job)).await?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let spec = ContainerSpec {
            id: job.build.id,
            image: image.to_string(),
            command: vec![],
            env: container_env(job),
            volumes: vec![VolumeMount {
                source: out_dir.to_string_lossy().to_string(),
                mount_path: OUTPUT_MOUNT.to_string(),
                read_only: false,
            }],
        };

        info!(job_id = %job.id, image = %image, "Spawning build container");
        let handle = self.executor.spawn(spec).await?;

        let mut log_task = match self.executor.logs(&handle).await {
            Ok(mut stream) => {
                let logs = logs.clone();
                Some(tokio::spawn(async move {
                    while let Some(line) = stream.next().await {
                        push_bounded(&mut *logs.lock().await, &line.content);
                    }
                }))
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to follow build output");
                None
            }
        };

        let waited = tokio::select! {
            res = self.executor.wait(&handle) => Some(res),
            _ = cancel.cancelled() => None,
        };

        // A followed log stream only ends once the container is gone.
        if waited.is_none() {
            info!(job_id = %job.id, "Build cancelled, stopping container");
            if let Err(e) = self.executor.cancel(&handle).await {
                warn!(job_id = %job.id, error = %e, "Failed to stop build container");
            }
        }

        if let Some(task) = log_task.as_mut() {
            if tokio::time::timeout(LOG_DRAIN_TIMEOUT, &mut *task).await.is_err() {
                task.abort();
            }
        }

        let Some(waited) = waited else {
            return Err(Error::Cancelled);
        };

        if let Err(e) = self.executor.cleanup(&handle).await {
            warn!(job_id = %job.id, error = %e, "Failed to remove build container");
        }

        match waited?.status {
            ContainerStatus::Succeeded { .. } => read_result(job, &out_dir).await,
            ContainerStatus::Failed { message, .. } => Err(Error::Execution(message)),
            ContainerStatus::Cancelled { .. } => Err(Error::Cancelled),
            _ => Err(Error::Execution(
                "build container ended in unexpected state".to_string(),
            )),
        }
    }
}

/// Recreate an empty output directory and return its absolute path.
async fn prepare_output_dir(dir: &Path) -> Result<PathBuf> {
    let io_error = |e: std::io::Error| {
        Error::Execution(format!("output directory {}: {}", dir.display(), e))
    };

    if tokio::fs::try_exists(dir).await.map_err(io_error)? {
        tokio::fs::remove_dir_all(dir).await.map_err(io_error)?;
    }
    tokio::fs::create_dir_all(dir).await.map_err(io_error)?;
    std::path::absolute(dir).map_err(io_error)
}

/// Build arguments as container env. Upload credentials stay on the host.
fn container_env(job: &Job) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = job
        .args
        .iter()
        .filter(|(key, _)| !key.starts_with("dm_"))
        .map(|(key, value)| (key.to_uppercase(), value.to_string()))
        .collect();
    env.insert(JOB_ID_ENV.to_string(), job.id.to_string());
    env
}

async fn read_result(job: &Job, out_dir: &Path) -> Result<BuildResult> {
    let path = out_dir.join(RESULT_FILE);
    let raw = tokio::fs::read(&path)
        .await
        .map_err(|e| Error::Execution(format!("missing build manifest {}: {}", path.display(), e)))?;
    let manifest: ResultManifest = serde_json::from_slice(&raw)
        .map_err(|e| Error::Execution(format!("malformed build manifest: {}", e)))?;

    if manifest.files.is_empty() {
        return Err(Error::Execution("build produced no packages".to_string()));
    }

    let mut files = Vec::with_capacity(manifest.files.len());
    for name in &manifest.files {
        let relative = Path::new(name);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(Error::Execution(format!(
                "package path escapes output directory: {}",
                name
            )));
        }
        let file = out_dir.join(relative);
        if !tokio::fs::try_exists(&file).await.unwrap_or(false) {
            return Err(Error::Execution(format!("package file missing: {}", name)));
        }
        files.push(file);
    }

    Ok(BuildResult {
        job_id: job.id,
        name: manifest.name,
        version: manifest.version,
        files,
    })
}

/// Append a line, dropping the oldest output past [`MAX_CAPTURED_LOGS`].
fn push_bounded(buf: &mut String, line: &str) {
    buf.push_str(line);
    if !line.ends_with('\n') {
        buf.push('\n');
    }
    if buf.len() > MAX_CAPTURED_LOGS {
        let mut cut = buf.len() - MAX_CAPTURED_LOGS;
        while !buf.is_char_boundary(cut) {
            cut += 1;
        }
        buf.drain(..cut);
    }
}
