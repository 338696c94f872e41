//! Operation surface consumed by the transport layer.

use remotebuild_config::ServerConfig;
use remotebuild_core::executor::Executor;
use remotebuild_core::resolver::ContainerResolver;
use remotebuild_core::validate::validate;
use remotebuild_core::{BuildSpec, Error, Job, JobType, QueueItem, RecordId, Result};
use remotebuild_db::{JobFilter, JobRepo};
use remotebuild_executor::ConfigImageResolver;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::build::BuildRunner;
use crate::queue::{JobQueue, QueueConfig};
use crate::upload::UploadRunner;

/// Submits, cancels and looks up jobs.
pub struct JobService {
    repo: Arc<dyn JobRepo>,
    resolver: Arc<dyn ContainerResolver>,
    queue: JobQueue,
}

impl JobService {
    /// Service resolving images from the config's `images` block.
    pub fn new(config: &ServerConfig, repo: Arc<dyn JobRepo>, executor: Arc<dyn Executor>) -> Self {
        let resolver = Arc::new(ConfigImageResolver::from_config(config));
        Self::with_resolver(config, repo, executor, resolver)
    }

    pub fn with_resolver(
        config: &ServerConfig,
        repo: Arc<dyn JobRepo>,
        executor: Arc<dyn Executor>,
        resolver: Arc<dyn ContainerResolver>,
    ) -> Self {
        let queue = JobQueue::new(
            repo.clone(),
            resolver.clone(),
            BuildRunner::new(executor, &config.work_dir),
            UploadRunner::new(&config.local_storage_path),
            QueueConfig::from(config),
        );
        Self {
            repo,
            resolver,
            queue,
        }
    }

    /// Check that every job type has an image, settle jobs orphaned by a
    /// previous run, then start the queue.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        for job_type in JobType::ALL {
            self.resolver.resolve(job_type)?;
        }
        self.queue.recover().await?;
        self.queue.start()
    }

    /// Stop admitting jobs. Running jobs finish on their own.
    pub fn stop(&self) {
        self.queue.stop();
    }

    /// Validate and enqueue a build. Upload prerequisites are checked when the
    /// upload runs, not here.
    pub async fn submit_job(&self, spec: BuildSpec) -> Result<QueueItem> {
        validate(&spec)?;
        let job = Job::new(spec);
        let item = self.queue.enqueue(&job).await?;
        info!(job_id = %job.id, job_type = %job.job_type, upload_type = %job.upload.upload_type, position = item.position, "Job submitted");
        Ok(item)
    }

    pub async fn cancel_job(&self, id: RecordId) -> Result<()> {
        self.queue.cancel_job(id).await
    }

    /// Snapshot of a job. An unknown id is `None`, not an error.
    pub async fn job_info(&self, id: RecordId) -> Result<Option<Job>> {
        Ok(self.repo.get_job(id).await?)
    }

    /// Settled jobs, most recent first.
    pub async fn recent_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        Ok(self.repo.recent_jobs(limit, JobFilter::Settled).await?)
    }

    /// Output captured from the job's build container.
    pub async fn captured_logs(&self, id: RecordId) -> Result<String> {
        self.repo
            .captured_logs(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))
    }
}
