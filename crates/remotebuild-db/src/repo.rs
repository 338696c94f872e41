//! Repository contract and implementations.

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobRepo;
pub use postgres::PgJobRepo;

use async_trait::async_trait;
use remotebuild_core::{BuildJob, Job, JobState, QueueItem, RecordId, UploadJob};

use crate::DbResult;

/// Named filters for history listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobFilter {
    All,
    /// Jobs with an outcome: the build failed, or it finished and the upload
    /// reached a terminal state. Excludes queued and running jobs and jobs
    /// cancelled before producing a build result.
    #[default]
    Settled,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        match self {
            JobFilter::All => true,
            JobFilter::Settled => match job.build.state {
                JobState::Failed => true,
                JobState::Done => job.upload.state.is_terminal(),
                _ => false,
            },
        }
    }
}

/// Persistence needed by the scheduler and the service layer.
///
/// State writes are conditional: a sub-job is only saved when its stored
/// state may legally move to the new one. Terminal states therefore never
/// change, and callers learn through the returned flag whether they won.
#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Store a job with its sub-jobs and a queue item in one step.
    /// The item receives the next unused position.
    async fn create_job(&self, job: &Job) -> DbResult<QueueItem>;

    /// Fetch a job with both sub-jobs.
    async fn get_job(&self, id: RecordId) -> DbResult<Option<Job>>;

    /// Most recent jobs first, at most `limit` of them.
    async fn recent_jobs(&self, limit: usize, filter: JobFilter) -> DbResult<Vec<Job>>;

    /// Jobs whose build or upload is stored as running.
    async fn running_jobs(&self) -> DbResult<Vec<Job>>;

    async fn captured_logs(&self, id: RecordId) -> DbResult<Option<String>>;

    async fn set_captured_logs(&self, id: RecordId, logs: &str) -> DbResult<()>;

    /// Save a build job if its stored state may move to `build.state`.
    async fn save_build(&self, build: &BuildJob) -> DbResult<bool>;

    /// Save an upload job if its stored state may move to `upload.state`.
    async fn save_upload(&self, upload: &UploadJob) -> DbResult<bool>;

    /// Queue items not yet done, ordered by position.
    async fn pending_items(&self) -> DbResult<Vec<QueueItem>>;

    async fn get_item(&self, id: RecordId) -> DbResult<Option<QueueItem>>;

    async fn item_for_job(&self, job_id: RecordId) -> DbResult<Option<QueueItem>>;

    async fn mark_item_done(&self, id: RecordId) -> DbResult<()>;
}
