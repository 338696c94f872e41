//! In-memory job store.
//!
//! Used when no database is configured, and by tests.

use async_trait::async_trait;
use chrono::Utc;
use remotebuild_core::{BuildJob, Job, JobState, QueueItem, RecordId, UploadJob};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{JobFilter, JobRepo};
use crate::DbResult;

#[derive(Debug, Default)]
struct Store {
    jobs: HashMap<RecordId, Job>,
    /// Sub-job id -> owning job id.
    builds: HashMap<RecordId, RecordId>,
    uploads: HashMap<RecordId, RecordId>,
    items: HashMap<RecordId, QueueItem>,
    last_position: i64,
}

/// Job repository kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryJobRepo {
    store: RwLock<Store>,
}

impl MemoryJobRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepo for MemoryJobRepo {
    async fn create_job(&self, job: &Job) -> DbResult<QueueItem> {
        let mut store = self.store.write().await;
        store.last_position += 1;
        let item = QueueItem {
            id: RecordId::new(),
            job_id: job.id,
            position: store.last_position,
            done: false,
            created_at: Utc::now(),
        };
        store.builds.insert(job.build.id, job.id);
        store.uploads.insert(job.upload.id, job.id);
        store.jobs.insert(job.id, job.clone());
        store.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn get_job(&self, id: RecordId) -> DbResult<Option<Job>> {
        Ok(self.store.read().await.jobs.get(&id).cloned())
    }

    async fn recent_jobs(&self, limit: usize, filter: JobFilter) -> DbResult<Vec<Job>> {
        let store = self.store.read().await;
        let mut jobs: Vec<Job> = store
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn running_jobs(&self) -> DbResult<Vec<Job>> {
        let store = self.store.read().await;
        Ok(store
            .jobs
            .values()
            .filter(|job| {
                job.build.state == JobState::Running || job.upload.state == JobState::Running
            })
            .cloned()
            .collect())
    }

    async fn captured_logs(&self, id: RecordId) -> DbResult<Option<String>> {
        let store = self.store.read().await;
        Ok(store.jobs.get(&id).map(|job| job.last_logs.clone()))
    }

    async fn set_captured_logs(&self, id: RecordId, logs: &str) -> DbResult<()> {
        let mut store = self.store.write().await;
        if let Some(job) = store.jobs.get_mut(&id) {
            job.last_logs = logs.to_string();
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn save_build(&self, build: &BuildJob) -> DbResult<bool> {
        let mut store = self.store.write().await;
        let Some(job_id) = store.builds.get(&build.id).copied() else {
            return Ok(false);
        };
        let Some(job) = store.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if !job.build.state.can_transition_to(build.state) {
            return Ok(false);
        }
        job.build = build.clone();
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn save_upload(&self, upload: &UploadJob) -> DbResult<bool> {
        let mut store = self.store.write().await;
        let Some(job_id) = store.uploads.get(&upload.id).copied() else {
            return Ok(false);
        };
        let Some(job) = store.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if !job.upload.state.can_transition_to(upload.state) {
            return Ok(false);
        }
        job.upload = upload.clone();
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn pending_items(&self) -> DbResult<Vec<QueueItem>> {
        let store = self.store.read().await;
        let mut items: Vec<QueueItem> = store
            .items
            .values()
            .filter(|item| !item.done)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.position);
        Ok(items)
    }

    async fn get_item(&self, id: RecordId) -> DbResult<Option<QueueItem>> {
        Ok(self.store.read().await.items.get(&id).cloned())
    }

    async fn item_for_job(&self, job_id: RecordId) -> DbResult<Option<QueueItem>> {
        let store = self.store.read().await;
        Ok(store.items.values().find(|item| item.job_id == job_id).cloned())
    }

    async fn mark_item_done(&self, id: RecordId) -> DbResult<()> {
        if let Some(item) = self.store.write().await.items.get_mut(&id) {
            item.done = true;
        }
        Ok(())
    }
}
