//! Job queue: admission in position order, a concurrency ceiling, and cancellation.
//!
//! One coordinating loop admits queue items. Each admitted job runs its
//! build-then-upload pipeline as its own task. The repository is the source of
//! truth: an item and its job are re-read right before they are admitted, and
//! every state write is conditional, so a concurrent cancel always wins over a
//! stale admission.

use remotebuild_config::ServerConfig;
use remotebuild_core::resolver::ContainerResolver;
use remotebuild_core::{BuildResult, Error, Job, JobState, QueueItem, RecordId, Result};
use remotebuild_db::JobRepo;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::build::BuildRunner;
use crate::upload::{UploadRunner, outcome_state};

/// Scheduling limits.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of jobs running at once.
    pub max_concurrent: usize,
    /// Rescan interval when nothing wakes the loop earlier.
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl From<&ServerConfig> for QueueConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            poll_interval: config.poll_interval,
        }
    }
}

type SharedJob = Arc<Mutex<Job>>;

/// Handle to the job queue. Clones share the same queue.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

struct Inner {
    repo: Arc<dyn JobRepo>,
    resolver: Arc<dyn ContainerResolver>,
    builder: BuildRunner,
    uploader: UploadRunner,
    config: QueueConfig,
    /// Jobs owned by a live pipeline task. Admission and cancellation both
    /// hold this lock while deciding, so they never interleave.
    active: Mutex<HashMap<RecordId, SharedJob>>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
}

impl JobQueue {
    pub fn new(
        repo: Arc<dyn JobRepo>,
        resolver: Arc<dyn ContainerResolver>,
        builder: BuildRunner,
        uploader: UploadRunner,
        config: QueueConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                repo,
                resolver,
                builder,
                uploader,
                config,
                active: Mutex::new(HashMap::new()),
                wake: Notify::new(),
                shutdown,
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Persist `job` with a new queue item and return without waiting for it to run.
    pub async fn enqueue(&self, job: &Job) -> Result<QueueItem> {
        let item = self.inner.repo.create_job(job).await?;
        debug!(job_id = %job.id, position = item.position, "Enqueued job");
        self.inner.wake.notify_one();
        Ok(item)
    }

    /// Spawn the coordinating loop. The handle resolves after [`stop`](Self::stop)
    /// once every running job has settled. A queue runs at most one loop, so a
    /// second call fails.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Internal("job queue already started".to_string()));
        }
        Ok(tokio::spawn(self.inner.clone().run()))
    }

    /// Stop admitting jobs. Jobs already running are left to finish.
    pub fn stop(&self) {
        self.inner.shutdown.send_replace(true);
        self.inner.wake.notify_one();
    }

    /// Cancel a job.
    ///
    /// A waiting job goes straight to Cancelled without ever running. A running
    /// sub-job receives its cancellation token. Cancelling a finished job is a
    /// no-op.
    pub async fn cancel_job(&self, id: RecordId) -> Result<()> {
        self.inner.cancel_job(id).await
    }

    /// Fail jobs the store reports as running but no task owns, e.g. after a crash.
    /// Returns how many jobs were failed.
    pub async fn recover(&self) -> Result<usize> {
        self.inner.recover().await
    }

    /// Number of jobs currently owned by a pipeline task.
    pub async fn active_jobs(&self) -> usize {
        self.inner.active.lock().await.len()
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        info!(
            max_concurrent = self.config.max_concurrent,
            "Starting job queue"
        );
        let mut shutdown = self.shutdown.subscribe();
        let mut pipelines = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            while let Some(joined) = pipelines.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Job pipeline task panicked");
                }
            }

            if let Err(e) = self.admit(&mut pipelines).await {
                warn!(error = %e, "Scheduling pass failed");
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!(running = pipelines.len(), "Job queue stopping");
        while let Some(joined) = pipelines.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Job pipeline task panicked");
            }
        }
        info!("Job queue stopped");
    }

    /// Admit pending items in position order until the ceiling is reached.
    async fn admit(self: &Arc<Self>, pipelines: &mut JoinSet<()>) -> Result<()> {
        for item in self.repo.pending_items().await? {
            let mut active = self.active.lock().await;
            if active.len() >= self.config.max_concurrent.max(1) {
                break;
            }
            if active.contains_key(&item.job_id) {
                continue;
            }
            if let Err(e) = self.admit_item(item.id, &mut active, pipelines).await {
                warn!(item_id = %item.id, job_id = %item.job_id, error = %e, "Failed to admit job");
            }
        }
        Ok(())
    }

    async fn admit_item(
        self: &Arc<Self>,
        item_id: RecordId,
        active: &mut HashMap<RecordId, SharedJob>,
        pipelines: &mut JoinSet<()>,
    ) -> Result<()> {
        // The listing may be stale; a cancel can settle the item after it was read.
        let Some(item) = self.repo.get_item(item_id).await? else {
            return Ok(());
        };
        if item.done {
            return Ok(());
        }

        let Some(mut job) = self.repo.get_job(item.job_id).await? else {
            warn!(item_id = %item.id, job_id = %item.job_id, "Queue item has no job, dropping it");
            self.repo.mark_item_done(item.id).await?;
            return Ok(());
        };

        if job.build.state != JobState::Waiting {
            self.fail_orphan(&mut job).await?;
            self.repo.mark_item_done(item.id).await?;
            return Ok(());
        }

        let image = match self.resolver.resolve(job.job_type) {
            Ok(image) => image,
            Err(e) => {
                warn!(job_id = %job.id, job_type = %job.job_type, error = %e, "Cannot resolve build image");
                if job.build.settle(JobState::Failed) {
                    self.repo.save_build(&job.build).await?;
                }
                self.repo.set_captured_logs(job.id, &e.to_string()).await?;
                self.repo.mark_item_done(item.id).await?;
                return Ok(());
            }
        };

        job.build.start(&image)?;
        if !self.repo.save_build(&job.build).await? {
            debug!(job_id = %job.id, "Job settled before admission, skipping");
            return Ok(());
        }

        info!(job_id = %job.id, position = item.position, image = %image, "Admitted job");
        let shared = Arc::new(Mutex::new(job));
        active.insert(item.job_id, shared.clone());
        pipelines.spawn(self.clone().execute(item, shared));
        Ok(())
    }

    /// Build, then upload when the build is done. Always discards the build
    /// output and releases the item.
    async fn execute(self: Arc<Self>, item: QueueItem, shared: SharedJob) {
        let (job, image, cancel) = {
            let job = shared.lock().await;
            let image = job.build.image.clone().unwrap_or_default();
            (job.clone(), image, job.build.cancel_signal())
        };

        let outcome = self.builder.run(&job, &image, &cancel).await;
        if let Err(e) = self.repo.set_captured_logs(job.id, &outcome.logs).await {
            warn!(job_id = %job.id, error = %e, "Failed to store build output");
        }

        let built = {
            let mut current = shared.lock().await;
            let applied = match &outcome.result {
                Ok(result) => current.build.complete(result.clone()),
                Err(_) => current.build.settle(outcome_state(&outcome.result)),
            };
            if !applied {
                debug!(job_id = %job.id, state = %current.build.state, "Build settled elsewhere");
            }
            // A cancel may have settled the build without managing to save it.
            self.persist_build(&current).await;
            match &outcome.result {
                Ok(result) => info!(job_id = %job.id, package = %result.name, version = %result.version, "Build finished"),
                Err(Error::Cancelled) => info!(job_id = %job.id, "Build cancelled"),
                Err(e) => warn!(job_id = %job.id, error = %e, "Build failed"),
            }
            let done = current.build.state == JobState::Done;
            outcome.result.ok().filter(|_| done)
        };

        if let Some(result) = built {
            self.upload(&shared, result).await;
        } else {
            let current = shared.lock().await;
            if current.upload.state != JobState::Waiting {
                self.persist_upload(&current).await;
            }
        }

        if let Err(e) = self.builder.discard_output(&job).await {
            warn!(job_id = %job.id, error = %e, "Failed to remove build output");
        }
        if let Err(e) = self.repo.mark_item_done(item.id).await {
            warn!(item_id = %item.id, error = %e, "Failed to mark queue item done");
        }
        self.active.lock().await.remove(&item.job_id);
        self.wake.notify_one();
    }

    async fn upload(&self, shared: &SharedJob, result: BuildResult) {
        let (upload_type, args, cancel) = {
            let mut job = shared.lock().await;
            if job.upload.start().is_err() {
                debug!(job_id = %job.id, "Upload cancelled before it started");
                self.persist_upload(&job).await;
                return;
            }
            self.persist_upload(&job).await;
            (
                job.upload.upload_type,
                job.args.clone(),
                job.upload.cancel_signal(),
            )
        };

        let outcome = self
            .uploader
            .run(upload_type, &result, &args, &cancel)
            .await;

        let mut job = shared.lock().await;
        job.upload.settle(outcome_state(&outcome));
        self.persist_upload(&job).await;
        match &outcome {
            Ok(()) => info!(job_id = %job.id, upload_type = %upload_type, "Upload finished"),
            Err(Error::Cancelled) => info!(job_id = %job.id, "Upload cancelled"),
            Err(e) => warn!(job_id = %job.id, upload_type = %upload_type, error = %e, "Upload failed"),
        }
    }

    async fn cancel_job(&self, id: RecordId) -> Result<()> {
        let active = self.active.lock().await;
        let owned = active.get(&id).cloned();
        if let Some(shared) = owned {
            drop(active);
            let mut job = shared.lock().await;
            return self.cancel_unfinished(&mut job).await;
        }

        let mut job = self
            .repo
            .get_job(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
        self.cancel_unfinished(&mut job).await?;
        if let Some(item) = self.repo.item_for_job(id).await? {
            if !item.done {
                self.repo.mark_item_done(item.id).await?;
            }
        }
        drop(active);
        self.wake.notify_one();
        Ok(())
    }

    /// Cancel every sub-job that has not reached a terminal state.
    async fn cancel_unfinished(&self, job: &mut Job) -> Result<()> {
        if job.is_finished() {
            debug!(job_id = %job.id, state = %job.state(), "Job already finished, nothing to cancel");
            return Ok(());
        }

        // Both sub-jobs are attempted; the first failed save is reported.
        let mut failure: Option<Error> = None;
        let mut token_sent = false;
        if !job.build.state.is_terminal() {
            token_sent |= job.build.cancel();
            if let Err(e) = self.repo.save_build(&job.build).await {
                failure = failure.or(Some(e.into()));
            }
        }
        if !job.upload.state.is_terminal() {
            token_sent |= job.upload.cancel();
            if let Err(e) = self.repo.save_upload(&job.upload).await {
                failure = failure.or(Some(e.into()));
            }
        }
        match failure {
            Some(e) => {
                warn!(job_id = %job.id, token_sent, error = %e, "Job cancelled, but its state was not saved");
                Err(e)
            }
            None => {
                info!(job_id = %job.id, token_sent, "Job cancelled");
                Ok(())
            }
        }
    }

    async fn recover(&self) -> Result<usize> {
        let active = self.active.lock().await;
        let mut recovered = 0;
        for mut job in self.repo.running_jobs().await? {
            if active.contains_key(&job.id) {
                continue;
            }
            self.fail_orphan(&mut job).await?;
            if let Some(item) = self.repo.item_for_job(job.id).await? {
                if !item.done {
                    self.repo.mark_item_done(item.id).await?;
                }
            }
            recovered += 1;
        }
        if recovered > 0 {
            warn!(count = recovered, "Failed jobs left running by a previous run");
        }
        Ok(recovered)
    }

    /// Fail the unfinished sub-jobs of a job that no task owns.
    async fn fail_orphan(&self, job: &mut Job) -> Result<()> {
        if job.build.state == JobState::Running && job.build.settle(JobState::Failed) {
            self.repo.save_build(&job.build).await?;
        }
        if job.build.state == JobState::Done
            && !job.upload.state.is_terminal()
            && job.upload.settle(JobState::Failed)
        {
            self.repo.save_upload(&job.upload).await?;
        }
        debug!(job_id = %job.id, state = %job.state(), "Settled orphaned job");
        Ok(())
    }

    async fn persist_build(&self, job: &Job) {
        match self.repo.save_build(&job.build).await {
            Ok(true) => {}
            Ok(false) => debug!(job_id = %job.id, state = %job.build.state, "Build state already stored"),
            Err(e) => warn!(job_id = %job.id, error = %e, "Failed to save build state"),
        }
    }

    async fn persist_upload(&self, job: &Job) {
        match self.repo.save_upload(&job.upload).await {
            Ok(true) => {}
            Ok(false) => debug!(job_id = %job.id, state = %job.upload.state, "Upload state already stored"),
            Err(e) => warn!(job_id = %job.id, error = %e, "Failed to save upload state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockExecutor, aur_spec};
    use async_trait::async_trait;
    use remotebuild_core::{BuildJob, UploadJob, UploadType};
    use remotebuild_db::{DbError, DbResult, JobFilter, MemoryJobRepo};
    use remotebuild_executor::ConfigImageResolver;
    use tempfile::TempDir;

    struct Harness {
        queue: JobQueue,
        repo: Arc<dyn JobRepo>,
        executor: Arc<MockExecutor>,
        storage: TempDir,
        work: TempDir,
    }

    fn aur_images() -> HashMap<String, String> {
        HashMap::from([("aur".to_string(), "jojii/buildaur:v1.0".to_string())])
    }

    fn harness_with(
        executor: MockExecutor,
        max_concurrent: usize,
        images: HashMap<String, String>,
    ) -> Harness {
        harness_on(Arc::new(MemoryJobRepo::new()), executor, max_concurrent, images)
    }

    fn harness_on(
        repo: Arc<dyn JobRepo>,
        executor: MockExecutor,
        max_concurrent: usize,
        images: HashMap<String, String>,
    ) -> Harness {
        let work = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();
        let executor = Arc::new(executor);
        let queue = JobQueue::new(
            repo.clone(),
            Arc::new(ConfigImageResolver::new(images)),
            BuildRunner::new(executor.clone(), work.path()),
            UploadRunner::new(storage.path()),
            QueueConfig {
                max_concurrent,
                poll_interval: Duration::from_millis(20),
            },
        );
        Harness {
            queue,
            repo,
            executor,
            storage,
            work,
        }
    }

    fn harness(executor: MockExecutor, max_concurrent: usize) -> Harness {
        harness_with(executor, max_concurrent, aur_images())
    }

    /// Memory repo whose first save of a cancelled build fails.
    struct FlakyCancelRepo {
        inner: MemoryJobRepo,
        armed: AtomicBool,
    }

    impl FlakyCancelRepo {
        fn new() -> Self {
            Self {
                inner: MemoryJobRepo::new(),
                armed: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl JobRepo for FlakyCancelRepo {
        async fn create_job(&self, job: &Job) -> DbResult<QueueItem> {
            self.inner.create_job(job).await
        }

        async fn get_job(&self, id: RecordId) -> DbResult<Option<Job>> {
            self.inner.get_job(id).await
        }

        async fn recent_jobs(&self, limit: usize, filter: JobFilter) -> DbResult<Vec<Job>> {
            self.inner.recent_jobs(limit, filter).await
        }

        async fn running_jobs(&self) -> DbResult<Vec<Job>> {
            self.inner.running_jobs().await
        }

        async fn captured_logs(&self, id: RecordId) -> DbResult<Option<String>> {
            self.inner.captured_logs(id).await
        }

        async fn set_captured_logs(&self, id: RecordId, logs: &str) -> DbResult<()> {
            self.inner.set_captured_logs(id, logs).await
        }

        async fn save_build(&self, build: &BuildJob) -> DbResult<bool> {
            if build.state == JobState::Cancelled && self.armed.swap(false, Ordering::SeqCst) {
                return Err(DbError::Corrupt("connection reset".to_string()));
            }
            self.inner.save_build(build).await
        }

        async fn save_upload(&self, upload: &UploadJob) -> DbResult<bool> {
            self.inner.save_upload(upload).await
        }

        async fn pending_items(&self) -> DbResult<Vec<QueueItem>> {
            self.inner.pending_items().await
        }

        async fn get_item(&self, id: RecordId) -> DbResult<Option<QueueItem>> {
            self.inner.get_item(id).await
        }

        async fn item_for_job(&self, job_id: RecordId) -> DbResult<Option<QueueItem>> {
            self.inner.item_for_job(job_id).await
        }

        async fn mark_item_done(&self, id: RecordId) -> DbResult<()> {
            self.inner.mark_item_done(id).await
        }
    }

    fn work_dir_entries(h: &Harness) -> usize {
        std::fs::read_dir(h.work.path()).unwrap().count()
    }

    async fn submit(h: &Harness, package: &str, upload_type: UploadType) -> Job {
        let job = Job::new(aur_spec(package, upload_type));
        h.queue.enqueue(&job).await.unwrap();
        job
    }

    async fn wait_for(h: &Harness, id: RecordId, done: impl Fn(&Job) -> bool) -> Job {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let job = h.repo.get_job(id).await.unwrap().unwrap();
                if done(&job) {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("job did not reach the expected state")
    }

    async fn wait_finished(h: &Harness, id: RecordId) -> Job {
        wait_for(h, id, Job::is_finished).await
    }

    async fn wait_idle(h: &Harness) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while h.queue.active_jobs().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue did not drain");
    }

    #[tokio::test]
    async fn test_job_runs_build_then_upload() {
        let h = harness(MockExecutor::new(), 1);
        h.queue.start().unwrap();
        let job = submit(&h, "yay", UploadType::LocalStorage).await;

        let finished = wait_finished(&h, job.id).await;
        wait_idle(&h).await;

        assert_eq!(finished.state(), JobState::Done);
        assert_eq!(finished.build.image.as_deref(), Some("jojii/buildaur:v1.0"));
        let result = finished.build.result.unwrap();
        assert_eq!(result.name, "yay");
        assert!(
            h.storage
                .path()
                .join(format!("{}-yay-1.0-1", job.id))
                .join("yay-1.0-1-x86_64.pkg.tar.zst")
                .exists()
        );
        assert!(finished.last_logs.contains("==> Building"));
        assert!(h.repo.item_for_job(job.id).await.unwrap().unwrap().done);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let h = harness(MockExecutor::new().with_delay(Duration::from_millis(150)), 2);
        let mut jobs = Vec::new();
        for package in ["a", "b", "c", "d", "e"] {
            jobs.push(submit(&h, package, UploadType::LocalStorage).await);
        }
        h.queue.start().unwrap();

        let sampler = {
            let executor = h.executor.clone();
            tokio::spawn(async move {
                let mut peak = 0;
                for _ in 0..100 {
                    peak = peak.max(executor.running());
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                peak
            })
        };

        for job in &jobs {
            assert_eq!(wait_finished(&h, job.id).await.state(), JobState::Done);
        }
        assert!(sampler.await.unwrap() <= 2);
        assert_eq!(h.executor.max_running(), 2);
        assert_eq!(h.executor.spawned(), 5);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_admission_follows_position() {
        let h = harness(MockExecutor::new(), 1);
        let mut jobs = Vec::new();
        for package in ["first", "second", "third"] {
            jobs.push(submit(&h, package, UploadType::LocalStorage).await);
        }
        h.queue.start().unwrap();
        for job in &jobs {
            wait_finished(&h, job.id).await;
        }
        assert_eq!(h.executor.packages(), vec!["first", "second", "third"]);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_cancel_waiting_job_never_runs() {
        let h = harness(MockExecutor::new().with_delay(Duration::from_millis(300)), 1);
        let first = submit(&h, "first", UploadType::LocalStorage).await;
        let second = submit(&h, "second", UploadType::LocalStorage).await;
        h.queue.start().unwrap();

        wait_for(&h, first.id, |job| job.build.state == JobState::Running).await;
        h.queue.cancel_job(second.id).await.unwrap();

        let cancelled = h.repo.get_job(second.id).await.unwrap().unwrap();
        assert_eq!(cancelled.build.state, JobState::Cancelled);
        assert_eq!(cancelled.upload.state, JobState::Cancelled);
        assert!(cancelled.build.started_at.is_none());
        assert!(h.repo.item_for_job(second.id).await.unwrap().unwrap().done);

        wait_finished(&h, first.id).await;
        wait_idle(&h).await;
        assert_eq!(h.executor.packages(), vec!["first"]);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_cancel_running_job_delivers_token_once() {
        let h = harness(MockExecutor::new().with_delay(Duration::from_secs(30)), 1);
        h.queue.start().unwrap();
        let job = submit(&h, "yay", UploadType::LocalStorage).await;

        wait_for(&h, job.id, |job| job.build.state == JobState::Running).await;
        h.queue.cancel_job(job.id).await.unwrap();
        h.queue.cancel_job(job.id).await.unwrap();

        let cancelled = wait_finished(&h, job.id).await;
        wait_idle(&h).await;
        h.queue.cancel_job(job.id).await.unwrap();

        assert_eq!(cancelled.build.state, JobState::Cancelled);
        assert_eq!(cancelled.upload.state, JobState::Cancelled);
        assert_eq!(h.executor.cancelled(), 1);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_failed_cancel_save_still_settles_job() {
        let h = harness_on(
            Arc::new(FlakyCancelRepo::new()),
            MockExecutor::new().with_delay(Duration::from_secs(30)),
            1,
            aur_images(),
        );
        h.queue.start().unwrap();
        let job = submit(&h, "yay", UploadType::LocalStorage).await;
        wait_for(&h, job.id, |job| job.build.state == JobState::Running).await;

        assert!(matches!(
            h.queue.cancel_job(job.id).await,
            Err(Error::Internal(_))
        ));
        wait_idle(&h).await;

        let settled = h.repo.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(settled.build.state, JobState::Cancelled);
        assert_eq!(settled.upload.state, JobState::Cancelled);
        assert!(h.repo.item_for_job(job.id).await.unwrap().unwrap().done);
        assert!(h.repo.running_jobs().await.unwrap().is_empty());
        assert_eq!(h.executor.cancelled(), 1);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_build_output_removed_after_jobs_finish() {
        let h = harness(MockExecutor::new(), 2);
        h.queue.start().unwrap();
        let mut jobs = Vec::new();
        for package in ["a", "b", "c"] {
            jobs.push(submit(&h, package, UploadType::LocalStorage).await);
        }
        let failing = harness(MockExecutor::new().failing(), 1);
        failing.queue.start().unwrap();
        let failed = submit(&failing, "broken", UploadType::LocalStorage).await;

        for job in &jobs {
            assert_eq!(wait_finished(&h, job.id).await.state(), JobState::Done);
        }
        wait_finished(&failing, failed.id).await;
        wait_idle(&h).await;
        wait_idle(&failing).await;

        assert_eq!(work_dir_entries(&h), 0);
        assert_eq!(work_dir_entries(&failing), 0);
        assert_eq!(std::fs::read_dir(h.storage.path()).unwrap().count(), 3);
        h.queue.stop();
        failing.queue.stop();
    }

    #[tokio::test]
    async fn test_queue_starts_once() {
        let h = harness(MockExecutor::new(), 1);
        let handle = h.queue.start().unwrap();
        assert!(matches!(h.queue.start(), Err(Error::Internal(_))));

        h.queue.stop();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_build_skips_upload() {
        let h = harness(MockExecutor::new().failing(), 1);
        h.queue.start().unwrap();
        let job = submit(&h, "yay", UploadType::LocalStorage).await;

        let finished = wait_finished(&h, job.id).await;
        wait_idle(&h).await;

        assert_eq!(finished.state(), JobState::Failed);
        assert_eq!(finished.build.state, JobState::Failed);
        assert_eq!(finished.upload.state, JobState::Waiting);
        assert_eq!(std::fs::read_dir(h.storage.path()).unwrap().count(), 0);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_unselected_upload_method_fails_job() {
        let h = harness(MockExecutor::new(), 1);
        h.queue.start().unwrap();
        let job = submit(&h, "yay", UploadType::None).await;

        let finished = wait_finished(&h, job.id).await;
        assert_eq!(finished.build.state, JobState::Done);
        assert_eq!(finished.upload.state, JobState::Failed);
        assert_eq!(finished.state(), JobState::Failed);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_unresolvable_image_fails_without_running() {
        let h = harness_with(MockExecutor::new(), 1, HashMap::new());
        h.queue.start().unwrap();
        let first = submit(&h, "first", UploadType::LocalStorage).await;
        let second = submit(&h, "second", UploadType::LocalStorage).await;

        let first = wait_finished(&h, first.id).await;
        let second = wait_finished(&h, second.id).await;

        assert_eq!(first.build.state, JobState::Failed);
        assert_eq!(second.build.state, JobState::Failed);
        assert!(first.last_logs.contains("no image configured"));
        assert_eq!(h.executor.spawned(), 0);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_spawn_failure_does_not_stop_queue() {
        let h = harness(MockExecutor::new().refusing_spawn(), 1);
        h.queue.start().unwrap();
        let first = submit(&h, "first", UploadType::LocalStorage).await;
        let second = submit(&h, "second", UploadType::LocalStorage).await;

        assert_eq!(wait_finished(&h, first.id).await.state(), JobState::Failed);
        assert_eq!(wait_finished(&h, second.id).await.state(), JobState::Failed);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_is_not_found() {
        let h = harness(MockExecutor::new(), 1);
        let result = h.queue.cancel_job(RecordId::new()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_finished_job_is_noop() {
        let h = harness(MockExecutor::new(), 1);
        h.queue.start().unwrap();
        let job = submit(&h, "yay", UploadType::LocalStorage).await;
        wait_finished(&h, job.id).await;
        wait_idle(&h).await;

        h.queue.cancel_job(job.id).await.unwrap();
        let after = h.repo.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(after.state(), JobState::Done);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_recover_fails_orphaned_jobs() {
        let h = harness(MockExecutor::new(), 1);
        let mut job = submit(&h, "yay", UploadType::LocalStorage).await;
        job.build.start("jojii/buildaur:v1.0").unwrap();
        assert!(h.repo.save_build(&job.build).await.unwrap());

        assert_eq!(h.queue.recover().await.unwrap(), 1);

        let recovered = h.repo.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(recovered.build.state, JobState::Failed);
        assert!(h.repo.item_for_job(job.id).await.unwrap().unwrap().done);
        assert_eq!(h.queue.recover().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stop_lets_running_jobs_finish() {
        let h = harness(MockExecutor::new().with_delay(Duration::from_millis(200)), 1);
        let handle = h.queue.start().unwrap();
        let running = submit(&h, "running", UploadType::LocalStorage).await;
        wait_for(&h, running.id, |job| job.build.state == JobState::Running).await;

        h.queue.stop();
        let queued = submit(&h, "queued", UploadType::LocalStorage).await;
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();

        let running = h.repo.get_job(running.id).await.unwrap().unwrap();
        assert_eq!(running.state(), JobState::Done);
        let queued = h.repo.get_job(queued.id).await.unwrap().unwrap();
        assert_eq!(queued.state(), JobState::Waiting);
    }
}
