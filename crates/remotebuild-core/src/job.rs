//! Job records and their state machine.
//!
//! A [`Job`] aggregates one [`BuildJob`] and one [`UploadJob`]. The scheduler
//! admits jobs through [`QueueItem`]s so reordering never touches the job itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{BuildArgs, BuildSpec, CancelSignal, Error, JobState, JobType, RecordId, Result, UploadType};

/// Artifacts produced by a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub job_id: RecordId,
    pub name: String,
    pub version: String,
    /// Host paths of the produced package files.
    pub files: Vec<PathBuf>,
}

/// One container-based build attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: RecordId,
    pub state: JobState,
    /// Image the build ran in, set on admission.
    pub image: Option<String>,
    pub result: Option<BuildResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    cancel: CancelSignal,
}

impl BuildJob {
    pub fn new() -> Self {
        Self {
            id: RecordId::new(),
            state: JobState::Waiting,
            image: None,
            result: None,
            started_at: None,
            finished_at: None,
            cancel: CancelSignal::new(),
        }
    }

    /// Waiting -> Running with the resolved image.
    pub fn start(&mut self, image: impl Into<String>) -> Result<()> {
        transition(&mut self.state, JobState::Running)?;
        self.image = Some(image.into());
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Done, keeping the result. Ignored once terminal.
    pub fn complete(&mut self, result: BuildResult) -> bool {
        if !self.settle(JobState::Done) {
            return false;
        }
        self.result = Some(result);
        true
    }

    /// Move into a terminal state unless one was already reached.
    pub fn settle(&mut self, outcome: JobState) -> bool {
        if transition(&mut self.state, outcome).is_err() {
            return false;
        }
        self.finished_at = Some(Utc::now());
        true
    }

    /// Send the token if running, then force Cancelled.
    /// Returns whether this call delivered the token.
    pub fn cancel(&mut self) -> bool {
        let sent = self.state == JobState::Running && self.cancel.cancel();
        force_cancelled(&mut self.state, &mut self.finished_at);
        sent
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }
}

impl Default for BuildJob {
    fn default() -> Self {
        Self::new()
    }
}

/// One artifact transfer attempt. The cancellation signal is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: RecordId,
    pub state: JobState,
    pub upload_type: UploadType,
    #[serde(skip)]
    cancel: CancelSignal,
}

impl UploadJob {
    pub fn new(upload_type: UploadType) -> Self {
        Self {
            id: RecordId::new(),
            state: JobState::Waiting,
            upload_type,
            cancel: CancelSignal::new(),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        transition(&mut self.state, JobState::Running)
    }

    pub fn settle(&mut self, outcome: JobState) -> bool {
        transition(&mut self.state, outcome).is_ok()
    }

    /// Send the token if running, then force Cancelled whatever the prior state.
    /// Safe to call repeatedly; only the first call while running sends.
    pub fn cancel(&mut self) -> bool {
        let sent = self.state == JobState::Running && self.cancel.cancel();
        self.state = JobState::Cancelled;
        sent
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }
}

/// Top-level unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: RecordId,
    pub job_type: JobType,
    pub args: BuildArgs,
    pub build: BuildJob,
    pub upload: UploadJob,
    /// Output captured from the most recent build container.
    pub last_logs: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(spec: BuildSpec) -> Self {
        let now = Utc::now();
        Self {
            id: RecordId::new(),
            job_type: spec.job_type,
            args: spec.args,
            build: BuildJob::new(),
            upload: UploadJob::new(spec.upload_type),
            last_logs: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Externally visible state. Done only when both sub-jobs are done; a
    /// finished build whose upload has not started yet still counts as running.
    pub fn state(&self) -> JobState {
        match (self.build.state, self.upload.state) {
            (JobState::Done, JobState::Waiting) => JobState::Running,
            (JobState::Done, upload) => upload,
            (build, _) => build,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }
}

/// Admission record for a job. Positions are unique and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: RecordId,
    pub job_id: RecordId,
    pub position: i64,
    pub done: bool,
    pub created_at: DateTime<Utc>,
}

fn transition(state: &mut JobState, next: JobState) -> Result<()> {
    if !state.can_transition_to(next) {
        return Err(Error::Internal(format!(
            "illegal state transition {} -> {}",
            state, next
        )));
    }
    *state = next;
    Ok(())
}

fn force_cancelled(state: &mut JobState, finished_at: &mut Option<DateTime<Utc>>) {
    if *state != JobState::Cancelled {
        *state = JobState::Cancelled;
        *finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(job_id: RecordId) -> BuildResult {
        BuildResult {
            job_id,
            name: "yay".to_string(),
            version: "12.3.5-1".to_string(),
            files: vec![PathBuf::from("/tmp/yay-12.3.5-1-x86_64.pkg.tar.zst")],
        }
    }

    #[test]
    fn test_waiting_build_cancels_without_running() {
        let mut build = BuildJob::new();
        let signal = build.cancel_signal();
        assert!(!build.cancel());
        assert_eq!(build.state, JobState::Cancelled);
        assert!(!signal.is_cancelled());
        assert!(build.started_at.is_none());
    }

    #[test]
    fn test_running_build_cancel_sends_token() {
        let mut build = BuildJob::new();
        build.start("archlinux:latest").unwrap();
        assert!(build.cancel());
        assert!(build.cancel_signal().is_cancelled());
        assert_eq!(build.state, JobState::Cancelled);
    }

    #[test]
    fn test_completion_after_cancel_is_ignored() {
        let mut build = BuildJob::new();
        build.start("archlinux:latest").unwrap();
        build.cancel();
        assert!(!build.complete(result(RecordId::new())));
        assert_eq!(build.state, JobState::Cancelled);
        assert!(build.result.is_none());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut build = BuildJob::new();
        build.start("img").unwrap();
        assert!(build.start("img").is_err());
    }

    #[test]
    fn test_upload_cancel_is_idempotent() {
        let mut upload = UploadJob::new(UploadType::LocalStorage);
        upload.start().unwrap();
        assert!(upload.cancel());
        assert!(!upload.cancel());
        assert_eq!(upload.state, JobState::Cancelled);
    }

    #[test]
    fn test_upload_cancel_forces_state_from_any_state() {
        let mut upload = UploadJob::new(UploadType::LocalStorage);
        upload.start().unwrap();
        upload.settle(JobState::Failed);
        assert!(!upload.cancel());
        assert_eq!(upload.state, JobState::Cancelled);
    }

    #[test]
    fn test_aggregate_state() {
        let mut job = Job::new(BuildSpec {
            job_type: JobType::Aur,
            upload_type: UploadType::LocalStorage,
            args: BuildArgs::new(),
        });
        assert_eq!(job.state(), JobState::Waiting);

        job.build.start("img").unwrap();
        assert_eq!(job.state(), JobState::Running);

        job.build.complete(result(job.id));
        assert_eq!(job.state(), JobState::Running);

        job.upload.start().unwrap();
        job.upload.settle(JobState::Failed);
        assert_eq!(job.state(), JobState::Failed);
    }

    #[test]
    fn test_aggregate_reflects_failed_build() {
        let mut job = Job::new(BuildSpec {
            job_type: JobType::Aur,
            upload_type: UploadType::DataManager,
            args: BuildArgs::new(),
        });
        job.build.start("img").unwrap();
        job.build.settle(JobState::Failed);
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.upload.state, JobState::Waiting);
    }
}
