//! Lifecycle states shared by Job, BuildJob and UploadJob.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State of a sub-job.
///
/// Allowed transitions:
///
/// ```text
/// Waiting -> Running -> Done | Failed | Cancelled
/// Waiting -> Cancelled | Failed
/// ```
///
/// Terminal states never move again, which is what lets the scheduler re-read
/// records instead of locking them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Running,
        JobState::Done,
        JobState::Failed,
        JobState::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Waiting, JobState::Running) => true,
            // Failing before admission covers a missing container image.
            (JobState::Waiting, JobState::Failed | JobState::Cancelled) => true,
            (JobState::Running, JobState::Done | JobState::Failed | JobState::Cancelled) => true,
            _ => false,
        }
    }

    /// States from which `next` may be entered.
    pub fn predecessors(next: JobState) -> Vec<JobState> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| crate::Error::Internal(format!("unknown job state: {}", s)))
    }
}
