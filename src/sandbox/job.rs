//! Job identity and lifecycle state.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SandboxError};
use crate::sandbox::language::Language;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Preparing,
    Running,
    Completed,
    Failed,
    TimedOut,
    InfraError,
    Released,
}

impl JobState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Created, Preparing)
                | (Created, Failed)
                | (Created, InfraError)
                | (Preparing, Running)
                | (Preparing, InfraError)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, TimedOut)
                | (Running, InfraError)
                | (Completed, Released)
                | (Failed, Released)
                | (TimedOut, Released)
                | (InfraError, Released)
        )
    }

    /// Whether the job has an outcome.
    pub fn is_outcome(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::TimedOut | JobState::InfraError
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Created => "created",
            JobState::Preparing => "preparing",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
            JobState::InfraError => "infra_error",
            JobState::Released => "released",
        };
        f.write_str(name)
    }
}

/// One request to run a program.
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub language: Language,
    pub source: String,
    pub created_at: Instant,
    pub deadline: Instant,
    state: JobState,
}

impl Job {
    /// Create a job with a fresh id and a deadline `timeout` from now.
    pub fn new(language: Language, source: impl Into<String>, timeout: Duration) -> Self {
        let created_at = Instant::now();
        Self {
            id: Uuid::new_v4(),
            language,
            source: source.into(),
            created_at,
            deadline: created_at + timeout,
            state: JobState::Created,
        }
    }

    /// Current state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Time since the job was created.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SandboxError::Internal(format!(
                "job {}: illegal transition {} -> {}",
                self.id, self.state, next
            )));
        }
        debug!(job_id = %self.id, from = %self.state, to = %next, "job state");
        self.state = next;
        Ok(())
    }
}
