//! Normalized job results.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// stderr text for a job that hit the deadline.
pub const TIMEOUT_MESSAGE: &str = "execution timed out";

/// Terminal status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The program exited with code 0.
    Success,
    /// The build or run step exited non-zero.
    Error,
    /// The supervisor killed the program at the deadline.
    Timeout,
    /// The isolation backend could not serve the job.
    InfraError,
}

/// Information about a job that is not part of its output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    /// The job's unique id.
    pub job_id: Uuid,
    /// Wall-clock time from submission to classification.
    pub duration: Duration,
    /// Exit code reported by the process, if it exited on its own.
    pub exit_code: Option<i32>,
}

/// Result of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Terminal status.
    pub status: ExecutionStatus,
    /// Captured stdout, size-bounded.
    pub stdout: String,
    /// Captured stderr, size-bounded.
    pub stderr: String,
    /// Job metadata.
    pub metadata: ExecutionMetadata,
}

impl ExecutionResult {
    /// Check if the program ran and exited with code 0.
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Check if the job was killed at the deadline.
    pub fn is_timeout(&self) -> bool {
        self.status == ExecutionStatus::Timeout
    }

    /// Check if the backend failed to serve the job.
    pub fn is_infra_error(&self) -> bool {
        self.status == ExecutionStatus::InfraError
    }

    /// The canonical result for a timed-out job. Partial output is discarded.
    pub(crate) fn timed_out(job_id: Uuid, duration: Duration) -> Self {
        Self {
            status: ExecutionStatus::Timeout,
            stdout: String::new(),
            stderr: TIMEOUT_MESSAGE.to_string(),
            metadata: ExecutionMetadata {
                job_id,
                duration,
                exit_code: None,
            },
        }
    }

    pub(crate) fn infra_error(job_id: Uuid, duration: Duration, message: String) -> Self {
        Self {
            status: ExecutionStatus::InfraError,
            stdout: String::new(),
            stderr: message,
            metadata: ExecutionMetadata {
                job_id,
                duration,
                exit_code: None,
            },
        }
    }

    /// Classify a process that exited on its own.
    pub(crate) fn from_raw(job_id: Uuid, duration: Duration, raw: RawOutput) -> Self {
        let status = match raw.exit_code {
            Some(0) => ExecutionStatus::Success,
            _ => ExecutionStatus::Error,
        };
        Self {
            status,
            stdout: raw.stdout,
            stderr: raw.stderr,
            metadata: ExecutionMetadata {
                job_id,
                duration,
                exit_code: raw.exit_code,
            },
        }
    }
}

/// Output of a finished process, before classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
}
