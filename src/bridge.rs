//! Messages exchanged with the collaboration layer.
//!
//! The collaboration layer emits a run request for a room and broadcasts the
//! returned [`CodeOutput`] to that room's members. Transport and broadcast
//! are its concern; this module only maps requests to results.

use serde::{Deserialize, Serialize};

use crate::error::SandboxError;
use crate::sandbox::executor::CodeSandbox;
use crate::sandbox::result::{ExecutionResult, ExecutionStatus};

/// A "run code" event from a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub language: String,
    pub code: String,
    pub room_id: String,
}

/// The payload broadcast to a room after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeOutput {
    pub output: String,
    pub is_error: bool,
}

impl From<&ExecutionResult> for CodeOutput {
    /// Successful runs show stdout; anything else shows stderr, or stdout
    /// when stderr is empty.
    fn from(result: &ExecutionResult) -> Self {
        match result.status {
            ExecutionStatus::Success => Self {
                output: result.stdout.clone(),
                is_error: false,
            },
            _ => Self {
                output: if result.stderr.is_empty() {
                    result.stdout.clone()
                } else {
                    result.stderr.clone()
                },
                is_error: true,
            },
        }
    }
}

/// A payload addressed to one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomOutput {
    pub room_id: String,
    pub payload: CodeOutput,
}

impl CodeSandbox {
    /// Run a room's request and build the payload to broadcast back.
    ///
    /// Never fails: every error becomes an `is_error` payload.
    pub async fn handle_run_request(&self, request: RunRequest) -> RoomOutput {
        let payload = match self.execute(&request.language, &request.code).await {
            Ok(result) => CodeOutput::from(&result),
            Err(err @ SandboxError::UnsupportedLanguage(_)) => CodeOutput {
                output: err.to_string(),
                is_error: true,
            },
            Err(err) => CodeOutput {
                output: format!("Execution failed: {}", err),
                is_error: true,
            },
        };

        RoomOutput {
            room_id: request.room_id,
            payload,
        }
    }
}
