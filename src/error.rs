//! Error types for the code sandbox.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while preparing or supervising a job.
///
/// Program-level failures (non-zero exit, timeout) are not errors: they are
/// reported through [`ExecutionStatus`](crate::ExecutionStatus) on the result.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The requested language is not in the registry.
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The isolation backend is not initialized or cannot be reached.
    #[error("isolation backend unavailable: {0}")]
    InfraUnavailable(String),

    /// The process outlived its deadline and was killed.
    #[error("execution timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Creating a job directory or writing the source file failed.
    #[error("failed to prepare {}: {source}", path.display())]
    ResourceSetup {
        /// The path that could not be created or written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A container runtime command failed.
    #[error("container runtime error: {0}")]
    Runtime(#[source] anyhow::Error),

    /// Spawning a process failed.
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    /// I/O error during execution.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The supervisor's own bookkeeping failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SandboxError {
    /// Check if this error represents an unsupported language.
    pub fn is_unsupported_language(&self) -> bool {
        matches!(self, SandboxError::UnsupportedLanguage(_))
    }

    /// Check if this error represents a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout(_))
    }

    /// Check if this error means the isolation backend cannot serve jobs.
    pub fn is_infra_unavailable(&self) -> bool {
        matches!(
            self,
            SandboxError::InfraUnavailable(_) | SandboxError::Runtime(_) | SandboxError::Spawn(_)
        )
    }

    /// Check if this error came from job resource preparation.
    pub fn is_resource_setup(&self) -> bool {
        matches!(self, SandboxError::ResourceSetup { .. })
    }

    /// Wrap an arbitrary runtime failure with a message.
    pub(crate) fn runtime(message: impl std::fmt::Display) -> Self {
        SandboxError::Runtime(anyhow::anyhow!("{}", message))
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
