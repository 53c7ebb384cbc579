//! # Container Code Sandbox
//!
//! Runs untrusted source code in Python, JavaScript, C++ or Java inside
//! resource-bounded containers and returns the captured output within a
//! fixed time limit.
//!
//! Every job is isolated by a container runtime (Docker or a compatible
//! CLI) with:
//!
//! - **No network**: containers start with `--network none`
//! - **Memory, CPU and process caps**: configurable, applied per container
//! - **Hard timeout**: the supervisor kills the job at its deadline
//! - **Bounded output**: stdout and stderr are capped per stream
//! - **Guaranteed cleanup**: containers, processes and job directories are
//!   released on every outcome
//!
//! ## Example
//!
//! ```rust,ignore
//! use container_code_sandbox_rs::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SandboxConfig::builder()
//!         .timeout(Duration::from_secs(10))
//!         .memory_limit("128m")
//!         .build();
//!
//!     let sandbox = CodeSandbox::new(config);
//!     sandbox.initialize().await?;
//!
//!     let result = sandbox.execute("javascript", "console.log('hi')").await?;
//!     assert_eq!(result.stdout, "hi\n");
//!     assert!(result.is_success());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Strategies
//!
//! 1. **Ephemeral** (default): a fresh `--rm` container per job, source on stdin
//! 2. **Warm pool**: one long-lived container, source written to a per-job
//!    directory mounted into it, command run with `exec`

pub mod bridge;
pub mod error;
pub mod prelude;
pub mod sandbox;

// Re-export main types at crate root for convenience
pub use bridge::{CodeOutput, RoomOutput, RunRequest};
pub use error::{Result, SandboxError};
pub use sandbox::backend::{
    EphemeralBackend, IsolatedHandle, IsolationBackend, WarmPoolBackend,
};
pub use sandbox::config::{SandboxConfig, SandboxConfigBuilder, Strategy};
pub use sandbox::executor::CodeSandbox;
pub use sandbox::job::{Job, JobState};
pub use sandbox::language::{ExecutionProfile, Language, LanguageRegistry};
pub use sandbox::result::{ExecutionMetadata, ExecutionResult, ExecutionStatus, RawOutput};
