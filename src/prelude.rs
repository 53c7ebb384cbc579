//! Prelude module for convenient imports.

pub use crate::bridge::{CodeOutput, RunRequest};
pub use crate::error::{Result, SandboxError};
pub use crate::sandbox::{
    config::{SandboxConfig, Strategy},
    executor::CodeSandbox,
    result::{ExecutionResult, ExecutionStatus},
};
