//! Isolation backends.
//!
//! A backend turns a resolved [`ExecutionProfile`] and a [`Job`] into a
//! running, isolated process. The supervisor only talks to the
//! [`IsolationBackend`] trait, so strategies are interchangeable.

pub mod ephemeral;
pub mod runtime;
pub mod warm_pool;

pub use ephemeral::EphemeralBackend;
pub use runtime::ContainerRuntime;
pub use warm_pool::WarmPoolBackend;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::Result;
use crate::sandbox::config::{SandboxConfig, Strategy};
use crate::sandbox::job::Job;
use crate::sandbox::language::{ExecutionProfile, LanguageRegistry};
use crate::sandbox::process::LaunchPlan;
use crate::sandbox::result::RawOutput;

/// Handle to one job's isolated execution.
///
/// Owned by the supervisor for the job's lifetime.
#[derive(Debug)]
pub struct IsolatedHandle {
    job_id: Uuid,
    instance: String,
    launch: LaunchPlan,
    workdir: Option<PathBuf>,
    user: Option<u32>,
    released: AtomicBool,
}

impl IsolatedHandle {
    /// Create a handle for `job_id` running `launch` in `instance`.
    pub fn new(job_id: Uuid, instance: impl Into<String>, launch: LaunchPlan) -> Self {
        Self {
            job_id,
            instance: instance.into(),
            launch,
            workdir: None,
            user: None,
            released: AtomicBool::new(false),
        }
    }

    /// Attach the job-scoped directory on the host.
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Attach the unprivileged uid the job runs as inside a shared instance.
    pub fn with_user(mut self, uid: u32) -> Self {
        self.user = Some(uid);
        self
    }

    /// Id of the job this handle serves.
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Container (or instance) the job runs in.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// The process the backend starts for this job.
    pub fn launch(&self) -> &LaunchPlan {
        &self.launch
    }

    /// Host directory holding the job's files, if the backend made one.
    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    /// Uid owning every process of the job, if the backend assigned one.
    pub fn user(&self) -> Option<u32> {
        self.user
    }

    /// Claim the right to release. Returns `true` exactly once.
    pub fn claim_release(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    /// Whether release has been claimed.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

/// Runs jobs inside an isolated environment.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Prepare the backend. Jobs are rejected until this succeeds.
    async fn initialize(&self) -> Result<()>;

    /// Whether [`initialize`](Self::initialize) has completed.
    fn is_ready(&self) -> bool;

    /// Prepare isolated resources for a job.
    ///
    /// On error, anything created so far has already been cleaned up.
    async fn allocate(&self, profile: &ExecutionProfile, job: &Job) -> Result<IsolatedHandle>;

    /// Run the job to completion, killing it if `deadline` passes.
    async fn run(&self, handle: &IsolatedHandle, deadline: Instant) -> Result<RawOutput>;

    /// Tear down the job's resources. Idempotent and safe after partial failure.
    async fn release(&self, handle: &IsolatedHandle);

    /// Tear down resources shared between jobs.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the backend selected by `config.strategy`.
pub fn from_config(config: &SandboxConfig, registry: &LanguageRegistry) -> Arc<dyn IsolationBackend> {
    match config.strategy {
        Strategy::Ephemeral => Arc::new(EphemeralBackend::new(config.clone(), registry)),
        Strategy::WarmPool => Arc::new(WarmPoolBackend::new(config.clone())),
    }
}
