//! One fresh container per job, source delivered on stdin.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{Result, SandboxError};
use crate::sandbox::backend::{ContainerRuntime, IsolatedHandle, IsolationBackend};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::job::Job;
use crate::sandbox::language::{ExecutionProfile, LanguageRegistry};
use crate::sandbox::process::run_plan;
use crate::sandbox::result::RawOutput;

/// Working directory inside ephemeral containers.
const CONTAINER_WORKDIR: &str = "/tmp";

/// Starts a disposable, network-less container for every job.
///
/// The container is started with `--rm` and exits with the program; release
/// only has to make sure a killed job's container is gone.
pub struct EphemeralBackend {
    config: SandboxConfig,
    runtime: ContainerRuntime,
    images: Vec<String>,
    ready: AtomicBool,
    init_lock: Mutex<()>,
}

impl EphemeralBackend {
    /// Create the backend for the images in `registry`. Nothing is started
    /// until `initialize`.
    pub fn new(config: SandboxConfig, registry: &LanguageRegistry) -> Self {
        let mut images: Vec<String> = registry.profiles().map(|p| p.image.clone()).collect();
        images.sort();
        images.dedup();

        Self {
            runtime: ContainerRuntime::new(config.runtime.clone()),
            config,
            images,
            ready: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    /// Name of the container serving a job.
    pub fn container_name(job: &Job) -> String {
        format!("sandbox-{}", job.id)
    }

    /// Shell script run inside the container: save stdin, build, run.
    pub fn script(profile: &ExecutionProfile) -> String {
        format!("cat > {} && {}", profile.source_file_name, profile.command_line())
    }
}

#[async_trait]
impl IsolationBackend for EphemeralBackend {
    fn name(&self) -> &'static str {
        "ephemeral"
    }

    async fn initialize(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        if self.is_ready() {
            return Ok(());
        }

        let version = self.runtime.version().await.map_err(|e| {
            SandboxError::InfraUnavailable(format!("{} is not reachable: {}", self.runtime.binary(), e))
        })?;

        if self.config.pull_images {
            for image in &self.images {
                self.runtime.ensure_image(image).await?;
            }
        }

        self.ready.store(true, Ordering::Release);
        info!(runtime = %self.runtime.binary(), %version, "ephemeral backend ready");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn allocate(&self, profile: &ExecutionProfile, job: &Job) -> Result<IsolatedHandle> {
        if !self.is_ready() {
            return Err(SandboxError::InfraUnavailable(
                "ephemeral backend is not initialized".to_string(),
            ));
        }

        let name = Self::container_name(job);
        let launch = self
            .runtime
            .plan()
            .args(["run", "--rm", "-i", "--name", name.as_str()])
            .args(ContainerRuntime::limit_args(&self.config))
            .args(["-w", CONTAINER_WORKDIR])
            .arg(profile.image.as_str())
            .args(["sh", "-c"])
            .arg(Self::script(profile))
            .stdin(job.source.as_str());

        Ok(IsolatedHandle::new(job.id, name, launch))
    }

    async fn run(&self, handle: &IsolatedHandle, deadline: Instant) -> Result<RawOutput> {
        run_plan(handle.launch(), deadline, self.config.max_output_bytes).await
    }

    async fn release(&self, handle: &IsolatedHandle) {
        if !handle.claim_release() {
            return;
        }
        // Killing the CLI client does not stop the container; removal does.
        if let Err(e) = self.runtime.remove(handle.instance()).await {
            warn!(job_id = %handle.job_id(), container = %handle.instance(), error = %e, "failed to remove container");
        }
    }
}
