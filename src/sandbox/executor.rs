//! Job lifecycle supervisor.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{Result, SandboxError};
use crate::sandbox::backend::{self, IsolatedHandle, IsolationBackend};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::job::{Job, JobState};
use crate::sandbox::language::{ExecutionProfile, LanguageRegistry};
use crate::sandbox::result::{ExecutionResult, RawOutput};

/// Runs untrusted programs through an isolation backend.
///
/// Construction has no side effects. Call [`initialize`](Self::initialize)
/// before submitting jobs; until it succeeds every job resolves to an
/// `infra_error` result.
pub struct CodeSandbox {
    config: SandboxConfig,
    registry: LanguageRegistry,
    backend: Arc<dyn IsolationBackend>,
}

impl CodeSandbox {
    /// Create a sandbox using the backend selected by `config.strategy`.
    pub fn new(config: SandboxConfig) -> Self {
        let registry = LanguageRegistry::with_images(&config.images);
        let backend = backend::from_config(&config, &registry);
        Self {
            config,
            registry,
            backend,
        }
    }

    /// Create a sandbox around an explicit backend.
    pub fn with_backend(config: SandboxConfig, backend: Arc<dyn IsolationBackend>) -> Self {
        let registry = LanguageRegistry::with_images(&config.images);
        Self {
            config,
            registry,
            backend,
        }
    }

    /// Configuration this sandbox was built with.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Languages this sandbox accepts.
    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Prepare the backend. Must complete before jobs are accepted.
    pub async fn initialize(&self) -> Result<()> {
        self.config.validate()?;
        self.backend.initialize().await
    }

    /// Whether the backend is ready to take jobs.
    pub fn is_ready(&self) -> bool {
        self.backend.is_ready()
    }

    /// Release resources shared between jobs.
    pub async fn shutdown(&self) -> Result<()> {
        self.backend.shutdown().await
    }

    /// Run `source` as a `language_id` program.
    ///
    /// Returns `Err` only for an unsupported language (before anything is
    /// allocated) or a fault in the supervisor's own bookkeeping. Program
    /// failures, timeouts and backend failures are reported in the result.
    pub async fn execute(&self, language_id: &str, source: &str) -> Result<ExecutionResult> {
        let profile = self.registry.resolve(language_id)?;
        let job = Job::new(profile.language, source, self.config.timeout);
        info!(
            job_id = %job.id,
            language = %job.language,
            strategy = self.backend.name(),
            "job submitted"
        );

        let result = self.supervise(job, profile).await?;
        info!(
            job_id = %result.metadata.job_id,
            status = ?result.status,
            duration_ms = result.metadata.duration.as_millis() as u64,
            "job finished"
        );
        Ok(result)
    }

    async fn supervise(&self, mut job: Job, profile: &ExecutionProfile) -> Result<ExecutionResult> {
        if !self.backend.is_ready() {
            let err = SandboxError::InfraUnavailable(format!(
                "{} backend is not initialized",
                self.backend.name()
            ));
            return Self::reject(job, err);
        }

        job.transition(JobState::Preparing)?;
        let handle = match self.backend.allocate(profile, &job).await {
            Ok(handle) => handle,
            Err(e) => return Self::reject(job, e),
        };
        let lease = HandleLease::new(Arc::clone(&self.backend), handle);

        job.transition(JobState::Running)?;
        let outcome = self.run_until_deadline(&job, lease.handle()).await;

        let (state, result) = match outcome {
            RunOutcome::Exited(raw) => {
                let result = ExecutionResult::from_raw(job.id, job.elapsed(), raw);
                let state = if result.is_success() {
                    JobState::Completed
                } else {
                    JobState::Failed
                };
                (state, result)
            }
            RunOutcome::TimedOut => {
                warn!(job_id = %job.id, timeout = ?self.config.timeout, "job timed out");
                (JobState::TimedOut, ExecutionResult::timed_out(job.id, job.elapsed()))
            }
            RunOutcome::Failed(e) => {
                warn!(job_id = %job.id, error = %e, "job could not run");
                (
                    JobState::InfraError,
                    ExecutionResult::infra_error(job.id, job.elapsed(), e.to_string()),
                )
            }
        };
        job.transition(state)?;

        lease.release().await;
        job.transition(JobState::Released)?;
        Ok(result)
    }

    /// Race the backend against the supervisor's own timer.
    ///
    /// The timer wins ties, so a completion arriving after the deadline is
    /// never reported.
    async fn run_until_deadline(&self, job: &Job, handle: Arc<IsolatedHandle>) -> RunOutcome {
        let backend = Arc::clone(&self.backend);
        let deadline = job.deadline;
        let mut task = AbortOnDrop(tokio::spawn(async move { backend.run(&handle, deadline).await }));

        tokio::select! {
            biased;
            _ = tokio::time::sleep_until(deadline) => {
                task.0.abort();
                // Wait for the aborted run to drop, which kills its processes.
                let _ = (&mut task.0).await;
                RunOutcome::TimedOut
            }
            joined = &mut task.0 => match joined {
                Ok(Ok(raw)) => RunOutcome::Exited(raw),
                Ok(Err(e)) if e.is_timeout() => RunOutcome::TimedOut,
                Ok(Err(e)) => RunOutcome::Failed(e),
                Err(e) => RunOutcome::Failed(SandboxError::Internal(format!("run task failed: {}", e))),
            }
        }
    }

    /// Resolve a job that never ran.
    fn reject(mut job: Job, err: SandboxError) -> Result<ExecutionResult> {
        warn!(job_id = %job.id, error = %err, "job rejected");
        job.transition(JobState::InfraError)?;
        job.transition(JobState::Released)?;
        Ok(ExecutionResult::infra_error(job.id, job.elapsed(), err.to_string()))
    }
}

/// Aborts the run task if the supervising future is dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum RunOutcome {
    Exited(RawOutput),
    TimedOut,
    Failed(SandboxError),
}

/// Scoped ownership of an [`IsolatedHandle`].
///
/// [`release`](Self::release) runs backend cleanup on a spawned task, so it
/// completes even if the caller stops waiting. A lease dropped without
/// being released schedules the same cleanup from `Drop`.
struct HandleLease {
    backend: Arc<dyn IsolationBackend>,
    handle: Arc<IsolatedHandle>,
    armed: bool,
}

impl HandleLease {
    fn new(backend: Arc<dyn IsolationBackend>, handle: IsolatedHandle) -> Self {
        Self {
            backend,
            handle: Arc::new(handle),
            armed: true,
        }
    }

    fn handle(&self) -> Arc<IsolatedHandle> {
        Arc::clone(&self.handle)
    }

    fn spawn_release(&self) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        let handle = Arc::clone(&self.handle);
        tokio::spawn(async move { backend.release(&handle).await })
    }

    async fn release(mut self) {
        self.armed = false;
        if let Err(e) = self.spawn_release().await {
            warn!(job_id = %self.handle.job_id(), error = %e, "release task failed");
        }
    }
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            drop(self.spawn_release());
        } else {
            warn!(job_id = %self.handle.job_id(), "no runtime to release job resources");
        }
    }
}
