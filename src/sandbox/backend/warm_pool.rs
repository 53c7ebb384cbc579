//! One long-lived container shared by all jobs.
//!
//! Each job gets its own directory under the host job root, which is
//! bind-mounted into the container, and its own unprivileged uid. The job's
//! command runs via `exec` as that uid inside its directory. Release kills
//! every process owned by the uid, so nothing a job started outlives it and
//! the shared container keeps running.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SandboxError};
use crate::sandbox::backend::{ContainerRuntime, IsolatedHandle, IsolationBackend};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::job::Job;
use crate::sandbox::language::ExecutionProfile;
use crate::sandbox::process::run_plan;
use crate::sandbox::result::RawOutput;
use crate::sandbox::workspace::{ensure_root, remove_job_dir, JobDirectory};

/// Mount point of the job root inside the container.
pub const CONTAINER_JOB_ROOT: &str = "/jobs";

/// First uid handed to jobs.
pub const JOB_UID_BASE: u32 = 20_000;

/// Number of uids jobs rotate through. Bounds the number of concurrent jobs.
pub const JOB_UID_SLOTS: u32 = 4_096;

/// Hands a job directory to the job's uid. `$1` is the directory, `$2` the uid.
const PREPARE: &str = r#"chown -R "$2:$2" "$1" && chmod 700 "$1""#;

/// Run as the job's uid. `kill -1` signals every process of the caller's uid
/// except the caller, so this repeats until two rounds in a row find nothing.
const SWEEP: &str = r#"n=0; idle=0; while [ "$idle" -lt 2 ]; do if kill -KILL -1 2>/dev/null; then idle=0; n=$((n+1)); [ "$n" -ge 50 ] && exit 1; else idle=$((idle+1)); fi; sleep 0.02; done; exit 0"#;

/// Removes a job directory from inside the container. `$1` is the directory.
const REMOVE: &str = r#"rm -rf "$1""#;

const SWEEP_ATTEMPTS: u32 = 3;
const SWEEP_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Uids of running jobs.
///
/// Uids are handed out round-robin so a released uid is not reused right
/// away. A uid whose processes could not be swept is never returned.
#[derive(Debug, Default)]
struct JobUsers {
    state: std::sync::Mutex<JobUsersState>,
}

#[derive(Debug, Default)]
struct JobUsersState {
    cursor: u32,
    in_use: HashSet<u32>,
}

impl JobUsers {
    fn acquire(&self) -> Option<u32> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for _ in 0..JOB_UID_SLOTS {
            let uid = JOB_UID_BASE + state.cursor;
            state.cursor = (state.cursor + 1) % JOB_UID_SLOTS;
            if state.in_use.insert(uid) {
                return Some(uid);
            }
        }
        None
    }

    fn release(&self, uid: u32) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_use.remove(&uid);
    }

    fn in_use(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_use.len()
    }
}

/// Runs every job inside one shared, pre-started container.
pub struct WarmPoolBackend {
    config: SandboxConfig,
    runtime: ContainerRuntime,
    users: JobUsers,
    ready: AtomicBool,
    init_lock: Mutex<()>,
}

impl WarmPoolBackend {
    /// Create the backend. Nothing is started until `initialize`.
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            runtime: ContainerRuntime::new(config.runtime.clone()),
            config,
            users: JobUsers::default(),
            ready: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    /// Name of the shared container.
    pub fn instance_name(&self) -> &str {
        &self.config.warm_instance_name
    }

    /// Number of jobs currently holding a uid, including uids withheld
    /// after a failed sweep.
    pub fn active_users(&self) -> usize {
        self.users.in_use()
    }

    fn container_workdir(job_id: Uuid) -> String {
        format!("{}/{}", CONTAINER_JOB_ROOT, job_id)
    }

    async fn start_instance(&self) -> Result<()> {
        let name = self.instance_name();
        let root = self
            .config
            .job_root
            .canonicalize()
            .unwrap_or_else(|_| self.config.job_root.clone());

        if self.config.pull_images {
            self.runtime.ensure_image(&self.config.warm_image).await?;
        }

        // A previous process may have left an instance behind.
        self.runtime.remove(name).await?;

        // --init reaps the orphans that killed jobs leave behind.
        let mut args = vec![
            "--rm".to_string(),
            "--init".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];
        args.extend(ContainerRuntime::limit_args(&self.config));
        args.extend([
            "-v".to_string(),
            format!("{}:{}", root.display(), CONTAINER_JOB_ROOT),
            self.config.warm_image.clone(),
            "sleep".to_string(),
            "infinity".to_string(),
        ]);
        self.runtime.run_detached(args).await?;

        if !self.runtime.is_running(name).await? {
            return Err(SandboxError::runtime(format!("warm instance {} exited after start", name)));
        }
        Ok(())
    }

    async fn prepare(&self, profile: &ExecutionProfile, job: &Job, uid: u32) -> Result<IsolatedHandle> {
        let dir = JobDirectory::create(
            &self.config.job_root,
            job.id,
            profile.source_file_name,
            &job.source,
        )
        .await?;

        let workdir = Self::container_workdir(job.id);
        let owner = uid.to_string();
        if let Err(e) = self
            .runtime
            .exec_checked(self.instance_name(), None, PREPARE, &[workdir.as_str(), owner.as_str()])
            .await
        {
            // chown may have run part way, leaving files the host cannot delete.
            self.remove_in_instance(job.id, &workdir).await;
            dir.remove().await;
            return Err(e);
        }

        let user = format!("{}:{}", uid, uid);
        let home = format!("HOME={}", workdir);
        let launch = self
            .runtime
            .plan()
            .args(["exec", "-w", workdir.as_str(), "-u", user.as_str(), "-e", home.as_str()])
            .arg(self.instance_name())
            .args(["sh", "-c"])
            .arg(profile.command_line());

        Ok(IsolatedHandle::new(job.id, self.instance_name(), launch)
            .with_workdir(dir.path())
            .with_user(uid))
    }

    /// Kill every process owned by `uid`. Returns whether the sweep completed.
    async fn sweep(&self, handle: &IsolatedHandle, uid: u32) -> bool {
        for attempt in 1..=SWEEP_ATTEMPTS {
            match self
                .runtime
                .exec_checked(handle.instance(), Some(uid), SWEEP, &[])
                .await
            {
                Ok(_) => {
                    debug!(job_id = %handle.job_id(), uid, "job processes swept");
                    return true;
                }
                Err(e) => {
                    warn!(job_id = %handle.job_id(), uid, attempt, error = %e, "failed to sweep job processes");
                    tokio::time::sleep(SWEEP_RETRY_DELAY).await;
                }
            }
        }
        false
    }

    async fn remove_in_instance(&self, job_id: Uuid, workdir: &str) {
        if let Err(e) = self
            .runtime
            .exec_checked(self.instance_name(), None, REMOVE, &[workdir])
            .await
        {
            warn!(%job_id, error = %e, "failed to remove job directory in instance");
        }
    }
}

#[async_trait]
impl IsolationBackend for WarmPoolBackend {
    fn name(&self) -> &'static str {
        "warm-pool"
    }

    async fn initialize(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        if self.is_ready() {
            return Ok(());
        }

        ensure_root(&self.config.job_root).await?;
        self.start_instance().await.map_err(|e| {
            SandboxError::InfraUnavailable(format!("failed to start warm instance: {}", e))
        })?;

        self.ready.store(true, Ordering::Release);
        info!(
            instance = %self.instance_name(),
            image = %self.config.warm_image,
            job_root = %self.config.job_root.display(),
            "warm-pool backend ready"
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn allocate(&self, profile: &ExecutionProfile, job: &Job) -> Result<IsolatedHandle> {
        if !self.is_ready() {
            return Err(SandboxError::InfraUnavailable(
                "warm-pool backend is not initialized".to_string(),
            ));
        }

        let uid = self.users.acquire().ok_or_else(|| {
            SandboxError::InfraUnavailable("every job uid is in use".to_string())
        })?;
        match self.prepare(profile, job, uid).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.users.release(uid);
                Err(e)
            }
        }
    }

    async fn run(&self, handle: &IsolatedHandle, deadline: Instant) -> Result<RawOutput> {
        run_plan(handle.launch(), deadline, self.config.max_output_bytes).await
    }

    async fn release(&self, handle: &IsolatedHandle) {
        if !handle.claim_release() {
            return;
        }

        // Killing the exec client leaves the job running in the instance,
        // and a finished job may have left background processes.
        let swept = match handle.user() {
            Some(uid) => self.sweep(handle, uid).await,
            None => true,
        };

        let workdir = Self::container_workdir(handle.job_id());
        self.remove_in_instance(handle.job_id(), &workdir).await;
        if let Some(dir) = handle.workdir() {
            remove_job_dir(dir).await;
        }

        if let Some(uid) = handle.user() {
            if swept {
                self.users.release(uid);
            } else {
                warn!(job_id = %handle.job_id(), uid, "job uid withheld from reuse");
            }
        }
    }

    async fn shutdown(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        self.ready.store(false, Ordering::Release);
        self.runtime.remove(self.instance_name()).await?;
        info!(instance = %self.instance_name(), "warm instance stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::language::Language;

    #[test]
    fn test_job_users_are_unique_and_rotate() {
        let users = JobUsers::default();
        let a = users.acquire().unwrap();
        let b = users.acquire().unwrap();
        assert_eq!(a, JOB_UID_BASE);
        assert_eq!(b, JOB_UID_BASE + 1);

        users.release(a);
        // Round-robin: a released uid is not handed out next.
        assert_eq!(users.acquire().unwrap(), JOB_UID_BASE + 2);
        assert_eq!(users.in_use(), 2);
    }

    #[test]
    fn test_job_users_exhaustion() {
        let users = JobUsers::default();
        for _ in 0..JOB_UID_SLOTS {
            assert!(users.acquire().is_some());
        }
        assert!(users.acquire().is_none());

        users.release(JOB_UID_BASE + 7);
        assert_eq!(users.acquire(), Some(JOB_UID_BASE + 7));
    }

    #[tokio::test]
    async fn test_allocate_requires_initialize() {
        let root = tempfile::tempdir().unwrap();
        let backend = WarmPoolBackend::new(SandboxConfig::builder().job_root(root.path()).build());
        let job = Job::new(Language::Python, "print(1)", Duration::from_secs(1));
        let profile = ExecutionProfile::default_for(Language::Python);

        let err = backend.allocate(&profile, &job).await.unwrap_err();
        assert!(matches!(err, SandboxError::InfraUnavailable(_)));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
        assert_eq!(backend.active_users(), 0);
    }

    #[tokio::test]
    async fn test_failed_prepare_returns_uid_and_directory() {
        let root = tempfile::tempdir().unwrap();
        let config = SandboxConfig::builder()
            .job_root(root.path())
            .runtime("/nonexistent/container-runtime")
            .build();
        let backend = WarmPoolBackend::new(config);
        backend.ready.store(true, Ordering::Release);
        let job = Job::new(Language::Python, "print(1)", Duration::from_secs(1));
        let profile = ExecutionProfile::default_for(Language::Python);

        assert!(backend.allocate(&profile, &job).await.is_err());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
        assert_eq!(backend.active_users(), 0);
    }
}
