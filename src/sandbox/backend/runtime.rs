//! Thin wrapper over a Docker-compatible container runtime CLI.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, SandboxError};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::process::{run_checked, LaunchPlan};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const PULL_TIMEOUT: Duration = Duration::from_secs(600);

/// A container runtime binary such as `docker` or `podman`.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    binary: String,
}

impl ContainerRuntime {
    /// Wrap the runtime binary at `binary` (a name on `PATH` or a path).
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// The runtime binary.
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// A launch plan invoking the runtime binary.
    pub fn plan(&self) -> LaunchPlan {
        LaunchPlan::new(&self.binary)
    }

    /// Isolation flags shared by every container the sandbox starts.
    pub fn limit_args(config: &SandboxConfig) -> Vec<String> {
        vec![
            "--network".to_string(),
            "none".to_string(),
            "--memory".to_string(),
            config.memory_limit.clone(),
            "--cpus".to_string(),
            config.cpus.to_string(),
            "--pids-limit".to_string(),
            config.pids_limit.to_string(),
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
        ]
    }

    /// Check the runtime daemon answers. Returns the server version.
    pub async fn version(&self) -> Result<String> {
        let plan = self.plan().args(["version", "--format", "{{.Server.Version}}"]);
        let version = run_checked(&plan, COMMAND_TIMEOUT).await?;
        Ok(version.trim().to_string())
    }

    /// Pull `image` unless it is already present locally.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        let inspect = self.plan().args(["image", "inspect", image]);
        if run_checked(&inspect, COMMAND_TIMEOUT).await.is_ok() {
            debug!(image, "image already present");
            return Ok(());
        }

        info!(image, "pulling container image");
        run_checked(&self.plan().args(["pull", image]), PULL_TIMEOUT).await?;
        Ok(())
    }

    /// Force-remove a container. A container that no longer exists is not an error.
    pub async fn remove(&self, name: &str) -> Result<()> {
        match run_checked(&self.plan().args(["rm", "-f", name]), COMMAND_TIMEOUT).await {
            Ok(_) => Ok(()),
            Err(SandboxError::Runtime(e)) if is_missing_container(&e.to_string()) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Whether the named container is running.
    pub async fn is_running(&self, name: &str) -> Result<bool> {
        let plan = self
            .plan()
            .args(["inspect", "--format", "{{.State.Running}}", name]);
        match run_checked(&plan, COMMAND_TIMEOUT).await {
            Ok(out) => Ok(out.trim() == "true"),
            Err(SandboxError::Runtime(e)) if is_missing_container(&e.to_string()) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Run a shell script in a running container and wait for it.
    ///
    /// Runs as `user` (a numeric uid) when given, otherwise as the
    /// container's default user. `args` become the script's `$1`, `$2`...
    pub async fn exec_checked(
        &self,
        name: &str,
        user: Option<u32>,
        script: &str,
        args: &[&str],
    ) -> Result<String> {
        let mut plan = self.plan().arg("exec");
        if let Some(uid) = user {
            plan = plan.arg("-u").arg(format!("{}:{}", uid, uid));
        }
        let plan = plan
            .args([name, "sh", "-c", script, "sh"])
            .args(args.iter().copied());
        run_checked(&plan, COMMAND_TIMEOUT).await
    }

    /// Start a detached container.
    pub async fn run_detached(&self, args: Vec<String>) -> Result<String> {
        let plan = self.plan().args(["run", "-d"]).args(args);
        let id = run_checked(&plan, PULL_TIMEOUT).await?;
        Ok(id.trim().to_string())
    }
}

fn is_missing_container(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("no such container") || message.contains("no such object")
}
