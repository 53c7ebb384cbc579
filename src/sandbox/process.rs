//! Spawning and supervising host processes with bounded output capture.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, SandboxError};
use crate::sandbox::io::CapturedOutput;
use crate::sandbox::result::RawOutput;

/// Everything needed to start one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the process's stdin, which is then closed.
    pub stdin: Option<String>,
    pub current_dir: Option<PathBuf>,
}

impl LaunchPlan {
    /// Start a plan for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            current_dir: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Deliver `input` on stdin.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Run in `dir` instead of the caller's working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        // Own process group, so the whole tree can be killed at once.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

/// Kills a process group when dropped.
///
/// Dropping the run future (e.g. when the supervisor aborts it at the
/// deadline) takes the group down with it. The guard signals at most once:
/// after the leader is reaped the pgid may be reused.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    #[cfg(unix)]
    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take().and_then(|p| i32::try_from(p).ok()) {
            // SAFETY: kill(2) has no memory-safety preconditions; a stale
            // group yields ESRCH, which is ignored.
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {
        self.pgid = None;
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        self.pgid.is_some()
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Run `plan` to completion, or kill it at `deadline`.
///
/// Returns [`SandboxError::Timeout`] if the deadline passes first. Any
/// processes the program left behind are killed once it exits.
pub async fn run_plan(plan: &LaunchPlan, deadline: Instant, max_output: usize) -> Result<RawOutput> {
    let started = Instant::now();
    let mut child = plan.command().spawn().map_err(SandboxError::Spawn)?;
    let mut group = ProcessGroupGuard::new(child.id());
    debug!(program = %plan.program, pid = ?child.id(), "spawned process");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SandboxError::Internal("stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| SandboxError::Internal("stderr was not captured".to_string()))?;
    let stdout_task = tokio::spawn(CapturedOutput::drain(stdout, max_output));
    let stderr_task = tokio::spawn(CapturedOutput::drain(stderr, max_output));

    let mut stdin = child.stdin.take();
    let input = plan.stdin.as_deref();
    let exited = tokio::time::timeout_at(deadline, async {
        if let (Some(pipe), Some(input)) = (stdin.as_mut(), input) {
            match pipe.write_all(input.as_bytes()).await {
                Ok(()) => {}
                // The program may exit without reading its input.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(SandboxError::Io(e)),
            }
        }
        drop(stdin.take());
        child.wait().await.map_err(SandboxError::Io)
    })
    .await;

    let status = match exited {
        Ok(status) => status?,
        Err(_) => {
            group.kill();
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(SandboxError::Timeout(started.elapsed()));
        }
    };

    // Leftover background processes would hold the pipes open.
    group.kill();

    let captured = tokio::time::timeout_at(deadline, async {
        let out = join_capture(stdout_task).await?;
        let err = join_capture(stderr_task).await?;
        Ok::<_, SandboxError>((out, err))
    })
    .await
    .map_err(|_| SandboxError::Timeout(started.elapsed()))??;

    Ok(RawOutput {
        stdout: captured.0.into_string(),
        stderr: captured.1.into_string(),
        exit_code: status.code(),
    })
}

async fn join_capture(
    task: tokio::task::JoinHandle<std::io::Result<CapturedOutput>>,
) -> Result<CapturedOutput> {
    task.await
        .map_err(|e| SandboxError::Internal(format!("output reader failed: {}", e)))?
        .map_err(SandboxError::Io)
}

/// Run a short runtime command and return its stdout, failing on non-zero exit.
pub async fn run_checked(plan: &LaunchPlan, timeout: std::time::Duration) -> Result<String> {
    let output = run_plan(plan, Instant::now() + timeout, 64 * 1024).await?;
    match output.exit_code {
        Some(0) => Ok(output.stdout),
        code => Err(SandboxError::runtime(format!(
            "`{} {}` exited with {:?}: {}",
            plan.program,
            plan.args.join(" "),
            code,
            output.stderr.trim()
        ))),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> LaunchPlan {
        LaunchPlan::new("sh").arg("-c").arg(script)
    }

    fn soon(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let out = run_plan(&sh("echo out; echo err >&2"), soon(5), 1024).await.unwrap();
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_stdin_delivery() {
        let plan = LaunchPlan::new("cat").stdin("print('hi')");
        let out = run_plan(&plan, soon(5), 1024).await.unwrap();
        assert_eq!(out.stdout, "print('hi')");
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let out = run_plan(&sh("exit 3"), soon(5), 1024).await.unwrap();
        assert_eq!(out.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_deadline_kills_process() {
        let err = run_plan(&sh("sleep 30"), Instant::now() + Duration::from_millis(200), 1024)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_background_children_do_not_hang_capture() {
        let start = Instant::now();
        let out = run_plan(&sh("sleep 30 & echo done"), soon(10), 1024).await.unwrap();
        assert_eq!(out.stdout, "done\n");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_output_is_bounded() {
        let out = run_plan(&sh("yes | head -c 100000"), soon(5), 16).await.unwrap();
        assert!(out.stdout.ends_with(crate::sandbox::io::TRUNCATION_MARKER));
        assert!(out.stdout.len() < 64);
    }

    #[tokio::test]
    async fn test_group_guard_signals_once() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = sh("sleep 30").command().spawn().unwrap();
        let mut guard = ProcessGroupGuard::new(child.id());
        assert!(guard.is_armed());

        guard.kill();
        assert!(!guard.is_armed());
        let status = child.wait().await.unwrap();
        assert_eq!(status.signal(), Some(libc::SIGKILL));

        // Disarmed: neither a second kill nor drop signals the reaped pgid.
        guard.kill();
        drop(guard);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let plan = LaunchPlan::new("/nonexistent/definitely-not-a-binary");
        let err = run_plan(&plan, soon(5), 1024).await.unwrap_err();
        assert!(matches!(err, SandboxError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_run_checked_reports_failure() {
        let err = run_checked(&sh("echo nope >&2; exit 1"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
