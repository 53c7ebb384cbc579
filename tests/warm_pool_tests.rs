//! Warm-pool process cleanup against a stand-in container runtime.
//!
//! `fixtures/fake_runtime.sh` plays the runtime CLI on the host. Jobs it
//! starts are detached from the exec client, as they are inside a real
//! instance, so only the backend's release can stop them.

#![cfg(target_os = "linux")]

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use container_code_sandbox_rs::{
    ExecutionProfile, IsolationBackend, Job, Language, SandboxConfig, WarmPoolBackend,
};
use uuid::Uuid;

const FAKE_RUNTIME: &str = include_str!("fixtures/fake_runtime.sh");

/// Path of the runtime script.
///
/// Written once and before any test spawns a process: a child that inherits
/// the open file would make executing it fail with ETXTBSY.
fn fake_runtime() -> &'static Path {
    static RUNTIME: OnceLock<PathBuf> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("fake-runtime-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime");
        std::fs::write(&path, FAKE_RUNTIME).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    })
}

/// Runs the source itself as a shell script.
fn shell_profile() -> ExecutionProfile {
    ExecutionProfile {
        language: Language::Python,
        image: "unused".to_string(),
        source_file_name: "main.sh",
        build_command: None,
        run_command: "sh main.sh",
    }
}

async fn ready_backend(root: &Path) -> WarmPoolBackend {
    let config = SandboxConfig::builder()
        .runtime(fake_runtime().to_string_lossy())
        .job_root(root)
        .warm_instance_name(format!("warm-{}", Uuid::new_v4()))
        .build();
    let backend = WarmPoolBackend::new(config);
    backend.initialize().await.unwrap();
    backend
}

fn dir_entries(root: &Path) -> usize {
    std::fs::read_dir(root).unwrap().count()
}

fn read_pid(path: &Path) -> u32 {
    std::fs::read_to_string(path).unwrap().trim().parse().unwrap()
}

/// Alive means present in the process table and not a zombie.
fn is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .map(|state| state != "Z")
            .unwrap_or(false),
        Err(_) => false,
    }
}

async fn wait_until_dead(pid: u32) -> bool {
    for _ in 0..50 {
        if !is_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_timed_out_job_is_killed_on_release() {
    fake_runtime();
    let root = tempfile::tempdir().unwrap();
    let pids = tempfile::tempdir().unwrap();
    let pid_file = pids.path().join("child.pid");
    let backend = ready_backend(root.path()).await;

    let source = format!("sleep 60 & echo $! > {}; wait", pid_file.display());
    let job = Job::new(Language::Python, source, Duration::from_millis(500));
    let handle = backend.allocate(&shell_profile(), &job).await.unwrap();

    let err = backend.run(&handle, job.deadline).await.unwrap_err();
    assert!(err.is_timeout());

    // Killing the exec client does not reach into the instance.
    let pid = read_pid(&pid_file);
    assert!(is_alive(pid));

    backend.release(&handle).await;
    assert!(wait_until_dead(pid).await, "job process {} survived release", pid);
    assert_eq!(dir_entries(root.path()), 0);
    assert_eq!(backend.active_users(), 0);

    // Idempotent.
    backend.release(&handle).await;
    assert_eq!(backend.active_users(), 0);
}

#[tokio::test]
async fn test_job_that_empties_its_directory_is_still_killed() {
    fake_runtime();
    let root = tempfile::tempdir().unwrap();
    let pids = tempfile::tempdir().unwrap();
    let pid_file = pids.path().join("child.pid");
    let backend = ready_backend(root.path()).await;

    let source = format!(
        "rm -rf ./* ./.[!.]*; sleep 60 & echo $! > {}; wait",
        pid_file.display()
    );
    let job = Job::new(Language::Python, source, Duration::from_millis(500));
    let handle = backend.allocate(&shell_profile(), &job).await.unwrap();

    assert!(backend.run(&handle, job.deadline).await.unwrap_err().is_timeout());
    let pid = read_pid(&pid_file);

    backend.release(&handle).await;
    assert!(wait_until_dead(pid).await, "job process {} survived release", pid);
    assert_eq!(dir_entries(root.path()), 0);
}

#[tokio::test]
async fn test_background_child_of_finished_job_is_killed() {
    fake_runtime();
    let root = tempfile::tempdir().unwrap();
    let pids = tempfile::tempdir().unwrap();
    let pid_file = pids.path().join("child.pid");
    let backend = ready_backend(root.path()).await;

    let source = format!(
        "sleep 60 >/dev/null 2>&1 & echo $! > {}; echo done",
        pid_file.display()
    );
    let job = Job::new(Language::Python, source, Duration::from_secs(10));
    let handle = backend.allocate(&shell_profile(), &job).await.unwrap();

    let output = backend.run(&handle, job.deadline).await.unwrap();
    assert_eq!(output.stdout, "done\n");
    assert_eq!(output.exit_code, Some(0));

    let pid = read_pid(&pid_file);
    assert!(is_alive(pid));

    backend.release(&handle).await;
    assert!(wait_until_dead(pid).await, "background process {} survived release", pid);
    assert_eq!(dir_entries(root.path()), 0);
    assert_eq!(backend.active_users(), 0);
}

#[tokio::test]
async fn test_release_only_touches_its_own_job() {
    fake_runtime();
    let root = tempfile::tempdir().unwrap();
    let pids = tempfile::tempdir().unwrap();
    let backend = ready_backend(root.path()).await;

    let mut jobs = Vec::new();
    for name in ["first", "second"] {
        let pid_file = pids.path().join(name);
        let source = format!(
            "sleep 60 >/dev/null 2>&1 & echo $! > {}; echo {}",
            pid_file.display(),
            name
        );
        let job = Job::new(Language::Python, source, Duration::from_secs(10));
        let handle = backend.allocate(&shell_profile(), &job).await.unwrap();
        let output = backend.run(&handle, job.deadline).await.unwrap();
        assert_eq!(output.stdout, format!("{}\n", name));
        jobs.push((handle, read_pid(&pid_file)));
    }
    assert_ne!(jobs[0].0.user(), jobs[1].0.user());

    backend.release(&jobs[0].0).await;
    assert!(wait_until_dead(jobs[0].1).await);
    assert!(is_alive(jobs[1].1), "releasing one job killed another");
    assert_eq!(backend.active_users(), 1);

    backend.release(&jobs[1].0).await;
    assert!(wait_until_dead(jobs[1].1).await);
    assert_eq!(dir_entries(root.path()), 0);
}
