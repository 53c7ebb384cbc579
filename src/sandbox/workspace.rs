//! Job-scoped directories under a shared root.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, SandboxError};

/// A directory owned by exactly one job.
///
/// Creation is exclusive: an existing directory with the same name is an
/// error, never shared.
#[derive(Debug)]
pub struct JobDirectory {
    path: PathBuf,
}

impl JobDirectory {
    /// Create `<root>/<job_id>` and write `source` to `file_name` inside it.
    ///
    /// If writing the source fails, the directory is removed before the
    /// error is returned.
    pub async fn create(root: &Path, job_id: Uuid, file_name: &str, source: &str) -> Result<Self> {
        let path = root.join(job_id.to_string());
        tokio::fs::create_dir(&path)
            .await
            .map_err(|source| SandboxError::ResourceSetup {
                path: path.clone(),
                source,
            })?;

        let dir = Self { path };
        let file = dir.path.join(file_name);
        if let Err(source) = tokio::fs::write(&file, source).await {
            dir.remove().await;
            return Err(SandboxError::ResourceSetup { path: file, source });
        }

        debug!(path = %dir.path.display(), "created job directory");
        Ok(dir)
    }

    /// Get the directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory and its contents. Missing directories are fine.
    pub async fn remove(&self) {
        remove_job_dir(&self.path).await;
    }
}

/// Remove a job directory, tolerating one that is already gone.
pub async fn remove_job_dir(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!(path = %path.display(), "removed job directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove job directory"),
    }
}

/// Ensure the shared job root exists.
pub async fn ensure_root(root: &Path) -> Result<()> {
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|source| SandboxError::ResourceSetup {
            path: root.to_path_buf(),
            source,
        })
}
