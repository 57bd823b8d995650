//! Build workspace
//!
//! One ephemeral directory per project under the scratch root, held under
//! an exclusive advisory lock for the whole build and deleted when the
//! guard drops, whichever way the build ends.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio::sync::OwnedMutexGuard;

use crate::error::WorkspaceError;
use crate::infra::filesystem;

/// Exclusive, self-cleaning build directory
#[derive(Debug)]
pub struct BuildWorkspace {
    path: PathBuf,
    lock_path: PathBuf,
    _lock: File,
    _local: OwnedMutexGuard<()>,
}

impl BuildWorkspace {
    /// Lock and create the workspace for a project.
    ///
    /// Blocks (on a blocking thread) while another build of the same project
    /// holds the lock. A directory left behind by a crashed build is wiped.
    pub async fn acquire(
        scratch_root: &Path,
        project: &str,
        project_dir: &Path,
    ) -> Result<Self, WorkspaceError> {
        let name = format!("{project}-{}", workspace_id(project_dir));
        let path = scratch_root.join(&name);
        let lock_path = scratch_root.join(format!("{name}.lock"));

        filesystem::create_dir_all(scratch_root)?;

        let local = local_lock(&lock_path).lock_owned().await;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| WorkspaceError::LockFailed {
                path: lock_path.clone(),
                error: e.to_string(),
            })?;

        tracing::debug!(lock = %lock_path.display(), "waiting for workspace lock");
        let file = tokio::task::spawn_blocking(move || lock_exclusive(&file).map(|()| file))
            .await
            .map_err(|e| WorkspaceError::LockFailed {
                path: lock_path.clone(),
                error: e.to_string(),
            })?
            .map_err(|e| WorkspaceError::LockFailed {
                path: lock_path.clone(),
                error: e.to_string(),
            })?;

        if path.exists() {
            tracing::info!(path = %path.display(), "removing stale workspace");
            filesystem::remove_path(&path)?;
        }
        filesystem::create_dir_all(&path)?;
        tracing::debug!(path = %path.display(), "workspace ready");

        Ok(Self {
            path,
            lock_path,
            _lock: file,
            _local: local,
        })
    }

    /// Workspace root
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock file guarding this workspace
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for BuildWorkspace {
    fn drop(&mut self) {
        // Runs before the lock field is released
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove workspace");
            }
        } else {
            tracing::debug!(path = %self.path.display(), "workspace removed");
        }
    }
}

/// Stable identifier for a project location
pub fn workspace_id(project_dir: &Path) -> String {
    let canonical = project_dir
        .canonicalize()
        .unwrap_or_else(|_| project_dir.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    hex::encode(&digest[..6])
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    use rustix::fs::{flock, FlockOperation};
    use std::os::unix::io::AsFd;

    flock(file.as_fd(), FlockOperation::LockExclusive)
        .map_err(|e| std::io::Error::from_raw_os_error(e.raw_os_error()))
}

/// In-process guard for a lock file.
///
/// The advisory lock covers other processes; this one covers concurrent
/// builds inside the same process, including where no advisory lock exists.
fn local_lock(lock_path: &Path) -> Arc<tokio::sync::Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> = OnceLock::new();
    let mut locks = LOCKS
        .get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(lock_path.to_path_buf()).or_default())
}

// Without flock, builds of one project are serialized only within a process
#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> std::io::Result<()> {
    Ok(())
}
