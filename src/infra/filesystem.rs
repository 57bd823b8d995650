//! Filesystem operations
//!
//! Handles file and directory operations: recursive copies, sizes, and
//! publishing a tree into place with a single rename.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::FilesystemError;

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), FilesystemError> {
    std::fs::create_dir_all(path).map_err(|e| FilesystemError::CreateDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Remove a file or a directory and all its contents
pub fn remove_path(path: &Path) -> Result<(), FilesystemError> {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return Ok(());
    };
    let result = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    result.map_err(|e| FilesystemError::RemoveDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Write content to a file
pub fn write_file(path: &Path, content: &[u8]) -> Result<(), FilesystemError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    std::fs::write(path, content).map_err(|e| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Read content from a file
pub fn read_file(path: &Path) -> Result<String, FilesystemError> {
    std::fs::read_to_string(path).map_err(|e| FilesystemError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Total size in bytes of a file or of every file below a directory
pub fn tree_size(path: &Path) -> u64 {
    if !path.exists() {
        return 0;
    }

    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Copy a directory tree, skipping entries for which `skip` returns true.
///
/// `skip` receives the path relative to `from`. Symlinks are recreated, not
/// followed, so relative links inside dependency trees keep working.
pub fn copy_tree<F>(from: &Path, to: &Path, skip: F) -> Result<u64, FilesystemError>
where
    F: Fn(&Path) -> bool,
{
    let copy_err = |error: String| FilesystemError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        error,
    };

    create_dir_all(to)?;
    let mut copied = 0;

    let mut walker = WalkDir::new(from).follow_links(false).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| copy_err(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| copy_err(e.to_string()))?;

        if skip(relative) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }

        let target = to.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target).map_err(|e| copy_err(e.to_string()))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| FilesystemError::Copy {
                from: entry.path().to_path_buf(),
                to: target.clone(),
                error: e.to_string(),
            })?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    let destination = std::fs::read_link(link)?;
    std::os::unix::fs::symlink(destination, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    if link.is_dir() {
        copy_tree(link, target, |_| false)
            .map(|_| ())
            .map_err(|e| std::io::Error::other(e.to_string()))
    } else {
        std::fs::copy(link, target).map(|_| ())
    }
}

/// Copy a file or a directory tree to `to`
pub fn copy_path(from: &Path, to: &Path) -> Result<(), FilesystemError> {
    if from.is_dir() {
        copy_tree(from, to, |_| false)?;
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        create_dir_all(parent)?;
    }
    std::fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| FilesystemError::Copy {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            error: e.to_string(),
        })
}

/// A staging area next to a destination, removed when dropped.
///
/// Content is prepared under [`Staging::payload`], then [`Staging::swap_into`]
/// publishes it with a rename. A displaced previous version lands inside the
/// staging directory and is deleted together with it.
pub struct Staging {
    dir: tempfile::TempDir,
    dest: PathBuf,
}

impl Staging {
    /// Create a staging directory as a hidden sibling of `dest`
    pub fn next_to(dest: &Path) -> Result<Self, FilesystemError> {
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        Self::in_dir(dest, parent)
    }

    /// Create a staging directory for `dest` under `staging_root`.
    ///
    /// `staging_root` must be on the same filesystem as `dest` for the final
    /// rename to be atomic.
    pub fn in_dir(dest: &Path, staging_root: &Path) -> Result<Self, FilesystemError> {
        create_dir_all(staging_root)?;
        if let Some(parent) = dest.parent() {
            create_dir_all(parent)?;
        }

        let dir = tempfile::Builder::new()
            .prefix(&staging_prefix(dest))
            .tempdir_in(staging_root)
            .map_err(|e| FilesystemError::CreateDir {
                path: staging_root.to_path_buf(),
                error: e.to_string(),
            })?;

        Ok(Self {
            dir,
            dest: dest.to_path_buf(),
        })
    }

    /// Where the new content is assembled
    pub fn payload(&self) -> PathBuf {
        self.dir.path().join("payload")
    }

    /// Rename the payload over the destination.
    ///
    /// An existing destination is first renamed aside; no reader ever sees a
    /// half-written destination, only the old one, nothing, or the new one.
    pub fn swap_into(self) -> Result<PathBuf, FilesystemError> {
        let payload = self.payload();
        let mut last_error = None;

        for attempt in 0..3 {
            if std::fs::symlink_metadata(&self.dest).is_ok() {
                let aside = self.dir.path().join(format!("previous-{attempt}"));
                if let Err(e) = std::fs::rename(&self.dest, &aside) {
                    tracing::debug!(dest = %self.dest.display(), error = %e, "could not move previous version aside");
                }
            }

            match std::fs::rename(&payload, &self.dest) {
                Ok(()) => return Ok(self.dest.clone()),
                Err(e) => last_error = Some(e),
            }
        }

        Err(FilesystemError::Rename {
            from: payload,
            to: self.dest.clone(),
            error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

/// Name prefix of the staging directories created for `dest`
pub fn staging_prefix(dest: &Path) -> String {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(".{name}.tmp-")
}

/// Publish a copy of `from` at `dest` with a single rename
pub fn publish(from: &Path, dest: &Path) -> Result<PathBuf, FilesystemError> {
    let staging = Staging::next_to(dest)?;
    copy_path(from, &staging.payload())?;
    staging.swap_into()
}

/// Like [`publish`], assembling the copy under `staging_root` instead of
/// next to `dest`
pub fn publish_via(
    from: &Path,
    dest: &Path,
    staging_root: &Path,
) -> Result<PathBuf, FilesystemError> {
    let staging = Staging::in_dir(dest, staging_root)?;
    copy_path(from, &staging.payload())?;
    staging.swap_into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_tree_with_skip() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        write_file(&src.join("a.txt"), b"a").unwrap();
        write_file(&src.join("nested/b.txt"), b"bb").unwrap();
        write_file(&src.join("node_modules/pkg/index.js"), b"x").unwrap();

        let dst = dir.path().join("dst");
        let copied = copy_tree(&src, &dst, |rel| rel.starts_with("node_modules")).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(read_file(&dst.join("nested/b.txt")).unwrap(), "bb");
        assert!(!dst.join("node_modules").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_keeps_symlinks() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        write_file(&src.join("lib/tool.js"), b"tool").unwrap();
        create_dir_all(&src.join(".bin")).unwrap();
        std::os::unix::fs::symlink("../lib/tool.js", src.join(".bin/tool")).unwrap();

        let dst = dir.path().join("dst");
        copy_tree(&src, &dst, |_| false).unwrap();

        let link = dst.join(".bin/tool");
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(read_file(&link).unwrap(), "tool");
    }

    #[test]
    fn test_tree_size() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("a"), b"12345").unwrap();
        write_file(&dir.path().join("b/c"), b"123").unwrap();
        assert_eq!(tree_size(dir.path()), 8);
        assert_eq!(tree_size(&dir.path().join("a")), 5);
        assert_eq!(tree_size(&dir.path().join("missing")), 0);
    }

    #[test]
    fn test_publish_replaces_existing_directory() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out");
        write_file(&dest.join("old.txt"), b"old").unwrap();

        let src = dir.path().join("bundle");
        write_file(&src.join("new.txt"), b"new").unwrap();

        publish(&src, &dest).unwrap();

        assert!(!dest.join("old.txt").exists());
        assert_eq!(read_file(&dest.join("new.txt")).unwrap(), "new");
        // Staging directories are gone
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_publish_single_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("app.bundle");
        write_file(&src, b"blob").unwrap();

        let dest = dir.path().join("out/app.bundle");
        publish(&src, &dest).unwrap();
        assert_eq!(read_file(&dest).unwrap(), "blob");
    }

    #[test]
    fn test_publish_via_leaves_nothing_next_to_dest() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("project");
        let dest = project.join("out");
        write_file(&dest.join("old.txt"), b"old").unwrap();
        let src = dir.path().join("bundle");
        write_file(&src.join("new.txt"), b"new").unwrap();
        let staging_root = project.join(".kiln/tmp");

        publish_via(&src, &dest, &staging_root).unwrap();

        assert_eq!(read_file(&dest.join("new.txt")).unwrap(), "new");
        let mut names: Vec<String> = std::fs::read_dir(&project)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![".kiln".to_string(), "out".to_string()]);
        assert_eq!(std::fs::read_dir(&staging_root).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_path_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        remove_path(&dir.path().join("nothing")).unwrap();
    }
}
