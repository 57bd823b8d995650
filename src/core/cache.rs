//! Dependency cache store
//!
//! Entries live directly under the scratch root as
//! `{project}-{kind}-{fingerprint}/` and are immutable once published. An
//! entry is only valid when it carries the `.kiln-complete` marker, which is
//! written into the staging copy before the final rename, so a reader never
//! observes a half-written entry as a hit.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::core::fingerprint::Fingerprint;
use crate::error::{CacheError, FilesystemError};
use crate::infra::filesystem::{self, Staging};

/// Completion marker file name inside every valid entry
pub const MARKER_FILE: &str = ".kiln-complete";

/// Contents of the completion marker
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CompletionMarker {
    fingerprint: String,
    kind: String,
    created_at_unix: u64,
    version: String,
}

/// A committed cache entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Entry directory
    pub path: PathBuf,
    /// Fingerprint from the directory name
    pub fingerprint: Fingerprint,
    /// Total size in bytes
    pub size_bytes: u64,
    /// Commit time, from the marker or else the directory mtime
    pub created_at: Option<SystemTime>,
    /// kiln version that wrote the entry, if the marker is readable
    pub written_by: Option<String>,
}

/// Cache information
#[derive(Debug, Clone)]
pub struct CacheInfo {
    /// Scratch root holding the entries
    pub path: PathBuf,
    /// Total size in bytes
    pub size_bytes: u64,
    /// Number of entries
    pub item_count: usize,
    /// Entries, oldest first
    pub entries: Vec<CacheEntry>,
}

impl CacheInfo {
    /// Format size for display
    pub fn format_size(&self) -> String {
        format_size(self.size_bytes)
    }
}

/// Human-readable byte count
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        "0 bytes".to_string()
    } else if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// What an eviction pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictReport {
    /// Committed entries removed
    pub entries: usize,
    /// Abandoned staging directories removed
    pub staging_dirs: usize,
    /// Bytes freed
    pub freed_bytes: u64,
}

/// Cache of prepared dependency trees for one project
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    project: String,
}

impl CacheStore {
    /// Cache for `project` under the scratch root
    pub fn new(root: impl Into<PathBuf>, project: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            project: project.into(),
        }
    }

    /// Scratch root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn prefix(&self, kind: &str) -> String {
        format!("{}-{kind}-", self.project)
    }

    /// Directory an entry occupies once committed
    pub fn entry_path(&self, kind: &str, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join(format!("{}{fingerprint}", self.prefix(kind)))
    }

    /// Return the entry path if a complete entry exists.
    ///
    /// An incomplete entry is reported in the logs and treated as a miss.
    pub fn lookup(&self, kind: &str, fingerprint: &Fingerprint) -> Option<PathBuf> {
        let path = self.entry_path(kind, fingerprint);
        if !path.is_dir() {
            tracing::debug!(%fingerprint, kind, "cache miss");
            return None;
        }
        let checked = validate(&path).and_then(|marker| {
            if marker.fingerprint == fingerprint.as_str() && marker.kind == kind {
                Ok(marker)
            } else {
                Err(CacheError::CacheCorrupt { path: path.clone() })
            }
        });
        match checked {
            Ok(_) => {
                tracing::debug!(path = %path.display(), "cache hit");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(error = %e, "ignoring invalid cache entry");
                None
            }
        }
    }

    /// Copy `source` into the cache under `(kind, fingerprint)`.
    ///
    /// The copy is assembled in a hidden sibling directory, marked complete,
    /// then renamed into place. An existing entry is replaced. When the final
    /// rename loses against a concurrent commit of the same key, the other
    /// writer's complete entry is accepted.
    pub fn commit(
        &self,
        kind: &str,
        fingerprint: &Fingerprint,
        source: &Path,
    ) -> Result<PathBuf, CacheError> {
        if !source.is_dir() {
            return Err(CacheError::MissingSource {
                path: source.to_path_buf(),
            });
        }

        let dest = self.entry_path(kind, fingerprint);
        let staging = Staging::next_to(&dest)?;
        let payload = staging.payload();
        let files = filesystem::copy_tree(source, &payload, |_| false)?;

        let marker = CompletionMarker {
            fingerprint: fingerprint.to_string(),
            kind: kind.to_string(),
            created_at_unix: unix_now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let marker_path = payload.join(MARKER_FILE);
        let marker_json =
            serde_json::to_vec_pretty(&marker).map_err(|e| FilesystemError::WriteFile {
                path: marker_path.clone(),
                error: e.to_string(),
            })?;
        filesystem::write_file(&marker_path, &marker_json)?;

        match staging.swap_into() {
            Ok(path) => {
                tracing::info!(%fingerprint, kind, files, "committed cache entry");
                Ok(path)
            }
            Err(e) if validate(&dest).is_ok() => {
                tracing::debug!(error = %e, "concurrent commit already published this entry");
                Ok(dest)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// List this project's entries of `kind`, oldest first
    pub fn entries(&self, kind: &str) -> Vec<CacheEntry> {
        let prefix = self.prefix(kind);
        let Ok(read_dir) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut entries: Vec<CacheEntry> = read_dir
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let fingerprint = Fingerprint::parse(name.strip_prefix(&prefix)?)?;
                let path = e.path();
                let marker = validate(&path).ok();
                let created_at = marker
                    .as_ref()
                    .map(|m| UNIX_EPOCH + Duration::from_secs(m.created_at_unix))
                    .or_else(|| e.metadata().and_then(|m| m.modified()).ok());
                Some(CacheEntry {
                    size_bytes: filesystem::tree_size(&path),
                    path,
                    fingerprint,
                    created_at,
                    written_by: marker.map(|m| m.version),
                })
            })
            .collect();

        entries.sort_by_key(|e| e.created_at);
        entries
    }

    /// Total size and entry count of this project's entries of `kind`
    pub fn info(&self, kind: &str) -> CacheInfo {
        let entries = self.entries(kind);
        CacheInfo {
            path: self.root.clone(),
            size_bytes: entries.iter().map(|e| e.size_bytes).sum(),
            item_count: entries.len(),
            entries,
        }
    }

    /// Remove all of this project's entries of `kind`; returns bytes freed
    pub fn clear(&self, kind: &str) -> Result<u64, CacheError> {
        let mut freed = 0;
        for entry in self.entries(kind) {
            filesystem::remove_path(&entry.path)?;
            freed += entry.size_bytes;
        }
        tracing::info!(freed, kind, "cleared cache");
        Ok(freed)
    }

    /// Remove entries and abandoned staging directories older than `older_than`
    pub fn evict(&self, kind: &str, older_than: Duration) -> Result<EvictReport, CacheError> {
        let now = SystemTime::now();
        let is_old = |t: Option<SystemTime>| {
            t.and_then(|t| now.duration_since(t).ok())
                .is_some_and(|age| age >= older_than)
        };
        let mut report = EvictReport::default();

        for entry in self.entries(kind) {
            if is_old(entry.created_at) {
                tracing::debug!(path = %entry.path.display(), "evicting cache entry");
                filesystem::remove_path(&entry.path)?;
                report.entries += 1;
                report.freed_bytes += entry.size_bytes;
            }
        }

        let staging_prefix = format!(".{}", self.prefix(kind));
        if let Ok(read_dir) = std::fs::read_dir(&self.root) {
            for e in read_dir.filter_map(Result::ok) {
                let name = e.file_name().to_string_lossy().into_owned();
                if !(name.starts_with(&staging_prefix) && name.contains(".tmp-")) {
                    continue;
                }
                let modified = e.metadata().and_then(|m| m.modified()).ok();
                if is_old(modified) {
                    let path = e.path();
                    let size = filesystem::tree_size(&path);
                    filesystem::remove_path(&path)?;
                    report.staging_dirs += 1;
                    report.freed_bytes += size;
                }
            }
        }

        if report.entries + report.staging_dirs > 0 {
            tracing::info!(
                entries = report.entries,
                staging = report.staging_dirs,
                freed = report.freed_bytes,
                "evicted cache entries"
            );
        }
        Ok(report)
    }
}

/// Read and check the completion marker of an entry
fn validate(path: &Path) -> Result<CompletionMarker, CacheError> {
    let corrupt = || CacheError::CacheCorrupt {
        path: path.to_path_buf(),
    };
    let content = std::fs::read_to_string(path.join(MARKER_FILE)).map_err(|_| corrupt())?;
    serde_json::from_str(&content).map_err(|_| corrupt())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::VENDOR_KIND;
    use tempfile::TempDir;

    fn deps_tree(dir: &Path) -> PathBuf {
        let deps = dir.join("node_modules");
        filesystem::write_file(&deps.join("left-pad/index.js"), b"module.exports = 1").unwrap();
        filesystem::write_file(&deps.join("left-pad/package.json"), b"{}").unwrap();
        deps
    }

    fn fp(seed: &str) -> Fingerprint {
        Fingerprint::of_contents([seed.as_bytes()])
    }

    #[test]
    fn test_commit_then_lookup() {
        let scratch = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::new(scratch.path(), "app");
        let fingerprint = fp("lock-v1");

        assert!(store.lookup(VENDOR_KIND, &fingerprint).is_none());

        let path = store
            .commit(VENDOR_KIND, &fingerprint, &deps_tree(work.path()))
            .unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("app-vendor-{fingerprint}")
        );
        assert_eq!(store.lookup(VENDOR_KIND, &fingerprint), Some(path.clone()));
        assert!(path.join("left-pad/index.js").exists());
        assert!(path.join(MARKER_FILE).exists());
    }

    #[test]
    fn test_entry_without_marker_is_a_miss() {
        let scratch = TempDir::new().unwrap();
        let store = CacheStore::new(scratch.path(), "app");
        let fingerprint = fp("half-written");
        let path = store.entry_path(VENDOR_KIND, &fingerprint);
        filesystem::write_file(&path.join("pkg/index.js"), b"partial").unwrap();

        assert!(store.lookup(VENDOR_KIND, &fingerprint).is_none());
    }

    #[test]
    fn test_commit_missing_source() {
        let scratch = TempDir::new().unwrap();
        let store = CacheStore::new(scratch.path(), "app");
        let err = store
            .commit(VENDOR_KIND, &fp("x"), &scratch.path().join("nope"))
            .unwrap_err();
        assert!(matches!(err, CacheError::MissingSource { .. }));
    }

    #[test]
    fn test_commit_replaces_existing_entry() {
        let scratch = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::new(scratch.path(), "app");
        let fingerprint = fp("lock");

        let deps = deps_tree(work.path());
        store.commit(VENDOR_KIND, &fingerprint, &deps).unwrap();
        filesystem::write_file(&deps.join("extra/index.js"), b"new").unwrap();
        let path = store.commit(VENDOR_KIND, &fingerprint, &deps).unwrap();

        assert!(path.join("extra/index.js").exists());
        assert_eq!(store.info(VENDOR_KIND).item_count, 1);
    }

    #[test]
    fn test_concurrent_commits_leave_valid_entry() {
        let scratch = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::new(scratch.path(), "app");
        let fingerprint = fp("contended");
        let deps = deps_tree(work.path());

        std::thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| s.spawn(|| store.commit(VENDOR_KIND, &fingerprint, &deps)))
                .collect();
            for h in handles {
                h.join().unwrap().unwrap();
            }
        });

        let path = store.lookup(VENDOR_KIND, &fingerprint).unwrap();
        assert!(path.join("left-pad/index.js").exists());
        // No staging directories left behind
        let hidden = std::fs::read_dir(scratch.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(hidden, 0);
    }

    #[test]
    fn test_info_and_clear_are_scoped_to_project() {
        let scratch = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let deps = deps_tree(work.path());
        let app = CacheStore::new(scratch.path(), "app");
        let other = CacheStore::new(scratch.path(), "app-admin");

        app.commit(VENDOR_KIND, &fp("a"), &deps).unwrap();
        app.commit(VENDOR_KIND, &fp("b"), &deps).unwrap();
        other.commit(VENDOR_KIND, &fp("c"), &deps).unwrap();

        let info = app.info(VENDOR_KIND);
        assert_eq!(info.item_count, 2);
        assert!(info.size_bytes > 0);

        app.clear(VENDOR_KIND).unwrap();
        assert_eq!(app.info(VENDOR_KIND).item_count, 0);
        assert_eq!(other.info(VENDOR_KIND).item_count, 1);
    }

    #[test]
    fn test_evict_old_entries_and_staging_dirs() {
        let scratch = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::new(scratch.path(), "app");
        store
            .commit(VENDOR_KIND, &fp("old"), &deps_tree(work.path()))
            .unwrap();
        let abandoned = scratch.path().join(format!(".app-vendor-{}.tmp-abc", fp("x")));
        filesystem::write_file(&abandoned.join("payload/file"), b"x").unwrap();

        let kept = store.evict(VENDOR_KIND, Duration::from_secs(3600)).unwrap();
        assert_eq!(kept, EvictReport::default());

        let report = store.evict(VENDOR_KIND, Duration::ZERO).unwrap();
        assert_eq!(report.entries, 1);
        assert_eq!(report.staging_dirs, 1);
        assert!(!abandoned.exists());
        assert_eq!(store.info(VENDOR_KIND).item_count, 0);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 bytes");
        assert_eq!(format_size(512), "512 bytes");
        assert!(format_size(1024 * 100).contains("KB"));
        assert!(format_size(1024 * 1024 * 50).contains("MB"));
    }
}
