//! Filesystem watcher bridge
//!
//! Wraps the platform watcher from `notify` and forwards relevant
//! create/modify/remove events into a tokio channel. Debouncing and
//! scheduling live in `core::watch`; this module only filters.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::infra::filesystem::staging_prefix;

/// A relevant filesystem change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Paths touched by the change
    pub paths: Vec<PathBuf>,
}

/// Paths whose changes never trigger a rebuild
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    roots: Vec<PathBuf>,
}

impl IgnoreRules {
    /// Ignore everything below the given project-relative paths
    pub fn new(project_dir: &Path, relative: &[PathBuf]) -> Self {
        let mut roots = Vec::new();
        for rel in relative {
            let abs = project_dir.join(rel);
            if let Ok(canonical) = abs.canonicalize() {
                if canonical != abs {
                    roots.push(canonical);
                }
            }
            roots.push(abs);
        }
        Self { roots }
    }

    /// Whether a changed path falls under an ignored root or one of its
    /// hidden staging siblings (`.{name}.tmp-*`)
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.roots
            .iter()
            .any(|root| path.starts_with(root) || is_staging_sibling(root, path))
    }

    /// Keep only the relevant paths of an event; `None` if nothing is left
    pub fn filter(&self, event: &Event) -> Option<WatchEvent> {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            return None;
        }
        let paths: Vec<PathBuf> = event
            .paths
            .iter()
            .filter(|p| !self.is_ignored(p))
            .cloned()
            .collect();
        (!paths.is_empty()).then_some(WatchEvent { paths })
    }
}

fn is_staging_sibling(root: &Path, path: &Path) -> bool {
    let Some(parent) = root.parent() else {
        return false;
    };
    let prefix = staging_prefix(root);
    path.strip_prefix(parent)
        .ok()
        .and_then(|rel| rel.components().next())
        .is_some_and(|first| first.as_os_str().to_string_lossy().starts_with(&prefix))
}

/// A running watcher; dropping it stops event delivery
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for FsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsWatcher").finish_non_exhaustive()
    }
}

impl FsWatcher {
    /// Recursively watch `paths`, sending filtered events on the returned channel.
    ///
    /// Paths that do not exist are skipped with a warning.
    pub fn start(
        paths: &[PathBuf],
        rules: IgnoreRules,
    ) -> notify::Result<(Self, mpsc::UnboundedReceiver<WatchEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Some(event) = rules.filter(&event) {
                    tracing::trace!(paths = ?event.paths, "change detected");
                    // Receiver gone means the watch loop ended
                    let _ = tx.send(event);
                }
            }
            Err(e) => tracing::warn!(error = %e, "watcher error"),
        })?;

        for path in paths {
            if !path.exists() {
                tracing::warn!(path = %path.display(), "watch path does not exist, skipping");
                continue;
            }
            watcher.watch(path, RecursiveMode::Recursive)?;
            tracing::debug!(path = %path.display(), "watching");
        }

        Ok((Self { _watcher: watcher }, rx))
    }
}
