//! File watcher: turns filesystem changes into module events.
//!
//! Watches the include directory recursively. Writes to the same file are
//! coalesced by the debouncer's stability window, so a burst of partial
//! writes produces one event. Paths are mapped back to module ids through
//! the module cache's path index; paths the graph does not track are
//! dropped.

use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::ModuleCache;
use crate::error::Result;
use crate::graph::ModuleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// File was created or written.
    Change,
    /// File no longer exists.
    Unlink,
}

/// A normalized watcher event for a tracked module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchKind,
    pub module_id: ModuleId,
    pub absolute_path: PathBuf,
}

/// Start watching `root`, sending one [`WatchEvent`] per settled change.
///
/// Returns a handle that keeps the watcher alive. Drop it to stop watching.
pub fn start_watching(
    root: &Path,
    exclude: Regex,
    stability: Duration,
    cache: Arc<RwLock<ModuleCache>>,
    events: mpsc::UnboundedSender<WatchEvent>,
) -> Result<WatcherHandle> {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

    let mut debouncer = new_debouncer(
        stability,
        move |result: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match result {
            Ok(batch) => {
                for event in collect_events(&batch, &exclude, &cache) {
                    if events.send(event).is_err() {
                        debug!("watch receiver dropped");
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "file watcher error"),
        },
    )?;

    debouncer
        .watcher()
        .watch(&root, notify::RecursiveMode::Recursive)?;

    info!(
        root = %root.display(),
        stability_ms = stability.as_millis() as u64,
        "actively watching file updates"
    );

    Ok(WatcherHandle {
        root,
        _debouncer: debouncer,
    })
}

/// Collapse a debounced batch into module events.
fn collect_events(
    batch: &[DebouncedEvent],
    exclude: &Regex,
    cache: &RwLock<ModuleCache>,
) -> Vec<WatchEvent> {
    // Last event kind per path, in first-seen order.
    let mut order = Vec::new();
    let mut kinds: HashMap<&Path, DebouncedEventKind> = HashMap::new();
    for event in batch {
        if kinds.insert(event.path.as_path(), event.kind).is_none() {
            order.push(event.path.as_path());
        }
    }

    let cache = match cache.read() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "module cache lock poisoned, dropping watch events");
            return Vec::new();
        }
    };

    order
        .into_iter()
        .filter_map(|path| match kinds.get(path) {
            Some(DebouncedEventKind::Any) => translate(path, path.exists(), exclude, &cache),
            Some(DebouncedEventKind::AnyContinuous) => {
                debug!(file = %path.display(), "skipping continuous write");
                None
            }
            _ => None,
        })
        .collect()
}

/// Map one settled path to a module event, or `None` if it is excluded or
/// untracked.
pub fn translate(
    path: &Path,
    exists: bool,
    exclude: &Regex,
    cache: &ModuleCache,
) -> Option<WatchEvent> {
    if exclude.is_match(&path.to_string_lossy()) {
        return None;
    }

    let Some(module_id) = cache.lookup_path(path) else {
        debug!(file = %path.display(), "untracked file changed");
        return None;
    };

    Some(WatchEvent {
        kind: if exists {
            WatchKind::Change
        } else {
            WatchKind::Unlink
        },
        module_id,
        absolute_path: path.to_path_buf(),
    })
}

/// Handle that keeps the file watcher alive.
/// Drop this to stop watching.
pub struct WatcherHandle {
    root: PathBuf,
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

impl WatcherHandle {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DependencyMap, ModuleRecord};

    fn cache_with(path: &str, id: &str) -> ModuleCache {
        ModuleCache::new(vec![ModuleRecord {
            id: ModuleId::from(id),
            path: PathBuf::from(path),
            content: String::new(),
            dependencies: DependencyMap::new(),
        }])
    }

    fn node_modules() -> Regex {
        Regex::new("node_modules").unwrap()
    }

    #[test]
    fn test_translate_tracked_change_and_unlink() {
        let cache = cache_with("/p/a.js", "1");

        let change = translate(Path::new("/p/a.js"), true, &node_modules(), &cache).unwrap();
        assert_eq!(change.kind, WatchKind::Change);
        assert_eq!(change.module_id, ModuleId::from("1"));

        let unlink = translate(Path::new("/p/a.js"), false, &node_modules(), &cache).unwrap();
        assert_eq!(unlink.kind, WatchKind::Unlink);
    }

    #[test]
    fn test_translate_drops_untracked_and_excluded() {
        let cache = cache_with("/p/node_modules/x/index.js", "1");
        assert!(translate(Path::new("/p/other.js"), true, &node_modules(), &cache).is_none());
        assert!(translate(
            Path::new("/p/node_modules/x/index.js"),
            true,
            &node_modules(),
            &cache
        )
        .is_none());
    }

    #[test]
    fn test_collect_events_dedupes_per_path() {
        let cache = RwLock::new(cache_with("/nonexistent/a.js", "1"));
        let batch = vec![
            DebouncedEvent {
                path: PathBuf::from("/nonexistent/a.js"),
                kind: DebouncedEventKind::Any,
            },
            DebouncedEvent {
                path: PathBuf::from("/nonexistent/a.js"),
                kind: DebouncedEventKind::Any,
            },
            DebouncedEvent {
                path: PathBuf::from("/nonexistent/b.js"),
                kind: DebouncedEventKind::Any,
            },
        ];

        let events = collect_events(&batch, &node_modules(), &cache);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, WatchKind::Unlink);
    }
}
