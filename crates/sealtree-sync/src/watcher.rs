//! Filesystem change notifications for dev-mode rebuilds
//!
//! The notify callback does no work of its own: it filters the event and
//! enqueues the changed path. Debouncing and pass execution belong to the
//! single coordinator in [`crate::scheduler`].

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sealtree_core::config::{expand_tilde, resolve_path, SealtreeConfig, WatchScope};
use sealtree_core::{SealError, SealResult, TEMP_SUFFIX};

/// Directory names whose changes never trigger a rebuild
const ALWAYS_IGNORED: &[&str] = &[".git", ".hg", ".svn", "node_modules", "target"];

/// Capacity of the change queue between the watcher and the coordinator
pub const CHANGE_QUEUE_CAPACITY: usize = 256;

/// Decides which paths are worth a rebuild.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    /// Roots whose subtree is ignored (the mirror, in all its spellings)
    ignored_roots: Vec<PathBuf>,
    patterns: Vec<glob::Pattern>,
}

impl WatchFilter {
    /// Ignore the mirror tree, VCS metadata, dependency caches and `extra` globs.
    pub fn new(mirror_root: &Path, extra: &[String]) -> Self {
        let mut ignored_roots = vec![mirror_root.to_path_buf(), resolve_path(mirror_root)];
        ignored_roots.dedup();

        let patterns = extra
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pat) => Some(pat),
                Err(e) => {
                    warn!(pattern = %p, "ignoring invalid watch ignore pattern: {e}");
                    None
                }
            })
            .collect();

        Self {
            ignored_roots,
            patterns,
        }
    }

    pub fn is_relevant(&self, path: &Path) -> bool {
        if self.ignored_roots.iter().any(|root| path.starts_with(root)) {
            return false;
        }
        if path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with(TEMP_SUFFIX))
        {
            return false;
        }
        !path.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            ALWAYS_IGNORED.contains(&name.as_ref()) || self.patterns.iter().any(|p| p.matches(&name))
        })
    }

    /// Relevant paths of an event, or nothing for event kinds that don't change content.
    pub fn relevant_paths<'a>(&'a self, event: &'a Event) -> impl Iterator<Item = &'a PathBuf> + 'a {
        let interesting = matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        );
        event
            .paths
            .iter()
            .filter(move |p| interesting && self.is_relevant(p))
    }
}

/// Root directory to subscribe to for the configured scope.
pub fn watch_root(config: &SealtreeConfig) -> PathBuf {
    match config.watch.scope {
        WatchScope::Project => expand_tilde(&config.paths.project_root),
        WatchScope::Source => expand_tilde(&config.paths.source),
    }
}

/// A running recursive watcher feeding changed paths into a channel.
///
/// Dropping it stops the subscription.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl ChangeWatcher {
    /// Create the change queue and start watching `root`.
    pub fn start(
        root: &Path,
        filter: WatchFilter,
    ) -> SealResult<(Self, mpsc::Receiver<PathBuf>)> {
        let (tx, rx) = mpsc::channel(CHANGE_QUEUE_CAPACITY);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for path in filter.relevant_paths(&event) {
                        // A full queue already guarantees another pass; dropping is fine.
                        if tx.try_send(path.clone()).is_err() {
                            debug!(path = %path.display(), "change queue full or closed");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "watch error"),
            },
            Config::default(),
        )
        .map_err(|e| SealError::Other(anyhow::anyhow!("creating file watcher: {e}")))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| SealError::Other(anyhow::anyhow!("watching {}: {e}", root.display())))?;

        info!(root = %root.display(), "watching for changes");

        Ok((
            Self {
                _watcher: watcher,
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};

    fn filter() -> WatchFilter {
        WatchFilter::new(Path::new("/proj/encrypted"), &["*.swp".to_string()])
    }

    #[test]
    fn test_filter_ignores_mirror_and_caches() {
        let f = filter();
        assert!(f.is_relevant(Path::new("/proj/raw/alice.txt")));
        assert!(f.is_relevant(Path::new("/proj/src/main.rs")));
        assert!(!f.is_relevant(Path::new("/proj/encrypted/alice.txt.json")));
        assert!(!f.is_relevant(Path::new("/proj/.git/index")));
        assert!(!f.is_relevant(Path::new("/proj/node_modules/x/index.js")));
        assert!(!f.is_relevant(Path::new("/proj/target/debug/build")));
        assert!(!f.is_relevant(Path::new("/proj/raw/.alice.txt.swp")));
        assert!(!f.is_relevant(Path::new("/proj/raw/a.json.sealtree-tmp")));
    }

    #[test]
    fn test_filter_does_not_match_prefix_siblings() {
        let f = filter();
        assert!(f.is_relevant(Path::new("/proj/encrypted-notes/a.txt")));
    }

    #[test]
    fn test_filter_normalizes_missing_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::create_dir_all(root.join("work")).unwrap();

        let f = WatchFilter::new(&root.join("work/../shared/encrypted"), &[]);
        assert!(!f.is_relevant(&root.join("shared/encrypted/a.txt.json")));
        assert!(f.is_relevant(&root.join("work/raw/a.txt")));
    }

    #[test]
    fn test_relevant_paths_by_kind() {
        let f = filter();
        let path = PathBuf::from("/proj/raw/alice.txt");

        for kind in [
            EventKind::Create(CreateKind::File),
            EventKind::Modify(ModifyKind::Any),
            EventKind::Remove(RemoveKind::File),
        ] {
            let event = Event::new(kind).add_path(path.clone());
            assert_eq!(f.relevant_paths(&event).count(), 1, "{kind:?}");
        }

        let access = Event::new(EventKind::Access(AccessKind::Any)).add_path(path);
        assert_eq!(f.relevant_paths(&access).count(), 0);
    }

    #[test]
    fn test_watch_root_by_scope() {
        let mut config = SealtreeConfig::default();
        assert_eq!(watch_root(&config), PathBuf::from("."));
        config.watch.scope = WatchScope::Source;
        assert_eq!(watch_root(&config), PathBuf::from("raw"));
    }

    #[tokio::test]
    async fn test_watcher_enqueues_source_changes() {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::create_dir_all(root.join("raw")).unwrap();
        std::fs::create_dir_all(root.join("encrypted")).unwrap();

        let filter = WatchFilter::new(&root.join("encrypted"), &[]);
        let (_watcher, mut rx) = ChangeWatcher::start(&root, filter).unwrap();

        std::fs::write(root.join("encrypted/ignored.json"), b"{}").unwrap();
        std::fs::write(root.join("raw/alice.txt"), b"hello").unwrap();

        let path = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("watch event")
            .unwrap();
        assert!(path.starts_with(root.join("raw")), "got {}", path.display());
    }
}
