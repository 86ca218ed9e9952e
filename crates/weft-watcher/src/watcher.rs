//! Filesystem watcher implementation.
//!
//! Converts `notify` events into the cache's `file_added` / `file_changed` /
//! `file_removed` inputs. Delivery latency is best-effort; the cache only
//! promises correct results once an event has been processed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use weft_vfs::{FileStat, FileSystemCache};

/// Events emitted by the file watcher.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// File or directory created.
    Created(PathBuf),
    /// File or directory modified.
    Modified(PathBuf),
    /// File or directory removed.
    Removed(PathBuf),
}

/// File system watcher for monitoring source changes.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
    watched_paths: HashSet<PathBuf>,
}

impl FileWatcher {
    pub fn new() -> Result<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        debug!("File system event: {:?}", event);
                        Self::handle_notify_event(event, &event_tx);
                    }
                    Err(e) => {
                        error!("File system watch error: {}", e);
                    }
                }
            })?;

        Ok(Self {
            watcher,
            event_rx,
            watched_paths: HashSet::new(),
        })
    }

    fn handle_notify_event(event: notify::Event, event_tx: &mpsc::UnboundedSender<WatchEvent>) {
        let convert = match event.kind {
            notify::EventKind::Create(_) => WatchEvent::Created as fn(PathBuf) -> WatchEvent,
            notify::EventKind::Modify(_) => WatchEvent::Modified,
            notify::EventKind::Remove(_) => WatchEvent::Removed,
            _ => return,
        };
        for path in event.paths {
            if should_ignore_path(&path) {
                continue;
            }
            if let Err(e) = event_tx.send(convert(path)) {
                warn!("Failed to send watch event: {}", e);
            }
        }
    }

    /// Watch a directory recursively.
    pub fn watch_directory(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Watching directory: {:?}", path);

        self.watcher.watch(path, RecursiveMode::Recursive)?;
        self.watched_paths.insert(path.to_path_buf());
        Ok(())
    }

    /// Stop watching a path.
    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Stopping watch for: {:?}", path);

        self.watcher.unwatch(path)?;
        self.watched_paths.remove(path);
        Ok(())
    }

    /// Get the event receiver.
    pub fn event_receiver(&mut self) -> &mut mpsc::UnboundedReceiver<WatchEvent> {
        &mut self.event_rx
    }

    /// Check if a path is being watched.
    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched_paths.contains(path)
    }
}

/// Pumps watcher events into a [`FileSystemCache`].
pub struct WatcherService {
    watcher: FileWatcher,
    cache: FileSystemCache,
}

impl WatcherService {
    pub fn new(root: impl AsRef<Path>, cache: FileSystemCache) -> Result<Self> {
        let mut watcher = FileWatcher::new()?;
        watcher.watch_directory(root)?;
        Ok(Self { watcher, cache })
    }

    /// Drain watcher events into cache notifications until the watcher
    /// channel closes. Created/modified paths are stat-ed first so the
    /// replacement node starts pre-seeded.
    pub async fn pump(&mut self) {
        while let Some(event) = self.watcher.event_receiver().recv().await {
            debug!("Processing watch event: {:?}", event);
            Self::apply(&self.cache, event).await;
        }
    }

    /// Apply one watch event to the cache.
    pub async fn apply(cache: &FileSystemCache, event: WatchEvent) {
        match event {
            WatchEvent::Created(path) => {
                let stat = stat_for(&path).await;
                cache.file_added(&path, stat);
            }
            WatchEvent::Modified(path) => {
                let stat = stat_for(&path).await;
                cache.file_changed(&path, stat);
            }
            WatchEvent::Removed(path) => {
                cache.file_removed(&path);
            }
        }
    }
}

/// Stat a path for event pre-seeding. `None` when the path vanished again
/// (or stat failed); the cache node then stats lazily on first use.
async fn stat_for(path: &Path) -> Option<FileStat> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => FileStat::from_metadata(path, &meta).ok(),
        Err(_) => None,
    }
}

/// Check if a path should be ignored (e.g. VCS and build output).
fn should_ignore_path(path: &Path) -> bool {
    for component in path.components() {
        if let Some(name) = component.as_os_str().to_str() {
            if name == ".git" || name == "target" || name == "node_modules" {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::time::{Duration, sleep};

    #[tokio::test]
    async fn test_file_watcher_creation() {
        let watcher = FileWatcher::new();
        assert!(watcher.is_ok());
    }

    #[tokio::test]
    async fn test_watch_events() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = FileWatcher::new().unwrap();
        watcher.watch_directory(temp_dir.path()).unwrap();

        let test_file = temp_dir.path().join("test.js");
        std::fs::write(&test_file, "export default 1;").unwrap();

        // Give the watcher time to deliver.
        sleep(Duration::from_millis(200)).await;

        if let Ok(event) = watcher.event_receiver().try_recv() {
            match event {
                WatchEvent::Created(path) | WatchEvent::Modified(path) => {
                    assert_eq!(path.file_name().unwrap(), "test.js")
                }
                other => panic!("Unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn applied_events_invalidate_the_cache() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileSystemCache::new();
        let path = temp_dir.path().join("a.js");

        std::fs::write(&path, "one").unwrap();
        assert_eq!(&*cache.read_text(&path).await.unwrap(), "one");

        std::fs::write(&path, "two").unwrap();
        WatcherService::apply(&cache, WatchEvent::Modified(path.clone())).await;
        assert_eq!(&*cache.read_text(&path).await.unwrap(), "two");
    }

    #[test]
    fn test_should_ignore_path() {
        assert!(should_ignore_path(Path::new("repo/.git/HEAD")));
        assert!(should_ignore_path(Path::new("repo/node_modules/x/index.js")));
        assert!(!should_ignore_path(Path::new("repo/src/index.js")));
    }
}
