//! Memoizing front-end to file-system access.
//!
//! The cache owns exactly one [`FileNode`] per path. Watcher notifications
//! (`file_added` / `file_changed` / `file_removed`) replace the node rather
//! than mutating it, so facts already handed out stay tied to the version
//! they were read from; a read that settles after its node was replaced is
//! discarded by never resolving (see [`FileSystemCache::guard_current`]).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use futures_util::future::try_join_all;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::VfsError;
use crate::file::{FileNode, FileStat};
use crate::trap::{Binding, FileFacts, Fingerprint, Trap, TrapId, TrapState};

/// What kind of file-system event diverged from a trap's recorded bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCause {
    Added,
    Changed,
    Removed,
}

/// One-shot notification that a trap's bindings no longer describe reality.
#[derive(Debug, Clone)]
pub struct TrapTrigger {
    pub trap: TrapId,
    pub path: PathBuf,
    pub cause: ChangeCause,
}

pub(crate) struct TrapRegistry {
    next_id: u64,
    traps: HashMap<TrapId, Arc<TrapState>>,
    by_path: HashMap<PathBuf, HashSet<TrapId>>,
}

pub(crate) struct CacheInner {
    files: DashMap<PathBuf, Arc<FileNode>>,
    next_generation: AtomicU64,
    traps: Mutex<TrapRegistry>,
    triggers: broadcast::Sender<TrapTrigger>,
}

/// The file-system cache. Cheap to clone; all clones share one path table
/// and one trap registry.
#[derive(Clone)]
pub struct FileSystemCache {
    pub(crate) inner: Arc<CacheInner>,
}

impl Default for FileSystemCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystemCache {
    pub fn new() -> Self {
        let (triggers, _) = broadcast::channel(256);
        FileSystemCache {
            inner: Arc::new(CacheInner {
                files: DashMap::new(),
                next_generation: AtomicU64::new(0),
                traps: Mutex::new(TrapRegistry {
                    next_id: 0,
                    traps: HashMap::new(),
                    by_path: HashMap::new(),
                }),
                triggers,
            }),
        }
    }

    /// Subscribe to trap trigger notifications.
    pub fn subscribe_triggers(&self) -> broadcast::Receiver<TrapTrigger> {
        self.inner.triggers.subscribe()
    }

    // ── Facet accessors ─────────────────────────────────────

    pub async fn is_file(&self, path: impl AsRef<Path>) -> Result<bool, VfsError> {
        let path = path.as_ref();
        let file = self.file_for(path);
        let result = file.is_file().await;
        self.guard_current(path, &file).await;
        result
    }

    pub async fn is_directory(&self, path: impl AsRef<Path>) -> Result<bool, VfsError> {
        let path = path.as_ref();
        let file = self.file_for(path);
        let result = file.is_directory().await;
        self.guard_current(path, &file).await;
        result
    }

    /// Stat the path; `None` means it does not exist.
    pub async fn stat(&self, path: impl AsRef<Path>) -> Result<Option<FileStat>, VfsError> {
        let path = path.as_ref();
        let file = self.file_for(path);
        let result = file.stat().await;
        self.guard_current(path, &file).await;
        result
    }

    /// Modified time in epoch millis; `None` if the path does not exist.
    pub async fn read_modified_time(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Option<u64>, VfsError> {
        let path = path.as_ref();
        let file = self.file_for(path);
        let result = file.modified_ms().await;
        self.guard_current(path, &file).await;
        result
    }

    pub async fn read_buffer(&self, path: impl AsRef<Path>) -> Result<Arc<Vec<u8>>, VfsError> {
        let path = path.as_ref();
        let file = self.file_for(path);
        let result = file.buffer().await;
        self.guard_current(path, &file).await;
        result
    }

    pub async fn read_text(&self, path: impl AsRef<Path>) -> Result<Arc<str>, VfsError> {
        let path = path.as_ref();
        let file = self.file_for(path);
        let result = file.text().await;
        self.guard_current(path, &file).await;
        result
    }

    pub async fn read_text_hash(&self, path: impl AsRef<Path>) -> Result<String, VfsError> {
        let path = path.as_ref();
        let file = self.file_for(path);
        let result = file.text_hash().await;
        self.guard_current(path, &file).await;
        result
    }

    /// Entry names of the directory, sorted.
    pub async fn read_directory_contents(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Arc<Vec<String>>, VfsError> {
        let path = path.as_ref();
        let file = self.file_for(path);
        let result = file.dir_list().await;
        self.guard_current(path, &file).await;
        result
    }

    // ── Change notifications ────────────────────────────────

    /// A path appeared. Idempotent: duplicate scan results for a path the
    /// cache already tracks keep the existing node. A known stat pre-seeds
    /// the node, saving the first I/O call.
    pub fn file_added(&self, path: impl AsRef<Path>, stat: Option<FileStat>) {
        let path = path.as_ref();
        debug!("File added: {}", path.display());
        self.trigger_traps(path, ChangeCause::Added);
        self.inner.files.entry(path.to_path_buf()).or_insert_with(|| {
            let generation = self.next_generation();
            Arc::new(match stat {
                Some(stat) => FileNode::with_stat(path, generation, stat),
                None => FileNode::new(path, generation),
            })
        });
    }

    /// A path changed. The old node is discarded unconditionally; slow reads
    /// still awaiting it are stranded by the stale-read guard.
    pub fn file_changed(&self, path: impl AsRef<Path>, stat: Option<FileStat>) {
        let path = path.as_ref();
        debug!("File changed: {}", path.display());
        self.trigger_traps(path, ChangeCause::Changed);
        let generation = self.next_generation();
        let node = match stat {
            Some(stat) => FileNode::with_stat(path, generation, stat),
            None => FileNode::new(path, generation),
        };
        self.inner.files.insert(path.to_path_buf(), Arc::new(node));
    }

    /// A path disappeared. The replacement node is pre-seeded as absent so
    /// existence checks answer without touching the file system.
    pub fn file_removed(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        debug!("File removed: {}", path.display());
        self.trigger_traps(path, ChangeCause::Removed);
        let generation = self.next_generation();
        self.inner
            .files
            .insert(path.to_path_buf(), Arc::new(FileNode::absent(path, generation)));
    }

    // ── Traps ───────────────────────────────────────────────

    /// Open a new dependency trap over this cache.
    pub fn create_trap(&self) -> Trap {
        let mut registry = self.lock_registry();
        let id = TrapId(registry.next_id);
        registry.next_id += 1;
        let state = Arc::new(TrapState::new(id));
        registry.traps.insert(id, state.clone());
        Trap::new(self.clone(), state)
    }

    /// Re-validate a persisted fingerprint against the live file system.
    ///
    /// Every recorded fact across every path is re-queried concurrently and
    /// compared against the persisted value. All-or-nothing: a single
    /// mismatch returns `None` and the caller must recompute with a fresh
    /// trap. On success the returned trap starts life already holding the
    /// persisted bindings and registered for notification on all its paths,
    /// without re-reading anything through trap accessors.
    pub async fn rehydrate_trap(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<Trap>, VfsError> {
        let checks = fingerprint
            .iter()
            .map(|(path, facts)| self.verify_facts(path, facts));
        let results = try_join_all(checks).await?;
        if results.iter().any(|matched| !matched) {
            info!("Fingerprint mismatch; rehydration failed");
            return Ok(None);
        }

        let trap = self.create_trap();
        let mut registry = self.lock_registry();
        let mut bindings = trap.state().lock_bindings();
        for (path, facts) in fingerprint.iter() {
            bindings.insert(
                path.clone(),
                Binding {
                    is_file: facts.is_file,
                    modified_ms: facts.modified_time,
                    text_hash: facts.text_hash.clone(),
                    on_change: false,
                },
            );
            registry
                .by_path
                .entry(path.clone())
                .or_default()
                .insert(trap.id());
        }
        drop(bindings);
        drop(registry);
        Ok(Some(trap))
    }

    async fn verify_facts(&self, path: &Path, facts: &FileFacts) -> Result<bool, VfsError> {
        if let Some(expected) = facts.is_file {
            if self.is_file(path).await? != expected {
                return Ok(false);
            }
        }
        if let Some(expected) = facts.modified_time {
            if self.read_modified_time(path).await? != Some(expected) {
                return Ok(false);
            }
        }
        if let Some(expected) = &facts.text_hash {
            if &self.read_text_hash(path).await? != expected {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ── Internals ───────────────────────────────────────────

    pub(crate) fn file_for(&self, path: &Path) -> Arc<FileNode> {
        self.inner
            .files
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(FileNode::new(path, self.next_generation())))
            .clone()
    }

    /// The stale-read guard: if `file` is no longer the node registered for
    /// `path`, the read it served belongs to a superseded version and must
    /// not be delivered. The future never resolves; the caller is re-driven
    /// by the trap trigger that accompanied the supersession.
    pub(crate) async fn guard_current(&self, path: &Path, file: &Arc<FileNode>) {
        let current = self.inner.files.get(path).map(|e| e.value().generation());
        if current != Some(file.generation()) {
            warn!("Discarding stale read for {}", path.display());
            std::future::pending::<()>().await;
        }
    }

    /// Register a trap's interest in a path (first binding for that path).
    pub(crate) fn register_trap_path(&self, id: TrapId, path: &Path) {
        let mut registry = self.lock_registry();
        registry
            .by_path
            .entry(path.to_path_buf())
            .or_default()
            .insert(id);
    }

    /// Remove a trap from the registry and from every path it was bound to.
    pub(crate) fn deregister_trap(&self, id: TrapId) {
        let mut registry = self.lock_registry();
        Self::deregister_locked(&mut registry, id);
    }

    fn deregister_locked(registry: &mut TrapRegistry, id: TrapId) {
        let Some(state) = registry.traps.remove(&id) else {
            return;
        };
        let bindings = state.lock_bindings();
        for path in bindings.keys() {
            let emptied = registry
                .by_path
                .get_mut(path)
                .map(|set| {
                    set.remove(&id);
                    set.is_empty()
                })
                .unwrap_or(false);
            if emptied {
                registry.by_path.remove(path);
            }
        }
    }

    /// Fire every trap whose recorded bindings for `path` diverge from the
    /// event. One-shot: a fired trap is deregistered from every path before
    /// the notification goes out, so the same kind of event never re-fires
    /// it.
    fn trigger_traps(&self, path: &Path, cause: ChangeCause) {
        let mut registry = self.lock_registry();
        let Some(ids) = registry.by_path.get(path) else {
            return;
        };
        let mut fired: Vec<TrapId> = Vec::new();
        for id in ids.iter() {
            if let Some(state) = registry.traps.get(id) {
                if state
                    .lock_bindings()
                    .get(path)
                    .is_some_and(|binding| binding.diverges(cause))
                {
                    fired.push(*id);
                }
            }
        }
        for id in fired {
            debug!("Trap {id:?} triggered by {cause:?} on {}", path.display());
            Self::deregister_locked(&mut registry, id);
            let _ = self.inner.triggers.send(TrapTrigger {
                trap: id,
                path: path.to_path_buf(),
                cause,
            });
        }
    }

    fn next_generation(&self) -> u64 {
        self.inner.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    fn lock_registry(&self) -> MutexGuard<'_, TrapRegistry> {
        self.inner.traps.lock().expect("trap registry lock poisoned")
    }
}
