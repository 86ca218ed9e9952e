//! Dependency traps: per-caller fingerprints of consulted file facts.
//!
//! A trap mirrors the cache's accessors and records, per path, the minimal
//! facts that justified the caller's decisions. The first read of a facet
//! captures its value; later reads through the same trap never overwrite it.
//! The accumulated bindings convert to a [`Fingerprint`], the only durable
//! artifact this core defines.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::cache::{ChangeCause, FileSystemCache};
use crate::error::VfsError;
use crate::file::FileStat;

/// Handle identifying a trap in the cache's registry and in trigger
/// notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrapId(pub(crate) u64);

/// The recorded facts for one path. First value wins per field.
#[derive(Debug, Clone, Default)]
pub(crate) struct Binding {
    pub(crate) is_file: Option<bool>,
    pub(crate) modified_ms: Option<u64>,
    pub(crate) text_hash: Option<String>,
    /// Change sensitivity opted into by directory listings, which have no
    /// single fact to compare.
    pub(crate) on_change: bool,
}

impl Binding {
    /// Whether an event of this kind contradicts what the trap recorded.
    pub(crate) fn diverges(&self, cause: ChangeCause) -> bool {
        match cause {
            ChangeCause::Added => self.is_file == Some(false),
            ChangeCause::Removed => self.is_file == Some(true),
            ChangeCause::Changed => {
                self.modified_ms.is_some() || self.text_hash.is_some() || self.on_change
            }
        }
    }
}

pub(crate) struct TrapState {
    id: TrapId,
    bindings: Mutex<HashMap<PathBuf, Binding>>,
}

impl TrapState {
    pub(crate) fn new(id: TrapId) -> Self {
        TrapState {
            id,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn id(&self) -> TrapId {
        self.id
    }

    pub(crate) fn lock_bindings(&self) -> MutexGuard<'_, HashMap<PathBuf, Binding>> {
        self.bindings.lock().expect("trap bindings lock poisoned")
    }
}

/// The persisted facts for one path. Field names match the durable JSON
/// format consumed by the persistent cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_file: Option<bool>,
    /// Epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_hash: Option<String>,
}

/// The externally-visible form of a trap's bindings: path → recorded facts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint(pub BTreeMap<PathBuf, FileFacts>);

impl Fingerprint {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &FileFacts)> {
        self.0.iter()
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&FileFacts> {
        self.0.get(path.as_ref())
    }
}

/// A dependency-fingerprint-collecting facade over the file cache.
///
/// One-shot: once any recorded binding diverges, the trap fires on the
/// cache's trigger channel and is deregistered everywhere. Observing further
/// changes requires a new trap. Dropping a trap deregisters it.
pub struct Trap {
    cache: FileSystemCache,
    state: Arc<TrapState>,
}

impl Trap {
    pub(crate) fn new(cache: FileSystemCache, state: Arc<TrapState>) -> Self {
        Trap { cache, state }
    }

    pub fn id(&self) -> TrapId {
        self.state.id()
    }

    pub(crate) fn state(&self) -> &TrapState {
        &self.state
    }

    /// Whether the path exists as a file, recording the answer.
    pub async fn is_file(&self, path: impl AsRef<Path>) -> Result<bool, VfsError> {
        let path = path.as_ref();
        let value = self.cache.is_file(path).await?;
        self.bind(path, |binding| {
            if binding.is_file.is_none() {
                binding.is_file = Some(value);
            }
        });
        Ok(value)
    }

    /// Stat the path, recording existence and modified time.
    pub async fn stat(&self, path: impl AsRef<Path>) -> Result<Option<FileStat>, VfsError> {
        let path = path.as_ref();
        let stat = self.cache.stat(path).await?;
        self.bind(path, |binding| {
            if binding.is_file.is_none() {
                binding.is_file = Some(stat.is_some());
            }
            if let Some(stat) = stat {
                if binding.modified_ms.is_none() {
                    binding.modified_ms = Some(stat.modified_ms);
                }
            }
        });
        Ok(stat)
    }

    pub async fn read_modified_time(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Option<u64>, VfsError> {
        Ok(self.stat(path).await?.map(|s| s.modified_ms))
    }

    /// Read raw bytes; binds existence and modified time first.
    pub async fn read_buffer(&self, path: impl AsRef<Path>) -> Result<Arc<Vec<u8>>, VfsError> {
        let path = path.as_ref();
        self.read_modified_time(path).await?;
        self.cache.read_buffer(path).await
    }

    /// Read text; binds modified time *and* text hash. The hash is fast but
    /// not collision-resistant, so "content unchanged" always means both
    /// facts are unchanged, never the hash alone.
    pub async fn read_text(&self, path: impl AsRef<Path>) -> Result<Arc<str>, VfsError> {
        let path = path.as_ref();
        self.read_text_hash(path).await?;
        self.cache.read_text(path).await
    }

    pub async fn read_text_hash(&self, path: impl AsRef<Path>) -> Result<String, VfsError> {
        let path = path.as_ref();
        self.read_modified_time(path).await?;
        let hash = self.cache.read_text_hash(path).await?;
        self.bind(path, |binding| {
            if binding.text_hash.is_none() {
                binding.text_hash = Some(hash.clone());
            }
        });
        Ok(hash)
    }

    /// List a directory, opting the path into change sensitivity (a listing
    /// has no single comparable fact, so any change event diverges).
    pub async fn read_directory_contents(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Arc<Vec<String>>, VfsError> {
        let path = path.as_ref();
        let entries = self.cache.read_directory_contents(path).await?;
        self.bind(path, |binding| binding.on_change = true);
        Ok(entries)
    }

    /// The fingerprint of everything consulted through this trap so far.
    pub fn describe_dependencies(&self) -> Fingerprint {
        let bindings = self.state.lock_bindings();
        Fingerprint(
            bindings
                .iter()
                .map(|(path, binding)| {
                    (
                        path.clone(),
                        FileFacts {
                            is_file: binding.is_file,
                            modified_time: binding.modified_ms,
                            text_hash: binding.text_hash.clone(),
                        },
                    )
                })
                .collect(),
        )
    }

    /// Record facts for a path; the first binding registers this trap for
    /// notification on it. The bindings lock is released before touching the
    /// registry (registry-then-bindings is the global lock order).
    fn bind(&self, path: &Path, record: impl FnOnce(&mut Binding)) {
        let newly_bound = {
            let mut bindings = self.state.lock_bindings();
            let newly_bound = !bindings.contains_key(path);
            record(bindings.entry(path.to_path_buf()).or_default());
            newly_bound
        };
        if newly_bound {
            self.cache.register_trap_path(self.id(), path);
        }
    }
}

impl Drop for Trap {
    fn drop(&mut self) {
        self.cache.deregister_trap(self.id());
    }
}
