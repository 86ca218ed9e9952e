//! Per-path file entity with lazily memoized facts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use tokio::sync::OnceCell;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::VfsError;

/// The slice of `stat` the cache cares about. `modified_ms` is epoch millis,
/// matching the fingerprint persistence format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_file: bool,
    pub is_dir: bool,
    pub modified_ms: u64,
}

impl FileStat {
    /// Project the metadata fields the cache cares about.
    pub fn from_metadata(path: &Path, meta: &std::fs::Metadata) -> Result<Self, VfsError> {
        let modified = meta.modified().map_err(|e| VfsError::io(path, e))?;
        let modified_ms = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Ok(FileStat {
            is_file: meta.is_file(),
            is_dir: meta.is_dir(),
            modified_ms,
        })
    }
}

/// One version of one path.
///
/// Each fact is a single-flight memoized computation: the first caller starts
/// the I/O, everyone else awaits the same cell, and the settled result
/// (including an I/O failure) is never recomputed for this instance. The
/// owning cache replaces the whole instance, never mutates it, when the path
/// changes on disk; `generation` is the cache's replacement counter used to
/// detect reads that a replacement overtook.
///
/// `buffer` and `text` are independent reads by design: a file consumed both
/// ways costs two reads rather than pinning one copy to derive the other.
pub(crate) struct FileNode {
    path: PathBuf,
    generation: u64,
    stat: OnceCell<Result<Option<FileStat>, VfsError>>,
    buffer: OnceCell<Result<Arc<Vec<u8>>, VfsError>>,
    text: OnceCell<Result<Arc<str>, VfsError>>,
    text_hash: OnceCell<Result<String, VfsError>>,
    dir_list: OnceCell<Result<Arc<Vec<String>>, VfsError>>,
}

impl FileNode {
    pub(crate) fn new(path: &Path, generation: u64) -> Self {
        FileNode {
            path: path.to_path_buf(),
            generation,
            stat: OnceCell::new(),
            buffer: OnceCell::new(),
            text: OnceCell::new(),
            text_hash: OnceCell::new(),
            dir_list: OnceCell::new(),
        }
    }

    /// A node whose stat is already known (from a watcher event), saving the
    /// first I/O call.
    pub(crate) fn with_stat(path: &Path, generation: u64, stat: FileStat) -> Self {
        FileNode {
            stat: OnceCell::new_with(Some(Ok(Some(stat)))),
            ..FileNode::new(path, generation)
        }
    }

    /// A node for a path known to be gone (a removal event).
    pub(crate) fn absent(path: &Path, generation: u64) -> Self {
        FileNode {
            stat: OnceCell::new_with(Some(Ok(None))),
            ..FileNode::new(path, generation)
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Stat the path; `None` means it does not exist.
    pub(crate) async fn stat(&self) -> Result<Option<FileStat>, VfsError> {
        self.stat
            .get_or_init(|| async {
                match tokio::fs::metadata(&self.path).await {
                    Ok(meta) => FileStat::from_metadata(&self.path, &meta).map(Some),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(VfsError::io(&self.path, e)),
                }
            })
            .await
            .clone()
    }

    pub(crate) async fn is_file(&self) -> Result<bool, VfsError> {
        Ok(self.stat().await?.is_some_and(|s| s.is_file))
    }

    pub(crate) async fn is_directory(&self) -> Result<bool, VfsError> {
        Ok(self.stat().await?.is_some_and(|s| s.is_dir))
    }

    /// Modified time in epoch millis; `None` if the path does not exist.
    pub(crate) async fn modified_ms(&self) -> Result<Option<u64>, VfsError> {
        Ok(self.stat().await?.map(|s| s.modified_ms))
    }

    pub(crate) async fn buffer(&self) -> Result<Arc<Vec<u8>>, VfsError> {
        self.buffer
            .get_or_init(|| async {
                tokio::fs::read(&self.path)
                    .await
                    .map(Arc::new)
                    .map_err(|e| VfsError::io(&self.path, e))
            })
            .await
            .clone()
    }

    pub(crate) async fn text(&self) -> Result<Arc<str>, VfsError> {
        self.text
            .get_or_init(|| async {
                tokio::fs::read_to_string(&self.path)
                    .await
                    .map(Arc::from)
                    .map_err(|e| VfsError::io(&self.path, e))
            })
            .await
            .clone()
    }

    /// xxh3-64 of the text, as fixed-width hex. Fast but not
    /// collision-resistant; invalidation always pairs it with the modified
    /// time.
    pub(crate) async fn text_hash(&self) -> Result<String, VfsError> {
        self.text_hash
            .get_or_init(|| async {
                let text = self.text().await?;
                Ok(format!("{:016x}", xxh3_64(text.as_bytes())))
            })
            .await
            .clone()
    }

    /// Entry names of the directory, sorted.
    pub(crate) async fn dir_list(&self) -> Result<Arc<Vec<String>>, VfsError> {
        self.dir_list
            .get_or_init(|| async {
                let mut entries = Vec::new();
                let mut dir = tokio::fs::read_dir(&self.path)
                    .await
                    .map_err(|e| VfsError::io(&self.path, e))?;
                while let Some(entry) = dir
                    .next_entry()
                    .await
                    .map_err(|e| VfsError::io(&self.path, e))?
                {
                    entries.push(entry.file_name().to_string_lossy().into_owned());
                }
                entries.sort();
                Ok(Arc::new(entries))
            })
            .await
            .clone()
    }
}
