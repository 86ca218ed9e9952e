//! Error type for file-system cache operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

/// I/O failure while computing a file fact.
///
/// Cloneable (the source is shared behind an `Arc`) so a failed computation
/// can be memoized and handed to every caller of the same facet. Not-found
/// is deliberately absent: existence checks fold it into `is_file == false`.
#[derive(Debug, Clone, Error)]
pub enum VfsError {
    #[error("io error for {path}: {source}")]
    Io {
        path: PathBuf,
        source: Arc<std::io::Error>,
    },
}

impl VfsError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        VfsError::Io {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }
}
