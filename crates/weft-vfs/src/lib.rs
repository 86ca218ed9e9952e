//! Weft VFS — memoizing file-system cache with dependency traps
//!
//! Every stat/read goes through a per-path [`file::FileNode`] that computes
//! each fact at most once. The [`cache::FileSystemCache`] owns one node per
//! path, replaces it on change notifications, and discards reads that were
//! superseded mid-flight. [`trap::Trap`] sessions record exactly which facts
//! a caller consulted, producing fingerprints that can be persisted and
//! rehydrated on a later build.

pub mod cache;
pub mod error;
pub mod file;
pub mod trap;

#[cfg(test)]
pub mod tests;

pub use cache::{ChangeCause, FileSystemCache, TrapTrigger};
pub use error::VfsError;
pub use file::FileStat;
pub use trap::{FileFacts, Fingerprint, Trap, TrapId};
