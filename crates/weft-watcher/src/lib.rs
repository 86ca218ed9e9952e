//! Weft Watcher — bridges OS file-system notifications into cache events

pub mod watcher;

pub use watcher::{FileWatcher, WatchEvent, WatcherService};
