//! Unit tests for the file-system cache, traps, and rehydration.

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::timeout;

use crate::cache::{ChangeCause, FileSystemCache};
use crate::file::FileStat;
use crate::trap::{FileFacts, Fingerprint};

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn missing_path_is_not_a_file() {
    let dir = TempDir::new().unwrap();
    let cache = FileSystemCache::new();
    let missing = dir.path().join("missing.js");

    assert!(!cache.is_file(&missing).await.unwrap());
    assert_eq!(cache.stat(&missing).await.unwrap(), None);
    assert_eq!(cache.read_modified_time(&missing).await.unwrap(), None);
}

#[tokio::test]
async fn facets_are_memoized_per_file_version() {
    let dir = TempDir::new().unwrap();
    let cache = FileSystemCache::new();
    let path = write(&dir, "a.js", "one");

    assert_eq!(&*cache.read_text(&path).await.unwrap(), "one");

    // Disk changes without a notification are invisible: the cached node
    // already memoized its text.
    std::fs::write(&path, "two").unwrap();
    assert_eq!(&*cache.read_text(&path).await.unwrap(), "one");

    // The notification replaces the node and the next read sees fresh data.
    cache.file_changed(&path, None);
    assert_eq!(&*cache.read_text(&path).await.unwrap(), "two");
}

#[tokio::test]
async fn text_hash_is_stable_until_the_file_changes() {
    let dir = TempDir::new().unwrap();
    let cache = FileSystemCache::new();
    let path = write(&dir, "a.js", "test");

    let first = cache.read_text_hash(&path).await.unwrap();
    let second = cache.read_text_hash(&path).await.unwrap();
    assert_eq!(first, second);

    std::fs::write(&path, "different").unwrap();
    cache.file_changed(&path, None);
    let third = cache.read_text_hash(&path).await.unwrap();
    assert_ne!(first, third);
}

#[tokio::test]
async fn buffer_and_text_read_the_same_bytes() {
    let dir = TempDir::new().unwrap();
    let cache = FileSystemCache::new();
    let path = write(&dir, "a.js", "payload");

    let buffer = cache.read_buffer(&path).await.unwrap();
    let text = cache.read_text(&path).await.unwrap();
    assert_eq!(buffer.as_slice(), text.as_bytes());
}

#[tokio::test]
async fn directory_contents_are_sorted() {
    let dir = TempDir::new().unwrap();
    let cache = FileSystemCache::new();
    write(&dir, "zebra.js", "");
    write(&dir, "alpha.js", "");

    assert!(cache.is_directory(dir.path()).await.unwrap());
    let entries = cache.read_directory_contents(dir.path()).await.unwrap();
    assert_eq!(entries.as_slice(), ["alpha.js", "zebra.js"]);
}

#[tokio::test]
async fn added_event_pre_seeds_stat() {
    let cache = FileSystemCache::new();
    // The path never exists on disk; every answer comes from the seed.
    let path = PathBuf::from("/virtual/seeded.js");
    cache.file_added(
        &path,
        Some(FileStat {
            is_file: true,
            is_dir: false,
            modified_ms: 123,
        }),
    );

    assert!(cache.is_file(&path).await.unwrap());
    assert_eq!(cache.read_modified_time(&path).await.unwrap(), Some(123));
}

#[tokio::test]
async fn duplicate_added_events_keep_the_existing_node() {
    let dir = TempDir::new().unwrap();
    let cache = FileSystemCache::new();
    let path = write(&dir, "a.js", "one");

    assert_eq!(&*cache.read_text(&path).await.unwrap(), "one");
    std::fs::write(&path, "two").unwrap();

    // A duplicate scan result is not an invalidation.
    cache.file_added(&path, None);
    assert_eq!(&*cache.read_text(&path).await.unwrap(), "one");
}

#[tokio::test]
async fn removed_event_pre_seeds_absence() {
    let dir = TempDir::new().unwrap();
    let cache = FileSystemCache::new();
    let path = write(&dir, "a.js", "still on disk");

    cache.file_removed(&path);
    assert!(!cache.is_file(&path).await.unwrap());
    assert_eq!(cache.stat(&path).await.unwrap(), None);
}

#[tokio::test]
async fn stale_read_never_resolves() {
    let dir = TempDir::new().unwrap();
    let cache = FileSystemCache::new();
    let path = write(&dir, "a.js", "one");

    // Take the node an in-flight read would have started on, then supersede
    // it. The guard must strand the delivery rather than hand out old data.
    let file = cache.file_for(&path);
    file.text().await.unwrap();
    cache.file_changed(&path, None);

    let stranded = async {
        let out = file.text().await;
        cache.guard_current(&path, &file).await;
        out
    };
    assert!(timeout(Duration::from_millis(100), stranded).await.is_err());
}

#[tokio::test]
async fn trap_on_missing_file_fires_once_on_added() {
    let dir = TempDir::new().unwrap();
    let cache = FileSystemCache::new();
    let path = dir.path().join("x.js");

    let trap = cache.create_trap();
    assert!(!trap.is_file(&path).await.unwrap());

    let mut triggers = cache.subscribe_triggers();
    cache.file_added(&path, None);

    let trigger = triggers.try_recv().unwrap();
    assert_eq!(trigger.trap, trap.id());
    assert_eq!(trigger.path, path);
    assert_eq!(trigger.cause, ChangeCause::Added);

    // One-shot: a second added event for the same path never re-fires.
    cache.file_added(&path, None);
    assert!(triggers.try_recv().is_err());
}

#[tokio::test]
async fn changed_event_only_fires_traps_that_recorded_content_facts() {
    let dir = TempDir::new().unwrap();
    let cache = FileSystemCache::new();
    let path = write(&dir, "a.js", "body");

    let content_trap = cache.create_trap();
    content_trap.read_text(&path).await.unwrap();

    let existence_trap = cache.create_trap();
    assert!(existence_trap.is_file(&path).await.unwrap());

    let mut triggers = cache.subscribe_triggers();
    cache.file_changed(&path, None);

    let trigger = triggers.try_recv().unwrap();
    assert_eq!(trigger.trap, content_trap.id());
    assert_eq!(trigger.cause, ChangeCause::Changed);
    // The existence-only trap recorded no modified time or hash, so a change
    // does not contradict it.
    assert!(triggers.try_recv().is_err());

    // But removal does.
    cache.file_removed(&path);
    let trigger = triggers.try_recv().unwrap();
    assert_eq!(trigger.trap, existence_trap.id());
    assert_eq!(trigger.cause, ChangeCause::Removed);
}

#[tokio::test]
async fn directory_listing_opts_into_change_sensitivity() {
    let dir = TempDir::new().unwrap();
    let cache = FileSystemCache::new();
    write(&dir, "a.js", "");

    let trap = cache.create_trap();
    trap.read_directory_contents(dir.path()).await.unwrap();

    let mut triggers = cache.subscribe_triggers();
    cache.file_changed(dir.path(), None);

    let trigger = triggers.try_recv().unwrap();
    assert_eq!(trigger.trap, trap.id());
    assert_eq!(trigger.cause, ChangeCause::Changed);
}

#[tokio::test]
async fn dropped_traps_stop_receiving_triggers() {
    let dir = TempDir::new().unwrap();
    let cache = FileSystemCache::new();
    let path = write(&dir, "a.js", "body");

    let trap = cache.create_trap();
    trap.read_text(&path).await.unwrap();
    drop(trap);

    let mut triggers = cache.subscribe_triggers();
    cache.file_changed(&path, None);
    assert!(triggers.try_recv().is_err());
}

#[tokio::test]
async fn fingerprint_records_exactly_the_consulted_facts() {
    let dir = TempDir::new().unwrap();
    let cache = FileSystemCache::new();
    let path = write(&dir, "f.js", "test");

    let trap = cache.create_trap();
    trap.read_text(&path).await.unwrap();

    let fingerprint = trap.describe_dependencies();
    let facts = fingerprint.get(&path).unwrap();
    assert_eq!(facts.is_file, Some(true));
    assert!(facts.modified_time.is_some());
    assert_eq!(
        facts.text_hash.as_deref(),
        Some(cache.read_text_hash(&path).await.unwrap().as_str())
    );
}

#[test]
fn fingerprint_serializes_with_the_durable_field_names() {
    let mut fingerprint = Fingerprint::default();
    fingerprint.0.insert(
        PathBuf::from("/f.js"),
        FileFacts {
            is_file: Some(true),
            modified_time: Some(42),
            text_hash: Some("abc".to_string()),
        },
    );

    let json = serde_json::to_string(&fingerprint).unwrap();
    assert!(json.contains("\"isFile\":true"));
    assert!(json.contains("\"modifiedTime\":42"));
    assert!(json.contains("\"textHash\":\"abc\""));

    let round: Fingerprint = serde_json::from_str(&json).unwrap();
    assert_eq!(round, fingerprint);
}

#[tokio::test]
async fn rehydration_succeeds_when_every_fact_matches() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "f.js", "body");

    let fingerprint = {
        let cache = FileSystemCache::new();
        let trap = cache.create_trap();
        trap.read_text(&path).await.unwrap();
        trap.describe_dependencies()
    };

    // A fresh cache, as on a later build with the fingerprint loaded from
    // the persistent store.
    let cache = FileSystemCache::new();
    let trap = cache
        .rehydrate_trap(&fingerprint)
        .await
        .unwrap()
        .expect("fingerprint should rehydrate");

    // The rehydrated trap is live: it is already registered for the paths it
    // was seeded with.
    let mut triggers = cache.subscribe_triggers();
    cache.file_changed(&path, None);
    let trigger = triggers.try_recv().unwrap();
    assert_eq!(trigger.trap, trap.id());
}

#[tokio::test]
async fn rehydration_is_all_or_nothing() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "f.js", "body");
    let other = write(&dir, "g.js", "other");

    let fingerprint = {
        let cache = FileSystemCache::new();
        let trap = cache.create_trap();
        trap.read_text(&path).await.unwrap();
        trap.read_text(&other).await.unwrap();
        trap.describe_dependencies()
    };

    // One file changes content; both recorded paths were fine a moment ago,
    // but a single mismatch fails the whole fingerprint.
    std::fs::write(&path, "edited").unwrap();
    let cache = FileSystemCache::new();
    assert!(cache.rehydrate_trap(&fingerprint).await.unwrap().is_none());
}

#[tokio::test]
async fn rehydration_rejects_a_wrong_hash_alone() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "f.js", "body");

    let mut fingerprint = Fingerprint::default();
    fingerprint.0.insert(
        path.clone(),
        FileFacts {
            is_file: Some(true),
            modified_time: None,
            text_hash: Some("0000000000000000".to_string()),
        },
    );

    let cache = FileSystemCache::new();
    assert!(cache.rehydrate_trap(&fingerprint).await.unwrap().is_none());
}
