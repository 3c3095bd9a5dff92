//! End-to-end synchronization scenarios against the in-memory store
//!
//! Run with: cargo test --test sync_tests

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use bucket_mirror::error::{MirrorError, Result};
use bucket_mirror::local::{FileOperation, LocalFileEvent};
use bucket_mirror::remote::{ObjectPage, RemoteObjectContent, RemoteObjectSummary};
use bucket_mirror::{InboundSynchronizer, MemoryStore, RemoteStore, SyncConfig, SyncOutcome};

const BUCKET: &str = "bucket";

type Events = Arc<Mutex<Vec<LocalFileEvent>>>;

fn recording_sync(
    config: SyncConfig,
) -> (InboundSynchronizer<Arc<MemoryStore>>, Arc<MemoryStore>, Events) {
    let store = Arc::new(MemoryStore::new());
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let sync = InboundSynchronizer::new(store.clone(), config)
        .unwrap()
        .with_listener(move |e: &LocalFileEvent| -> anyhow::Result<()> {
            sink.lock().push(e.clone());
            Ok(())
        });
    (sync, store, events)
}

fn completed(outcome: SyncOutcome) -> bucket_mirror::SyncReport {
    match outcome {
        SyncOutcome::Completed(report) => report,
        SyncOutcome::AlreadyRunning => panic!("expected a completed run"),
    }
}

fn subfolders() -> SyncConfig {
    SyncConfig {
        accept_subfolders: true,
        ..Default::default()
    }
}

// ============================================================================
// DOWNLOAD DECISIONS
// ============================================================================

#[test]
fn new_object_is_written_and_announced() {
    let tmp = TempDir::new().unwrap();
    let (sync, store, events) = recording_sync(subfolders());
    store.put_raw(
        BUCKET,
        "a/b.txt",
        Vec::new(),
        "d41d8cd98f00b204e9800998ecf8427e",
        HashMap::new(),
    );

    let report = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());

    let dest = tmp.path().join("a").join("b.txt");
    assert_eq!(report.downloaded, 1);
    assert!(dest.is_file());
    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].operation, FileOperation::Create);
    assert_eq!(events[0].file, dest);
}

#[test]
fn matching_local_file_is_not_rewritten() {
    let tmp = TempDir::new().unwrap();
    let (sync, store, events) = recording_sync(SyncConfig::default());
    store.put_object(BUCKET, "same.txt", "identical");
    fs::write(tmp.path().join("same.txt"), "identical").unwrap();

    let report = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());

    assert_eq!(report.unchanged, 1);
    assert_eq!(report.downloaded, 0);
    assert!(events.lock().is_empty());
    // Simple hashes are verified from the listing alone
    assert_eq!(store.get_calls(), 0);
}

#[test]
fn modified_local_file_is_replaced() {
    let tmp = TempDir::new().unwrap();
    let (sync, store, events) = recording_sync(SyncConfig::default());
    store.put_object(BUCKET, "doc.txt", "remote version");
    fs::write(tmp.path().join("doc.txt"), "local edit").unwrap();

    let report = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());

    assert_eq!(report.downloaded, 1);
    assert_eq!(
        fs::read_to_string(tmp.path().join("doc.txt")).unwrap(),
        "remote version"
    );
    assert_eq!(events.lock().len(), 1);
}

#[test]
fn composite_signature_without_digest_forces_download() {
    let tmp = TempDir::new().unwrap();
    let (sync, store, events) = recording_sync(SyncConfig::default());
    store.put_raw(BUCKET, "big.bin", "payload", "abc-3", HashMap::new());
    fs::write(tmp.path().join("big.bin"), "payload").unwrap();

    let report = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());

    assert_eq!(report.downloaded, 1);
    assert_eq!(events.lock().len(), 1);
    assert_eq!(store.released(), 1);
}

#[test]
fn composite_signature_with_matching_digest_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let (sync, store, events) = recording_sync(SyncConfig::default());
    store.put_multipart(BUCKET, "big.bin", "payload", 4, true);
    fs::write(tmp.path().join("big.bin"), "payload").unwrap();

    let report = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());

    assert_eq!(report.unchanged, 1);
    assert!(events.lock().is_empty());
    // Fetched for its metadata, then released without writing
    assert_eq!(store.get_calls(), 1);
    assert_eq!(store.released(), 1);
}

#[test]
fn composite_signature_with_different_digest_is_downloaded() {
    let tmp = TempDir::new().unwrap();
    let (sync, store, _events) = recording_sync(SyncConfig::default());
    store.put_multipart(BUCKET, "big.bin", "new payload", 4, true);
    fs::write(tmp.path().join("big.bin"), "old payload").unwrap();

    let report = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());

    assert_eq!(report.downloaded, 1);
    assert_eq!(
        fs::read_to_string(tmp.path().join("big.bin")).unwrap(),
        "new payload"
    );
}

#[test]
fn directory_in_place_of_file_is_left_alone() {
    let tmp = TempDir::new().unwrap();
    let (sync, store, events) = recording_sync(SyncConfig::default());
    store.put_object(BUCKET, "clash", "data");
    fs::create_dir(tmp.path().join("clash")).unwrap();

    let report = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());

    assert_eq!(report.not_regular_files, 1);
    assert_eq!(report.failed, 0);
    assert!(tmp.path().join("clash").is_dir());
    assert!(events.lock().is_empty());
}

#[test]
fn directory_in_place_of_composite_object_is_not_fetched() {
    let tmp = TempDir::new().unwrap();
    let (sync, store, events) = recording_sync(SyncConfig::default());
    store.put_multipart(BUCKET, "big.bin", "payload", 4, true);
    fs::create_dir(tmp.path().join("big.bin")).unwrap();

    let report = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());

    assert_eq!(report.not_regular_files, 1);
    assert_eq!(store.get_calls(), 0);
    assert_eq!(store.released(), 0);
    assert!(events.lock().is_empty());
}

#[test]
fn second_run_over_unchanged_bucket_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let config = SyncConfig {
        page_size: 100,
        ..Default::default()
    };
    let (sync, store, events) = recording_sync(config);
    store.put_object(BUCKET, "a.txt", "a");
    store.put_object(BUCKET, "b.txt", "b");

    completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());
    let second = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());

    assert_eq!(second.unchanged, 2);
    assert_eq!(events.lock().len(), 2);
}

// ============================================================================
// FAILURE ISOLATION
// ============================================================================

#[test]
fn one_failing_object_does_not_abort_the_batch() {
    let tmp = TempDir::new().unwrap();
    let (sync, store, _events) = recording_sync(SyncConfig::default());
    store.put_object(BUCKET, "a.txt", "a");
    store.put_object(BUCKET, "b.txt", "b");
    store.put_object(BUCKET, "c.txt", "c");
    store.fail_key("b.txt");

    let report = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());

    assert_eq!(report.failed, 1);
    assert_eq!(report.downloaded, 2);
    assert!(tmp.path().join("a.txt").exists());
    assert!(!tmp.path().join("b.txt").exists());
    assert!(tmp.path().join("c.txt").exists());
}

#[test]
fn stream_is_released_when_the_write_fails() {
    let tmp = TempDir::new().unwrap();
    let missing_root = tmp.path().join("does-not-exist");
    let (sync, store, _events) = recording_sync(SyncConfig::default());
    store.put_object(BUCKET, "a.txt", "a");

    let report = completed(sync.synchronize(&missing_root, BUCKET, None).unwrap());

    assert_eq!(report.failed, 1);
    assert_eq!(store.get_calls(), 1);
    assert_eq!(store.released(), 1);
    assert!(!missing_root.exists());
}

#[test]
fn failing_listener_does_not_fail_the_run() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.put_object(BUCKET, "a.txt", "a");
    let sync = InboundSynchronizer::new(store.clone(), SyncConfig::default())
        .unwrap()
        .with_listener(|_: &LocalFileEvent| -> anyhow::Result<()> {
            anyhow::bail!("downstream unavailable")
        });

    let report = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());

    assert_eq!(report.downloaded, 1);
    assert_eq!(report.failed, 0);
}

/// Store whose first `release` call fails
struct LeakyStore {
    inner: MemoryStore,
    release_failed: AtomicBool,
}

impl RemoteStore for LeakyStore {
    fn list_objects(
        &self,
        bucket: &str,
        folder: Option<&str>,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Option<ObjectPage>> {
        self.inner.list_objects(bucket, folder, cursor, page_size)
    }

    fn get_object(
        &self,
        bucket: &str,
        folder: Option<&str>,
        key: &str,
    ) -> Result<RemoteObjectContent> {
        self.inner.get_object(bucket, folder, key)
    }

    fn release(&self, content: RemoteObjectContent) -> Result<()> {
        if !self.release_failed.swap(true, Ordering::SeqCst) {
            return Err(MirrorError::CloudStorage(format!(
                "connection for {} already closed",
                content.key
            )));
        }
        self.inner.release(content)
    }
}

#[test]
fn release_failure_is_logged_and_the_run_continues() {
    let tmp = TempDir::new().unwrap();
    let store = LeakyStore {
        inner: MemoryStore::new(),
        release_failed: AtomicBool::new(false),
    };
    store.inner.put_object(BUCKET, "a.txt", "a");
    store.inner.put_object(BUCKET, "b.txt", "b");
    let sync = InboundSynchronizer::new(store, SyncConfig::default()).unwrap();

    let report = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());

    assert_eq!(report.downloaded, 2);
    assert_eq!(report.failed, 0);
    assert!(tmp.path().join("a.txt").is_file());
    assert!(tmp.path().join("b.txt").is_file());
    assert!(sync.store().release_failed.load(Ordering::SeqCst));
    assert_eq!(sync.store().inner.released(), 1);
}

#[test]
fn listing_failure_is_surfaced_and_releases_the_guard() {
    let tmp = TempDir::new().unwrap();
    let (sync, store, _events) = recording_sync(SyncConfig::default());
    store.put_object(BUCKET, "a.txt", "a");
    store.fail_listing(Some("connection refused"));

    let err = sync.synchronize(tmp.path(), BUCKET, None).unwrap_err();
    assert!(matches!(err, MirrorError::Listing(_)));
    assert!(err.is_retryable());
    assert_eq!(sync.cursor(), None);

    store.fail_listing(None);
    let report = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());
    assert_eq!(report.downloaded, 1);
}

#[test]
fn escaping_keys_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir(&root).unwrap();
    let (sync, store, _events) = recording_sync(subfolders());
    store.put_object(BUCKET, "../outside.txt", "x");

    let report = completed(sync.synchronize(&root, BUCKET, None).unwrap());

    assert_eq!(report.failed, 1);
    assert!(!tmp.path().join("outside.txt").exists());
}

// ============================================================================
// PAGINATION
// ============================================================================

#[test]
fn cursor_persists_until_listing_is_exhausted() {
    let tmp = TempDir::new().unwrap();
    let config = SyncConfig {
        page_size: 2,
        max_batches_per_run: 1,
        ..Default::default()
    };
    let (sync, store, _events) = recording_sync(config);
    for name in ["1.txt", "2.txt", "3.txt", "4.txt", "5.txt"] {
        store.put_object(BUCKET, name, name);
    }

    let first = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());
    assert_eq!(first.downloaded, 2);
    assert!(!first.exhausted);
    assert_eq!(sync.cursor().as_deref(), Some("2.txt"));

    let second = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());
    assert_eq!(second.resumed_from.as_deref(), Some("2.txt"));
    assert_eq!(sync.cursor().as_deref(), Some("4.txt"));

    let third = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());
    assert_eq!(third.downloaded, 1);
    assert!(third.exhausted);
    assert_eq!(sync.cursor(), None);

    // Exhausted: the next call starts from the beginning again
    let fourth = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());
    assert_eq!(fourth.resumed_from, None);
    assert_eq!(fourth.unchanged, 2);
}

/// Store that reports "nothing to list" instead of an empty final page
struct SparseTailStore {
    inner: MemoryStore,
}

impl RemoteStore for SparseTailStore {
    fn list_objects(
        &self,
        bucket: &str,
        folder: Option<&str>,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Option<ObjectPage>> {
        Ok(self
            .inner
            .list_objects(bucket, folder, cursor, page_size)?
            .filter(|page| !page.items.is_empty() || page.next_cursor.is_some()))
    }

    fn get_object(
        &self,
        bucket: &str,
        folder: Option<&str>,
        key: &str,
    ) -> Result<RemoteObjectContent> {
        self.inner.get_object(bucket, folder, key)
    }
}

#[test]
fn absent_page_after_cursor_restarts_the_listing() {
    let tmp = TempDir::new().unwrap();
    let store = SparseTailStore {
        inner: MemoryStore::new(),
    };
    for name in ["b.txt", "c.txt", "d.txt"] {
        store.inner.put_object(BUCKET, name, name);
    }
    let config = SyncConfig {
        page_size: 2,
        max_batches_per_run: 1,
        ..Default::default()
    };
    let sync = InboundSynchronizer::new(store, config).unwrap();

    completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());
    assert_eq!(sync.cursor().as_deref(), Some("c.txt"));

    // Everything past the cursor disappears; a key sorting before it appears
    sync.store().inner.delete_object(BUCKET, "d.txt");
    sync.store().inner.put_object(BUCKET, "a.txt", "a.txt");

    let drained = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());
    assert!(drained.exhausted);
    assert_eq!(drained.downloaded, 0);
    assert_eq!(sync.cursor(), None);

    let restarted = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());
    assert_eq!(restarted.resumed_from, None);
    assert_eq!(restarted.downloaded, 1);
    assert!(tmp.path().join("a.txt").is_file());
}

#[test]
fn pages_per_call_are_bounded() {
    let tmp = TempDir::new().unwrap();
    let config = SyncConfig {
        page_size: 3,
        max_batches_per_run: 2,
        ..Default::default()
    };
    let (sync, store, _events) = recording_sync(config);
    for i in 0..20 {
        store.put_object(BUCKET, &format!("{:02}.txt", i), format!("{}", i));
    }

    let report = completed(sync.synchronize(tmp.path(), BUCKET, None).unwrap());

    assert_eq!(report.pages, 2);
    assert_eq!(report.listed, 6);
    assert_eq!(store.list_calls(), 2);
}

#[test]
fn folder_scope_limits_what_is_mirrored() {
    let tmp = TempDir::new().unwrap();
    let (sync, store, _events) = recording_sync(SyncConfig::default());
    store.put_object(BUCKET, "docs/a.txt", "a");
    store.put_object(BUCKET, "docs/deep/b.txt", "b");
    store.put_object(BUCKET, "other/c.txt", "c");

    let report = completed(sync.synchronize(tmp.path(), BUCKET, Some("docs")).unwrap());

    assert_eq!(report.downloaded, 1);
    assert_eq!(report.filtered, 1);
    assert!(tmp.path().join("docs").join("a.txt").is_file());
    assert!(!tmp.path().join("docs").join("deep").exists());
    assert!(!tmp.path().join("other").exists());
}

// ============================================================================
// CONCURRENCY
// ============================================================================

/// Store whose first listing call blocks until released by the test
struct GatedStore {
    inner: MemoryStore,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<Option<mpsc::Receiver<()>>>,
}

impl RemoteStore for GatedStore {
    fn list_objects(
        &self,
        bucket: &str,
        folder: Option<&str>,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Option<ObjectPage>> {
        if let Some(entered) = self.entered.lock().take() {
            entered.send(()).unwrap();
            let release = self.release.lock().take().unwrap();
            release.recv_timeout(Duration::from_secs(10)).unwrap();
        }
        self.inner.list_objects(bucket, folder, cursor, page_size)
    }

    fn get_object(
        &self,
        bucket: &str,
        folder: Option<&str>,
        key: &str,
    ) -> Result<RemoteObjectContent> {
        self.inner.get_object(bucket, folder, key)
    }
}

#[test]
fn overlapping_calls_are_noops() {
    let tmp = TempDir::new().unwrap();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let store = GatedStore {
        inner: MemoryStore::new(),
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(Some(release_rx)),
    };
    store.inner.put_object(BUCKET, "a.txt", "a");

    let config = SyncConfig {
        page_size: 1,
        ..Default::default()
    };
    let sync = Arc::new(InboundSynchronizer::new(store, config).unwrap());
    let root: PathBuf = tmp.path().to_path_buf();

    let runner = {
        let sync = sync.clone();
        let root = root.clone();
        thread::spawn(move || sync.synchronize(&root, BUCKET, None))
    };

    entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    let cursor_before = sync.cursor();
    let overlapping = sync.synchronize(&root, BUCKET, None).unwrap();
    assert!(overlapping.is_noop());
    assert_eq!(sync.cursor(), cursor_before);
    assert_eq!(sync.store().inner.list_calls(), 0);

    release_tx.send(()).unwrap();
    let first = completed(runner.join().unwrap().unwrap());
    assert_eq!(first.downloaded, 1);
    assert_eq!(sync.store().inner.list_calls(), 1);
}

#[test]
fn summaries_round_trip_through_json() {
    let summary = RemoteObjectSummary::new("a/b.txt", "abc-2");
    let json = serde_json::to_string(&summary).unwrap();
    let back: RemoteObjectSummary = serde_json::from_str(&json).unwrap();
    assert_eq!(back, summary);
    assert!(Path::new(&back.key).parent().is_some());
}
