//! Tests for RangeStore
//!
//! These tests verify:
//! - Scans return exactly the records inside the window, oldest first
//! - Prefixes (including ones sharing leading bytes) never leak into each other
//! - An empty prefix scans the whole store, filtered by key time
//! - Decode, iterator, allocation and commit failures surface as errors
//! - Records and sequences survive a restart
//! - Concurrent inserts never overwrite each other

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use profmeta::config::{Config, WalSyncStrategy};
use profmeta::engine::EngineIterator;
use profmeta::keys::{self, build_insert_key};
use profmeta::{
    Engine, KvEngine, KvIterator, MetaError, ProfileMeta, RangeStore, Result, TimeWindow,
    WriteBatch,
};
use tempfile::TempDir;

const SECOND: i64 = 1_000_000_000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;

/// A fixed "now" so windows are reproducible
const T: i64 = 1_700_000_000 * SECOND;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 128 })
        .sequence_batch_size(16)
        .build()
}

fn setup_temp_store() -> (TempDir, RangeStore) {
    let dir = TempDir::new().unwrap();
    let store = RangeStore::open(config(&dir)).unwrap();
    (dir, store)
}

fn meta(id: u64, at: i64) -> ProfileMeta {
    ProfileMeta::new(id, at / 1_000_000, 10 * SECOND, "cpu", "nanoseconds")
}

fn window(min: i64, max: i64) -> TimeWindow {
    TimeWindow::new(min, max).unwrap()
}

fn scan_ids<E: KvEngine>(store: &RangeStore<E>, prefix: &[u8], window: TimeWindow) -> Vec<u64> {
    store
        .scan(prefix, window)
        .unwrap()
        .map(|r| r.unwrap().profile_id)
        .collect()
}

/// Engine wrapper that can fail commits, counter refills or iterator steps
struct FlakyEngine {
    inner: Engine,
    fail_commits: AtomicBool,
    fail_counters: AtomicBool,
    /// Successful `next` calls each new iterator allows before failing
    iter_steps: AtomicUsize,
}

impl FlakyEngine {
    fn new(inner: Engine) -> Self {
        Self {
            inner,
            fail_commits: AtomicBool::new(false),
            fail_counters: AtomicBool::new(false),
            iter_steps: AtomicUsize::new(usize::MAX),
        }
    }
}

impl KvEngine for FlakyEngine {
    type Iter = FlakyIterator;

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(MetaError::Engine("injected commit failure".to_string()));
        }
        self.inner.commit(batch)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn iter(&self) -> Result<FlakyIterator> {
        Ok(FlakyIterator {
            inner: self.inner.iter()?,
            steps_left: self.iter_steps.load(Ordering::SeqCst),
        })
    }

    fn advance_counter(&self, name: &[u8], by: u64) -> Result<u64> {
        if self.fail_counters.load(Ordering::SeqCst) {
            return Err(MetaError::Engine("injected counter failure".to_string()));
        }
        self.inner.advance_counter(name, by)
    }
}

struct FlakyIterator {
    inner: EngineIterator,
    steps_left: usize,
}

impl KvIterator for FlakyIterator {
    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.inner.seek(target)
    }

    fn valid(&self) -> bool {
        self.inner.valid()
    }

    fn next(&mut self) -> Result<()> {
        if self.steps_left == 0 {
            return Err(MetaError::Engine("injected iterator failure".to_string()));
        }
        self.steps_left -= 1;
        self.inner.next()
    }

    fn key(&self) -> &[u8] {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }
}

fn setup_flaky_store() -> (TempDir, Arc<FlakyEngine>, RangeStore<FlakyEngine>) {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(FlakyEngine::new(Engine::open(config(&dir)).unwrap()));
    let store = RangeStore::with_engine(Arc::clone(&engine), 16).unwrap();
    (dir, engine, store)
}

// =============================================================================
// Scan Window Tests
// =============================================================================

#[test]
fn test_scan_returns_records_inside_window_in_order() {
    let (_dir, store) = setup_temp_store();
    store.insert_at(b"A", T - 2 * HOUR, &meta(1, T - 2 * HOUR)).unwrap();
    store.insert_at(b"A", T - HOUR, &meta(2, T - HOUR)).unwrap();
    store.insert_at(b"A", T - 30 * MINUTE, &meta(3, T - 30 * MINUTE)).unwrap();

    let records: Vec<ProfileMeta> = store
        .scan(b"A", window(T - 90 * MINUTE, T))
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();

    assert_eq!(records, vec![meta(2, T - HOUR), meta(3, T - 30 * MINUTE)]);
}

#[test]
fn test_scan_order_is_by_key_time_not_insert_order() {
    let (_dir, store) = setup_temp_store();
    let times = [5, 1, 4, 2, 3];
    for (i, t) in times.iter().enumerate() {
        store.insert_at(b"A", T + t * SECOND, &meta(i as u64, T)).unwrap();
    }

    let entries: Vec<_> = store
        .scan(b"A", TimeWindow::all())
        .unwrap()
        .entries()
        .map(|e| e.unwrap())
        .collect();

    let scanned: Vec<i64> = entries.iter().map(|e| e.time).collect();
    assert_eq!(scanned, (1..=5).map(|t| T + t * SECOND).collect::<Vec<_>>());
}

#[test]
fn test_scan_entries_are_non_decreasing_and_inside_window() {
    let (_dir, store) = setup_temp_store();
    for i in 0..200i64 {
        // Deliberately repeats times so sequences break ties
        let at = T + (i * 7919 % 50) * SECOND;
        store.insert_at(b"A", at, &meta(i as u64, at)).unwrap();
    }

    let w = window(T + 10 * SECOND, T + 40 * SECOND);
    let entries: Vec<_> = store
        .scan(b"A", w)
        .unwrap()
        .entries()
        .map(|e| e.unwrap())
        .collect();

    assert!(!entries.is_empty());
    assert!(entries.iter().all(|e| w.contains(e.time)));
    assert!(entries
        .windows(2)
        .all(|p| (p[0].time, p[0].seq) < (p[1].time, p[1].seq)));
    assert_eq!(entries.len(), store.count(b"A", w).unwrap());
}

#[test]
fn test_window_is_half_open() {
    let (_dir, store) = setup_temp_store();
    store.insert_at(b"A", T, &meta(1, T)).unwrap();
    store.insert_at(b"A", T + SECOND, &meta(2, T)).unwrap();

    assert_eq!(scan_ids(&store, b"A", window(T, T + SECOND)), vec![1]);
    assert_eq!(scan_ids(&store, b"A", window(T + 1, T + SECOND + 1)), vec![2]);
    assert!(scan_ids(&store, b"A", window(T, T)).is_empty());
}

#[test]
fn test_scan_of_empty_store_and_unknown_prefix() {
    let (_dir, store) = setup_temp_store();
    assert!(scan_ids(&store, b"A", TimeWindow::all()).is_empty());

    store.insert_at(b"A", T, &meta(1, T)).unwrap();
    assert!(scan_ids(&store, b"Z", TimeWindow::all()).is_empty());
}

#[test]
fn test_negative_times_sort_before_positive() {
    let (_dir, store) = setup_temp_store();
    store.insert_at(b"A", SECOND, &meta(2, 0)).unwrap();
    store.insert_at(b"A", -SECOND, &meta(1, 0)).unwrap();

    assert_eq!(scan_ids(&store, b"A", TimeWindow::all()), vec![1, 2]);
    assert_eq!(scan_ids(&store, b"A", window(i64::MIN, 0)), vec![1]);
}

#[test]
fn test_insert_uses_current_time() {
    let (_dir, store) = setup_temp_store();
    let before = keys::now_nanos();
    store.insert(b"A", &meta(1, before)).unwrap();

    let entries: Vec<_> = store
        .scan(b"A", TimeWindow::last(Duration::from_secs(60)))
        .unwrap()
        .entries()
        .map(|e| e.unwrap())
        .collect();

    assert_eq!(entries.len(), 1);
    assert!(entries[0].time >= before);
}

// =============================================================================
// Prefix Isolation Tests
// =============================================================================

#[test]
fn test_prefixes_do_not_leak() {
    let (_dir, store) = setup_temp_store();
    store.insert_at(b"A", T, &meta(1, T)).unwrap();
    store.insert_at(b"B", T, &meta(2, T)).unwrap();

    assert_eq!(scan_ids(&store, b"A", TimeWindow::all()), vec![1]);
    assert_eq!(scan_ids(&store, b"B", TimeWindow::all()), vec![2]);
}

#[test]
fn test_longer_sibling_prefix_is_excluded() {
    let (_dir, store) = setup_temp_store();
    store.insert_at(b"A", T, &meta(1, T)).unwrap();
    // "AB" starts with "A" and its keys can fall inside A's byte range
    store.insert_at(b"AB", T, &meta(2, T)).unwrap();
    store.insert_at(b"A", T + SECOND, &meta(3, T)).unwrap();

    assert_eq!(scan_ids(&store, b"A", TimeWindow::all()), vec![1, 3]);
    assert_eq!(scan_ids(&store, b"AB", TimeWindow::all()), vec![2]);
}

#[test]
fn test_empty_prefix_scans_every_prefix() {
    let (_dir, store) = setup_temp_store();
    store.insert_at(b"A", 1000, &meta(1, 0)).unwrap();
    store.insert_at(b"gob", 2000, &meta(2, 0)).unwrap();
    store.insert_at(b"", 3000, &meta(3, 0)).unwrap();
    store.insert_at(b"A", 5000, &meta(4, 0)).unwrap();

    // Key order: grouped by prefix, not globally by time
    assert_eq!(scan_ids(&store, b"", TimeWindow::all()), vec![1, 4, 2, 3]);
}

#[test]
fn test_empty_prefix_filters_by_key_time() {
    let (_dir, store) = setup_temp_store();
    store.insert_at(b"A", 1000, &meta(1, 0)).unwrap();
    store.insert_at(b"gob", 2000, &meta(2, 0)).unwrap();
    store.insert_at(b"", 3000, &meta(3, 0)).unwrap();
    store.insert_at(b"A", 5000, &meta(4, 0)).unwrap();

    let w = window(1500, 4000);
    let entries: Vec<_> = store
        .scan(b"", w)
        .unwrap()
        .entries()
        .map(|e| e.unwrap())
        .collect();

    let times: Vec<i64> = entries.iter().map(|e| e.time).collect();
    assert_eq!(times, vec![2000, 3000]);
    assert_eq!(store.count(b"", w).unwrap(), 2);
}

// =============================================================================
// Error Propagation Tests
// =============================================================================

#[test]
fn test_malformed_value_is_surfaced_by_scan() {
    let (_dir, store) = setup_temp_store();
    store.insert_at(b"A", T, &meta(1, T)).unwrap();
    let bad = build_insert_key(b"A", T + SECOND, u64::MAX);
    store.engine().put(&bad, b"\x01garbage").unwrap();
    store.insert_at(b"A", T + 2 * SECOND, &meta(3, T)).unwrap();

    let results: Vec<_> = store.scan(b"A", TimeWindow::all()).unwrap().collect();

    // The scan ends at the first error
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().unwrap().profile_id, 1);
    assert!(matches!(results[1], Err(MetaError::MalformedRecord(_))));
}

#[test]
fn test_count_does_not_decode() {
    let (_dir, store) = setup_temp_store();
    store.insert_at(b"A", T, &meta(1, T)).unwrap();
    let bad = build_insert_key(b"A", T + SECOND, 0);
    store.engine().put(&bad, b"").unwrap();

    assert_eq!(store.count(b"A", TimeWindow::all()).unwrap(), 2);
}

#[test]
fn test_iterator_error_mid_scan_ends_the_scan() {
    let (_dir, engine, store) = setup_flaky_store();
    for i in 0..3 {
        store.insert_at(b"A", T + i * SECOND, &meta(i as u64, T)).unwrap();
    }
    engine.iter_steps.store(1, Ordering::SeqCst);

    let results: Vec<_> = store.scan(b"A", TimeWindow::all()).unwrap().collect();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().profile_id, 0);
    assert_eq!(results[1].as_ref().unwrap().profile_id, 1);
    assert!(matches!(results[2], Err(MetaError::Engine(_))));
}

#[test]
fn test_count_propagates_iterator_error() {
    let (_dir, engine, store) = setup_flaky_store();
    store.insert_at(b"A", T, &meta(1, T)).unwrap();
    store.insert_at(b"A", T + SECOND, &meta(2, T)).unwrap();
    engine.iter_steps.store(0, Ordering::SeqCst);

    assert!(matches!(
        store.count(b"A", TimeWindow::all()),
        Err(MetaError::Engine(_))
    ));
}

#[test]
fn test_insert_fails_when_sequence_refill_fails() {
    let (_dir, engine, store) = setup_flaky_store();
    engine.fail_counters.store(true, Ordering::SeqCst);

    let err = store.insert_at(b"A", T, &meta(1, T)).unwrap_err();

    assert!(matches!(err, MetaError::Allocation { .. }), "got {:?}", err);
    assert!(scan_ids(&store, b"A", TimeWindow::all()).is_empty());

    engine.fail_counters.store(false, Ordering::SeqCst);
    store.insert_at(b"A", T, &meta(2, T)).unwrap();
    assert_eq!(scan_ids(&store, b"A", TimeWindow::all()), vec![2]);
}

#[test]
fn test_failed_commit_leaves_nothing_visible() {
    let (_dir, engine, store) = setup_flaky_store();
    store.insert_at(b"A", T, &meta(1, T)).unwrap();

    engine.fail_commits.store(true, Ordering::SeqCst);
    let err = store.insert_at(b"A", T + SECOND, &meta(2, T)).unwrap_err();
    assert!(matches!(err, MetaError::Engine(_)), "got {:?}", err);
    assert_eq!(scan_ids(&store, b"A", TimeWindow::all()), vec![1]);

    engine.fail_commits.store(false, Ordering::SeqCst);
    store.insert_at(b"A", T + 2 * SECOND, &meta(3, T)).unwrap();
    assert_eq!(scan_ids(&store, b"A", TimeWindow::all()), vec![1, 3]);
}

#[test]
fn test_zero_batch_size_is_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(Engine::open(config(&dir)).unwrap());

    assert!(matches!(
        RangeStore::with_engine(engine, 0),
        Err(MetaError::Config(_))
    ));
}

// =============================================================================
// Snapshot Tests
// =============================================================================

#[test]
fn test_scan_does_not_see_later_inserts() {
    let (_dir, store) = setup_temp_store();
    store.insert_at(b"A", T, &meta(1, T)).unwrap();

    let scan = store.scan(b"A", TimeWindow::all()).unwrap();
    store.insert_at(b"A", T + SECOND, &meta(2, T)).unwrap();

    let ids: Vec<u64> = scan.map(|r| r.unwrap().profile_id).collect();
    assert_eq!(ids, vec![1]);
    assert_eq!(scan_ids(&store, b"A", TimeWindow::all()), vec![1, 2]);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_inserts_produce_unique_keys() {
    let (_dir, store) = setup_temp_store();
    let store = Arc::new(store);

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..250u64)
                    .map(|i| store.insert_at(b"A", T, &meta(t * 1000 + i, T)).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut keys = HashSet::new();
    for handle in handles {
        for key in handle.join().unwrap() {
            assert!(keys.insert(key));
        }
    }

    assert_eq!(keys.len(), 1000);
    assert_eq!(store.count(b"A", TimeWindow::all()).unwrap(), 1000);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_records_survive_restart() {
    let dir = TempDir::new().unwrap();
    {
        let store = RangeStore::open(config(&dir)).unwrap();
        store.insert_at(b"A", T, &meta(1, T)).unwrap();
        store.insert_at(b"A", T + SECOND, &meta(2, T)).unwrap();
        store.close().unwrap();
    }

    let store = RangeStore::open(config(&dir)).unwrap();
    assert_eq!(scan_ids(&store, b"A", TimeWindow::all()), vec![1, 2]);
}

#[test]
fn test_restart_without_close_does_not_reuse_keys() {
    let dir = TempDir::new().unwrap();
    let first = {
        let store = RangeStore::open(config(&dir)).unwrap();
        store.insert_at(b"A", T, &meta(1, T)).unwrap()
        // Dropped without close
    };

    let store = RangeStore::open(config(&dir)).unwrap();
    let second = store.insert_at(b"A", T, &meta(2, T)).unwrap();

    assert_ne!(first, second);
    assert_eq!(scan_ids(&store, b"A", TimeWindow::all()), vec![1, 2]);
}
