//! # Engine - driftkv storage engine
//!
//! The central orchestrator that ties together the [`memtable`], [`wal`], and
//! [`sstable`] crates into a complete LSM-tree key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Caller threads
//!   |
//!   v
//! ┌─────────────────────────────────────────────────┐
//! │                    ENGINE                       │
//! │                                                 │
//! │ write.rs → WAL append → memtable insert         │
//! │              |                                  │
//! │              |  (size ≥ threshold?)             │
//! │              |          yes                     │
//! │              v                                  │
//! │         freeze → flush thread → new segment     │
//! │         (caller blocks until flush completes)   │
//! │                                                 │
//! │ compaction.rs → tier pick → two-way merge       │
//! │                 (independent background thread) │
//! │                                                 │
//! │ read.rs → memtable → frozen → segments          │
//! │            (newest-first, first match wins)     │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | `lib.rs`       | `Engine` struct, shared state, open/close, `Drop`    |
//! | [`recovery`]   | Segment loading, temp-file cleanup, WAL replay       |
//! | [`write`]      | `set()`, `delete()`, `flush()`, freeze, backpressure |
//! | [`read`]       | `get()` across memtable, frozen table, and segments  |
//! | [`flush`]      | Background flush thread, segment publication         |
//! | [`compaction`] | Tiered pair merges with eager tombstone propagation  |
//!
//! ## Concurrency
//!
//! One mutex guards the write state (active memtable, WAL writer, pending
//! frozen snapshot, flush error slot), so append-then-insert is atomic per
//! write. A second `RwLock` guards the segment catalog; lookups and the
//! compactor work from cloned `Arc` snapshots of it and never block each
//! other. Two condition variables pair with the write mutex: `flush_wanted`
//! wakes the flush thread, `flush_done` wakes writers blocked on
//! backpressure.
//!
//! ## Crash Safety
//!
//! Every write is appended to the WAL before the memtable update. The WAL is
//! trimmed only after the corresponding frozen memtable is durably published
//! as a segment, and trimming preserves records appended after the freeze
//! point. Segments are written via temp file + rename. On restart, stray
//! temp files are removed, segments reopen from their file names, and the
//! WAL replays into a fresh memtable.

mod compaction;
mod flush;
mod read;
mod recovery;
mod write;

use anyhow::{Context, Result};
use memtable::Memtable;
use sstable::SegmentReader;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::sync::{RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use tracing::{info, warn};
use wal::WalWriter;

pub use config::EngineConfig;

/// File name of the write-ahead log inside the data directory.
pub const WAL_FILE_NAME: &str = "log.kdb";

pub(crate) type Catalog = BTreeMap<u64, Arc<SegmentReader>>;

/// An embedded LSM key-value store.
///
/// Writes land in an in-memory table backed by a write-ahead log; when the
/// table grows past the configured threshold it is frozen and a background
/// thread flushes it to an immutable sorted segment file. A second
/// background thread merges similarly-sized segments and resolves deletions.
///
/// All methods take `&self`; the engine is safe to share across threads
/// behind an `Arc`.
pub struct Engine {
    shared: Arc<Shared>,
    flush_handle: Option<JoinHandle<()>>,
    compactor_handle: Option<JoinHandle<()>>,
}

/// Point-in-time counters for operators and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Approximate byte volume of the active memtable.
    pub memtable_bytes: usize,
    /// Entry count of the active memtable (tombstones included).
    pub memtable_entries: usize,
    /// Whether a frozen memtable is waiting on the flush thread.
    pub flush_pending: bool,
    /// Number of on-disk segments in the catalog.
    pub segment_count: usize,
    /// Total record bytes across all segments.
    pub segment_bytes: u64,
}

/// State shared between caller threads and the two background threads.
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    /// Active memtable, WAL writer, pending frozen snapshot, and the error
    /// slot for a failed flush cycle. One lock so a write's
    /// append-then-insert is a single critical section.
    pub(crate) write: Mutex<WriteState>,
    /// Wakes the flush thread when a frozen memtable is ready.
    pub(crate) flush_wanted: Condvar,
    /// Wakes writers blocked on a pending flush.
    pub(crate) flush_done: Condvar,
    /// Segment id → open handle, iterated descending by id for reads.
    pub(crate) catalog: RwLock<Catalog>,
    /// Next segment id to hand out. Ids only ever grow.
    pub(crate) next_segment_id: AtomicU64,
    /// Kick flag for the compactor; paired with `compactor_wake`.
    pub(crate) compactor_kicked: Mutex<bool>,
    pub(crate) compactor_wake: Condvar,
    /// Serializes compaction rounds between the background thread and
    /// `compact_now`.
    pub(crate) compaction: Mutex<()>,
    pub(crate) shutdown: AtomicBool,
}

pub(crate) struct WriteState {
    pub(crate) mem: Memtable,
    pub(crate) wal: WalWriter,
    pub(crate) frozen: Option<Arc<FrozenMemtable>>,
    /// Error message from a failed flush cycle, reported to exactly one
    /// caller and then cleared.
    pub(crate) flush_error: Option<String>,
}

/// Immutable snapshot handed to the flush thread.
pub(crate) struct FrozenMemtable {
    pub(crate) mem: Memtable,
    /// WAL end offset at the freeze instant; the flushed prefix `[0, offset)`
    /// is trimmed once the segment is durably published.
    pub(crate) wal_offset: u64,
}

/// Recovers the guard from a poisoned lock; the guarded state stays
/// consistent because every mutation completes or is rolled back before the
/// lock is released.
pub(crate) fn unpoison<G>(result: std::result::Result<G, PoisonError<G>>) -> G {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub(crate) fn write_state(&self) -> MutexGuard<'_, WriteState> {
        unpoison(self.write.lock())
    }

    pub(crate) fn catalog_read(&self) -> RwLockReadGuard<'_, Catalog> {
        unpoison(self.catalog.read())
    }

    pub(crate) fn catalog_write(&self) -> RwLockWriteGuard<'_, Catalog> {
        unpoison(self.catalog.write())
    }

    /// Clones the current segment handles, newest first. Lookups and
    /// compaction selection work from this snapshot so catalog mutations
    /// never invalidate an in-flight scan.
    pub(crate) fn catalog_snapshot(&self) -> Vec<Arc<SegmentReader>> {
        self.catalog_read().values().rev().cloned().collect()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Engine {
    /// Opens (or creates) an engine over the configured data directory,
    /// performing full recovery and starting the background flush and
    /// compaction threads.
    ///
    /// # Recovery Steps
    ///
    /// 1. Create the data directory if absent.
    /// 2. Remove stray temp files left by interrupted flushes.
    /// 3. Open every `<id>.sst` segment, rebuilding index and bloom filter.
    /// 4. Replay the WAL into a fresh memtable, dropping any torn tail.
    /// 5. Open the WAL for appending and spawn the background threads.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.ensure_dirs().with_context(|| {
            format!("creating data directory {}", config.data_dir.display())
        })?;

        let (catalog, next_id) =
            recovery::load_segments(&config.data_dir, config.index_interval)?;
        let wal_path = config.data_dir.join(WAL_FILE_NAME);
        let (mem, wal) = recovery::recover_wal(&wal_path, config.wal_sync)?;

        info!(
            data_dir = %config.data_dir.display(),
            segments = catalog.len(),
            replayed_entries = mem.len(),
            "engine opened"
        );

        let shared = Arc::new(Shared {
            config,
            write: Mutex::new(WriteState {
                mem,
                wal,
                frozen: None,
                flush_error: None,
            }),
            flush_wanted: Condvar::new(),
            flush_done: Condvar::new(),
            catalog: RwLock::new(catalog),
            next_segment_id: AtomicU64::new(next_id),
            compactor_kicked: Mutex::new(false),
            compactor_wake: Condvar::new(),
            compaction: Mutex::new(()),
            shutdown: AtomicBool::new(false),
        });

        let flush_handle = std::thread::Builder::new()
            .name("driftkv-flush".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || flush::flush_loop(shared)
            })
            .context("spawning flush thread")?;
        let compactor_handle = std::thread::Builder::new()
            .name("driftkv-compact".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || compaction::compactor_loop(shared)
            })
            .context("spawning compaction thread")?;

        Ok(Self {
            shared,
            flush_handle: Some(flush_handle),
            compactor_handle: Some(compactor_handle),
        })
    }

    /// Returns point-in-time counters describing the engine state.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let (memtable_bytes, memtable_entries, flush_pending) = {
            let st = self.shared.write_state();
            (st.mem.approx_size(), st.mem.len(), st.frozen.is_some())
        };
        let (segment_count, segment_bytes) = {
            let catalog = self.shared.catalog_read();
            (
                catalog.len(),
                catalog.values().map(|s| s.size_bytes()).sum(),
            )
        };
        EngineStats {
            memtable_bytes,
            memtable_entries,
            flush_pending,
            segment_count,
            segment_bytes,
        }
    }

    /// Flushes any remaining memtable contents and joins both background
    /// threads. After `close` returns the data directory is quiescent.
    pub fn close(mut self) -> Result<()> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> Result<()> {
        if self.flush_handle.is_none() && self.compactor_handle.is_none() {
            return Ok(());
        }

        let flush_result = self.flush();

        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.flush_wanted.notify_all();
        self.shared.flush_done.notify_all();
        self.shared.compactor_wake.notify_all();

        if let Some(handle) = self.flush_handle.take() {
            if handle.join().is_err() {
                warn!("flush thread panicked during shutdown");
            }
        }
        if let Some(handle) = self.compactor_handle.take() {
            if handle.join().is_err() {
                warn!("compaction thread panicked during shutdown");
            }
        }

        flush_result
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Engine")
            .field("data_dir", &self.shared.config.data_dir)
            .field("memtable_bytes", &stats.memtable_bytes)
            .field("memtable_entries", &stats.memtable_entries)
            .field("flush_pending", &stats.flush_pending)
            .field("segment_count", &stats.segment_count)
            .field("segment_bytes", &stats.segment_bytes)
            .finish()
    }
}

/// Best-effort shutdown on drop.
///
/// Flush errors cannot propagate out of `Drop`; anything unflushed is still
/// in the WAL and will be recovered on the next open.
impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.shutdown_inner();
    }
}

#[cfg(test)]
mod tests;
