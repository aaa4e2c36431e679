//! Cold-start recovery: segment loading, temp-file cleanup, and WAL replay.
//!
//! Segment files are the authority for what was durably flushed; their ids
//! come straight from the file names. Anything the WAL still holds replays
//! into a fresh memtable on top, so a crash between flush and WAL trim only
//! costs a harmless re-apply.

use anyhow::{Context, Result};
use memtable::Memtable;
use sstable::SegmentReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use wal::{WalRecord, WalWriter};

use crate::Catalog;

/// Opens every `<id>.sst` file in the data directory and returns the catalog
/// plus the next free segment id.
///
/// Stray `.tmp` files left by an interrupted flush or log trim are removed.
/// Files with an `.sst` extension whose stem is not a decimal id are left in
/// place and skipped with a warning.
pub(crate) fn load_segments(dir: &Path, index_interval: u64) -> Result<(Catalog, u64)> {
    let mut catalog = Catalog::new();
    let mut max_id = None;

    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("listing data directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("listing data directory {}", dir.display()))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if name.ends_with(".tmp") {
            debug!(file = name, "removing leftover temp file");
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(file = name, error = %e, "failed to remove leftover temp file");
            }
            continue;
        }

        if path.extension().and_then(|e| e.to_str()) != Some("sst") {
            continue;
        }
        let Some(id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        else {
            warn!(file = name, "ignoring segment file with unparseable id");
            continue;
        };

        let reader = SegmentReader::open(&path, index_interval)
            .with_context(|| format!("opening segment {}", path.display()))?;
        debug!(id, records = reader.len(), "segment loaded");
        catalog.insert(id, Arc::new(reader));
        max_id = Some(max_id.map_or(id, |m: u64| m.max(id)));
    }

    let next_id = max_id.map_or(0, |m| m + 1);
    Ok((catalog, next_id))
}

/// Replays the WAL into a fresh memtable and reopens it for appending.
///
/// Replay drops any torn tail; the writer is opened at the surviving length
/// so the next append lands right after the last intact record.
pub(crate) fn recover_wal(path: &Path, sync_on_append: bool) -> Result<(Memtable, WalWriter)> {
    let replayed = wal::replay(path).context("replaying write-ahead log")?;

    let mut mem = Memtable::new();
    for record in replayed.records {
        match record {
            WalRecord::Set { key, value } => mem.set(key, value),
            WalRecord::Delete { key } => mem.delete(key),
        }
    }

    let wal = WalWriter::open(path, replayed.valid_len, sync_on_append)
        .context("opening write-ahead log")?;
    Ok((mem, wal))
}
