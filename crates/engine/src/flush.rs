//! Background flush: turns a frozen memtable into a published segment.
//!
//! A single thread waits until the write path freezes a memtable, then
//! serializes it to a new segment file (temp + rename, index and bloom built
//! during the write), registers the segment in the catalog, trims the
//! flushed prefix off the WAL, and wakes the writers blocked on
//! backpressure. On failure the frozen memtable and WAL are left intact and
//! the error is parked for the write path to report.

use anyhow::{Context, Result};
use sstable::{SegmentReader, SegmentWriter};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{unpoison, FrozenMemtable, Shared};

pub(crate) fn flush_loop(shared: Arc<Shared>) {
    loop {
        let frozen = {
            let mut st = shared.write_state();
            loop {
                if shared.is_shutdown() {
                    return;
                }
                // an un-taken flush_error means the previous cycle's failure
                // has not been reported yet; hold off until a writer retries
                if st.flush_error.is_none() {
                    if let Some(frozen) = &st.frozen {
                        break Arc::clone(frozen);
                    }
                }
                st = unpoison(shared.flush_wanted.wait(st));
            }
        };

        match shared.flush_frozen(&frozen) {
            Ok((id, reader)) => {
                shared.catalog_write().insert(id, Arc::new(reader));

                let mut st = shared.write_state();
                if let Err(e) = st.wal.truncate_up_to(frozen.wal_offset) {
                    warn!(error = %e, "failed to trim flushed prefix from the log");
                    st.flush_error = Some(format!("trimming write-ahead log: {e}"));
                }
                st.frozen = None;
                drop(st);

                shared.flush_done.notify_all();
                shared.kick_compactor();
                debug!(segment = id, records = frozen.mem.len(), "flush published segment");
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "flush failed, frozen memtable kept for retry");
                let mut st = shared.write_state();
                st.flush_error = Some(format!("{e:#}"));
                drop(st);
                shared.flush_done.notify_all();
            }
        }
    }
}

impl Shared {
    /// Writes the frozen memtable to a freshly named segment and returns the
    /// open handle. The temp file is cleaned up by the writer on failure;
    /// nothing is registered until the rename lands.
    pub(crate) fn flush_frozen(&self, frozen: &FrozenMemtable) -> Result<(u64, SegmentReader)> {
        let (id, path) = self.allocate_segment_path();
        let records = frozen.mem.iter().map(|(k, v)| (k.clone(), v.clone()));
        let meta = SegmentWriter::write_to_path(
            &path,
            frozen.mem.len(),
            self.config.index_interval,
            records,
        )
        .with_context(|| format!("writing segment {}", path.display()))?;
        let reader = SegmentReader::from_meta(&path, meta)?;
        Ok((id, reader))
    }

    /// Hands out the next segment id, skipping any id whose file already
    /// exists on disk so a published segment is never overwritten.
    pub(crate) fn allocate_segment_path(&self) -> (u64, PathBuf) {
        loop {
            let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
            let path = self.segment_path(id);
            if !path.exists() {
                return (id, path);
            }
            warn!(id, "segment id already on disk, skipping");
        }
    }

    pub(crate) fn segment_path(&self, id: u64) -> PathBuf {
        self.config.data_dir.join(format!("{id:020}.sst"))
    }
}
