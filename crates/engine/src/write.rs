//! Write path: `set()`, `delete()`, `flush()`, and the freeze protocol.
//!
//! All mutations flow through this module. Each write appends to the WAL and
//! then updates the memtable inside a single critical section. A write that
//! pushes the memtable past the configured threshold freezes it (snapshot
//! plus WAL offset, taken under the same lock) and blocks until the flush
//! thread has published the segment, which bounds memtable growth and gives
//! callers synchronous feedback on flush latency.

use anyhow::{bail, ensure, Context, Result};
use sstable::format::{MAX_KEY_BYTES, MAX_VALUE_BYTES};
use std::sync::{Arc, MutexGuard};
use wal::WalRecord;

use crate::{unpoison, Engine, FrozenMemtable, Shared, WriteState};

impl Engine {
    /// Inserts or overwrites a key-value pair.
    ///
    /// The record is appended to the WAL before the memtable update, so an
    /// acknowledged write survives a process crash. May block while a
    /// triggered flush completes.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        ensure!(!key.is_empty(), "key must not be empty");
        ensure!(
            key.len() <= MAX_KEY_BYTES,
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_BYTES
        );
        ensure!(
            value.len() <= MAX_VALUE_BYTES,
            "value too large: {} bytes (max {})",
            value.len(),
            MAX_VALUE_BYTES
        );

        self.shared.apply(WalRecord::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    /// Deletes a key by writing a tombstone.
    ///
    /// The tombstone masks any older value in the memtable or segments until
    /// compaction purges it. Deleting an absent key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        ensure!(!key.is_empty(), "key must not be empty");
        ensure!(
            key.len() <= MAX_KEY_BYTES,
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_BYTES
        );

        self.shared.apply(WalRecord::Delete { key: key.to_vec() })
    }

    /// Forces a freeze + flush of the current memtable and waits for it to
    /// complete. A no-op when the memtable is empty.
    pub fn flush(&self) -> Result<()> {
        self.shared.force_flush()
    }
}

impl Shared {
    /// Performs one logged mutation: wait out any pending flush, append to
    /// the WAL, update the memtable, and freeze if the threshold is crossed.
    fn apply(&self, record: WalRecord) -> Result<()> {
        let mut st = self.write_state();
        st = self.await_flush_idle(st)?;

        st.wal
            .append(&record)
            .context("appending to write-ahead log")?;
        match record {
            WalRecord::Set { key, value } => st.mem.set(key, value),
            WalRecord::Delete { key } => st.mem.delete(key),
        }

        if st.mem.approx_size() >= self.config.memtable_max_bytes {
            self.freeze(&mut st);
            self.await_flush_idle(st)?;
        }
        Ok(())
    }

    pub(crate) fn force_flush(&self) -> Result<()> {
        let mut st = self.write_state();
        st = self.await_flush_idle(st)?;
        if st.mem.is_empty() {
            return Ok(());
        }
        self.freeze(&mut st);
        self.await_flush_idle(st)?;
        Ok(())
    }

    /// Swaps the active memtable for an empty one and records the WAL offset
    /// at the freeze instant. Both happen under the write lock, so the
    /// snapshot and offset are mutually consistent with concurrent writes.
    fn freeze(&self, st: &mut MutexGuard<'_, WriteState>) {
        let mem = std::mem::take(&mut st.mem);
        let wal_offset = st.wal.offset();
        st.frozen = Some(Arc::new(FrozenMemtable { mem, wal_offset }));
        self.flush_wanted.notify_one();
    }

    /// Blocks until no flush is pending. A failed flush cycle is reported to
    /// exactly one waiting caller, which re-signals the flush thread so the
    /// still-frozen memtable is retried on behalf of the remaining writers.
    fn await_flush_idle<'a>(
        &'a self,
        mut st: MutexGuard<'a, WriteState>,
    ) -> Result<MutexGuard<'a, WriteState>> {
        loop {
            if let Some(msg) = st.flush_error.take() {
                if st.frozen.is_some() {
                    self.flush_wanted.notify_one();
                }
                bail!("flush failed: {msg}");
            }
            if st.frozen.is_none() {
                return Ok(st);
            }
            st = unpoison(self.flush_done.wait(st));
        }
    }
}
