//! Read path: point lookups across memtable, frozen memtable, and segments.
//!
//! The freshest source wins: active memtable, then the frozen snapshot of an
//! in-flight flush, then segments newest-to-oldest. A tombstone anywhere
//! along the way masks older values and resolves the lookup to absent.

use anyhow::{Context, Result};

use crate::Engine;

impl Engine {
    /// Looks up a key, returning `Ok(None)` when it is absent or deleted.
    ///
    /// Holds the write lock only for the brief memtable probe; the segment
    /// scan works from a snapshot of the catalog and never blocks behind a
    /// flush or compaction.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        {
            let st = self.shared.write_state();
            if let Some(hit) = st.mem.get(key) {
                return Ok(hit.map(|v| v.to_vec()));
            }
            if let Some(frozen) = &st.frozen {
                if let Some(hit) = frozen.mem.get(key) {
                    return Ok(hit.map(|v| v.to_vec()));
                }
            }
        }

        for segment in self.shared.catalog_snapshot() {
            let found = segment
                .get(key)
                .with_context(|| format!("reading segment {}", segment.path().display()))?;
            match found {
                // live record in the newest segment holding the key
                Some(Some(value)) => return Ok(Some(value)),
                // tombstone: masks anything older
                Some(None) => return Ok(None),
                None => continue,
            }
        }

        Ok(None)
    }
}
