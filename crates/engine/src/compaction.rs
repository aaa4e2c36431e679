//! Tiered compaction with eager tombstone propagation.
//!
//! Segments bucket into four size tiers with fixed byte boundaries. Each
//! round the compactor finds the lowest tier holding a catalog-adjacent
//! pair of segments, merges the oldest such pair, and repeats until no tier
//! qualifies. Only id-neighbors may merge, and the merged file is renamed
//! over the newer input: the merge never moves a record past a segment
//! written after it, so id order keeps meaning recency.
//!
//! The merged output carries no tombstones. Every tombstone the merge
//! encounters is propagated first, rewriting any older segment that still
//! holds the key, so deleted data does not linger until those segments' own
//! turn comes.
//!
//! A single background thread runs rounds on a timer and whenever a flush
//! publishes a new segment; `compact_now` shares the same round lock, so
//! compaction never runs concurrently with itself.

use anyhow::{Context, Result};
use sstable::{merge_pair, SegmentReader, SegmentWriter};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{unpoison, Engine, Shared};

impl Engine {
    /// Runs compaction rounds until no size tier holds a mergeable pair.
    ///
    /// Serialized against the background compactor; callers may invoke this
    /// at any time (the CLI's `COMPACT` command does).
    pub fn compact_now(&self) -> Result<()> {
        self.shared.run_compaction_rounds()
    }
}

pub(crate) fn compactor_loop(shared: Arc<Shared>) {
    loop {
        {
            let mut kicked = unpoison(shared.compactor_kicked.lock());
            while !*kicked {
                if shared.is_shutdown() {
                    return;
                }
                let (guard, timeout) = unpoison(
                    shared
                        .compactor_wake
                        .wait_timeout(kicked, shared.config.compaction_interval),
                );
                kicked = guard;
                if timeout.timed_out() {
                    break;
                }
            }
            if shared.is_shutdown() {
                return;
            }
            *kicked = false;
        }

        if let Err(e) = shared.run_compaction_rounds() {
            warn!(error = %format!("{e:#}"), "compaction round failed");
        }
    }
}

/// Tier index for a segment of the given byte size. Boundaries are upper
/// bounds: below `boundaries[0]` is tier 0, at or above `boundaries[2]` is
/// tier 3.
pub(crate) fn size_tier(size: u64, boundaries: &[u64; 3]) -> usize {
    boundaries
        .iter()
        .position(|&b| size < b)
        .unwrap_or(boundaries.len())
}

impl Shared {
    /// Notifies the compactor that the catalog changed.
    pub(crate) fn kick_compactor(&self) {
        *unpoison(self.compactor_kicked.lock()) = true;
        self.compactor_wake.notify_one();
    }

    pub(crate) fn run_compaction_rounds(&self) -> Result<()> {
        let _one_at_a_time = unpoison(self.compaction.lock());
        while let Some((older, newer)) = self.select_merge_pair() {
            self.merge_segments(older, newer)?;
        }
        Ok(())
    }

    /// Picks the oldest catalog-adjacent pair in the lowest tier holding
    /// one. Adjacency means no catalog segment has an id between the two:
    /// the merged file takes the newer input's id, so a pair straddling a
    /// third segment would move records past it in recency order.
    fn select_merge_pair(
        &self,
    ) -> Option<((u64, Arc<SegmentReader>), (u64, Arc<SegmentReader>))> {
        let catalog = self.catalog_read();
        let tiers: Vec<(u64, usize)> = catalog
            .iter()
            .map(|(&id, seg)| (id, size_tier(seg.size_bytes(), &self.config.tier_boundaries)))
            .collect();
        for tier in 0..=self.config.tier_boundaries.len() {
            if let Some(pair) = tiers
                .windows(2)
                .find(|w| w[0].1 == tier && w[1].1 == tier)
            {
                let (a, b) = (pair[0].0, pair[1].0);
                return Some((
                    (a, Arc::clone(&catalog[&a])),
                    (b, Arc::clone(&catalog[&b])),
                ));
            }
        }
        None
    }

    /// Merges one pair of neighboring segments and republishes the result
    /// under the newer input's id.
    ///
    /// The inputs stay in the catalog until the merged segment is durably
    /// published; lookups holding a snapshot keep working off the old
    /// handles even after the files are replaced or unlinked.
    fn merge_segments(
        &self,
        (old_id, old_seg): (u64, Arc<SegmentReader>),
        (new_id, new_seg): (u64, Arc<SegmentReader>),
    ) -> Result<()> {
        debug!(older = old_id, newer = new_id, "merging segment pair");

        let old_records = old_seg
            .read_all()
            .with_context(|| format!("reading segment {}", old_seg.path().display()))?;
        let new_records = new_seg
            .read_all()
            .with_context(|| format!("reading segment {}", new_seg.path().display()))?;
        let outcome = merge_pair((old_id, &old_records), (new_id, &new_records));

        // Scrubbing runs before publish and covers the older input too, so
        // no on-disk state between here and the input unlink can resurrect
        // a deleted key.
        for (key, origin) in &outcome.tombstones {
            self.propagate_tombstone(key, *origin)?;
        }

        let published = if outcome.records.is_empty() {
            None
        } else {
            let count = outcome.records.len();
            let records = outcome.records.into_iter().map(|(k, v)| (k, Some(v)));
            let meta = SegmentWriter::write_to_path(
                new_seg.path(),
                count,
                self.config.index_interval,
                records,
            )
            .with_context(|| {
                format!("writing merged segment {}", new_seg.path().display())
            })?;
            Some(SegmentReader::from_meta(new_seg.path(), meta)?)
        };

        let output_empty = published.is_none();
        {
            let mut catalog = self.catalog_write();
            match published {
                Some(reader) => {
                    catalog.insert(new_id, Arc::new(reader));
                }
                None => {
                    catalog.remove(&new_id);
                }
            }
            catalog.remove(&old_id);
        }

        // Propagation may already have emptied and unlinked the older input.
        if let Err(e) = std::fs::remove_file(old_seg.path()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(id = old_id, error = %e, "failed to delete merged input segment");
            }
        }
        if output_empty {
            if let Err(e) = std::fs::remove_file(new_seg.path()) {
                warn!(id = new_id, error = %e, "failed to delete merged input segment");
            }
        }
        Ok(())
    }

    /// Removes `key` from every catalog segment older than the tombstone's
    /// origin. A segment left empty by the rewrite is dropped outright.
    fn propagate_tombstone(&self, key: &[u8], origin: u64) -> Result<()> {
        let candidates: Vec<(u64, Arc<SegmentReader>)> = {
            let catalog = self.catalog_read();
            catalog
                .range(..origin)
                .map(|(&id, segment)| (id, Arc::clone(segment)))
                .collect()
        };

        for (id, segment) in candidates {
            if segment.get(key)?.is_none() {
                continue;
            }
            debug!(segment = id, "scrubbing deleted key from older segment");
            self.rewrite_segment_without(id, &segment, key)?;
        }
        Ok(())
    }

    /// Rewrites a segment in place, dropping one key. The rewrite goes
    /// through the writer's temp + rename, so the handle held by concurrent
    /// readers keeps seeing the pre-rewrite file until it is replaced in the
    /// catalog.
    fn rewrite_segment_without(
        &self,
        id: u64,
        segment: &SegmentReader,
        key: &[u8],
    ) -> Result<()> {
        let records: Vec<_> = segment
            .read_all()
            .with_context(|| format!("reading segment {}", segment.path().display()))?
            .into_iter()
            .filter(|(k, _)| k.as_slice() != key)
            .collect();

        if records.is_empty() {
            self.catalog_write().remove(&id);
            if let Err(e) = std::fs::remove_file(segment.path()) {
                warn!(id, error = %e, "failed to delete emptied segment");
            }
            return Ok(());
        }

        let count = records.len();
        let meta = SegmentWriter::write_to_path(
            segment.path(),
            count,
            self.config.index_interval,
            records.into_iter(),
        )
        .with_context(|| format!("rewriting segment {}", segment.path().display()))?;
        let reader = SegmentReader::from_meta(segment.path(), meta)?;
        self.catalog_write().insert(id, Arc::new(reader));
        Ok(())
    }
}
