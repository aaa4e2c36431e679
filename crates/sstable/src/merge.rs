//! Two-way merge of segment record streams.
//!
//! Compaction always merges exactly two segments, so the merge is a pair of
//! cursors rather than a heap. When both inputs hold the same key, the
//! record from the higher-id (more recent) segment is authoritative.
//! Tombstones are never emitted into the merged output; instead each
//! authoritative tombstone is reported back to the caller together with the
//! id of the segment it came from, so the compactor can purge the key from
//! older segments.

use std::cmp::Ordering;

use crate::format::compare_keys;

/// One input to [`merge_pair`]: the segment's id and its records in
/// ascending key order.
pub type MergeInput<'a> = (u64, &'a [(Vec<u8>, Option<Vec<u8>>)]);

/// Result of merging two segments.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Live records for the merged segment, ascending by key, no
    /// tombstones and no duplicates.
    pub records: Vec<(Vec<u8>, Vec<u8>)>,
    /// Keys whose authoritative record was a tombstone, each with the id of
    /// the segment the tombstone originated in.
    pub tombstones: Vec<(Vec<u8>, u64)>,
}

/// Merges two sorted record streams.
///
/// An older tombstone masked by a newer live value for the same key is
/// discarded outright: the merged segment keeps the newer input's id, which
/// still outranks every segment the tombstone used to mask.
pub fn merge_pair(a: MergeInput<'_>, b: MergeInput<'_>) -> MergeOutcome {
    let ((newer_id, newer), (older_id, older)) = if a.0 > b.0 { (a, b) } else { (b, a) };

    let mut out = MergeOutcome::default();
    let mut take = |record: &(Vec<u8>, Option<Vec<u8>>), origin_id: u64| match &record.1 {
        Some(value) => out.records.push((record.0.clone(), value.clone())),
        None => out.tombstones.push((record.0.clone(), origin_id)),
    };

    let (mut i, mut j) = (0, 0);
    while i < newer.len() && j < older.len() {
        match compare_keys(&newer[i].0, &older[j].0) {
            Ordering::Less => {
                take(&newer[i], newer_id);
                i += 1;
            }
            Ordering::Greater => {
                take(&older[j], older_id);
                j += 1;
            }
            Ordering::Equal => {
                take(&newer[i], newer_id);
                i += 1;
                j += 1;
            }
        }
    }
    for record in &newer[i..] {
        take(record, newer_id);
    }
    for record in &older[j..] {
        take(record, older_id);
    }

    out
}
