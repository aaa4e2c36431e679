use anyhow::{bail, Context, Result};
use bloom::BloomFilter;
use std::cmp::Ordering;
use std::fs::{rename, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::format::{compare_keys, write_record};
use crate::index::{SparseIndex, SparseIndexBuilder};

/// Default bloom filter false positive rate (1%).
const BLOOM_FPR: f64 = 0.01;

/// In-memory companions of a freshly written segment, handed to the catalog
/// so the file does not need to be reopened and rescanned.
#[derive(Debug)]
pub struct SegmentMeta {
    pub index: SparseIndex,
    pub bloom: BloomFilter,
    pub size_bytes: u64,
    pub num_records: usize,
}

/// Writes a sorted record stream to disk as an immutable segment file.
///
/// The writer is stateless; all work happens inside
/// [`write_to_path`](SegmentWriter::write_to_path). The write is crash-safe:
/// data goes to a temporary file first, is fsynced, and is then atomically
/// renamed to the final path. A crash mid-write leaves only a `.sst.tmp`
/// file, which recovery deletes.
pub struct SegmentWriter {}

impl SegmentWriter {
    /// Writes all records from `iter` to a new segment at `path`, building
    /// the sparse index (one entry for the first record, then one whenever
    /// `index_interval` bytes have accumulated) and a bloom filter over the
    /// keys as it goes.
    ///
    /// `expected_count` sizes the bloom filter; over-estimating is safe,
    /// under-estimating raises the false positive rate.
    ///
    /// `iter` must yield keys in strictly ascending order with no
    /// duplicates. The writer enforces this and fails the write otherwise,
    /// leaving no file behind.
    ///
    /// # Errors
    ///
    /// Returns an error if the iterator yields zero entries, yields keys out
    /// of order, or on any I/O failure.
    pub fn write_to_path<I>(
        path: &Path,
        expected_count: usize,
        index_interval: u64,
        iter: I,
    ) -> Result<SegmentMeta>
    where
        I: Iterator<Item = (Vec<u8>, Option<Vec<u8>>)>,
    {
        let tmp_path = path.with_extension("sst.tmp");
        let result = Self::write_tmp(&tmp_path, expected_count, index_interval, iter);

        let meta = match result {
            Ok(meta) => meta,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        rename(&tmp_path, path)
            .with_context(|| format!("publishing segment {}", path.display()))?;

        // Fsync the parent directory so the rename survives a crash; on
        // filesystems that journal metadata this is a no-op.
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(meta)
    }

    fn write_tmp<I>(
        tmp_path: &Path,
        expected_count: usize,
        index_interval: u64,
        iter: I,
    ) -> Result<SegmentMeta>
    where
        I: Iterator<Item = (Vec<u8>, Option<Vec<u8>>)>,
    {
        let raw_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))?;
        let mut file = BufWriter::new(raw_file);

        let mut bloom = BloomFilter::new(expected_count.max(1), BLOOM_FPR);
        let mut index = SparseIndexBuilder::new(index_interval);

        let mut offset: u64 = 0;
        let mut num_records: usize = 0;
        let mut last_key: Option<Vec<u8>> = None;

        for (key, value) in iter {
            if let Some(ref prev) = last_key {
                if compare_keys(prev, &key) != Ordering::Less {
                    bail!("segment records out of order: {:?} then {:?}", prev, key);
                }
            }

            let record_len = write_record(&mut file, &key, value.as_deref())?;
            index.observe(&key, offset, record_len);
            bloom.insert(&key);

            offset += record_len;
            num_records += 1;
            last_key = Some(key);
        }

        if num_records == 0 {
            bail!("refusing to write an empty segment");
        }

        file.flush()?;
        file.into_inner()?.sync_all()?;

        Ok(SegmentMeta {
            index: index.finish(),
            bloom,
            size_bytes: offset,
            num_records,
        })
    }
}
