use anyhow::{Context, Result};
use bloom::BloomFilter;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::format::{compare_keys, encoded_len, read_record, ReadRecord};
use crate::index::{SparseIndex, SparseIndexBuilder};
use crate::writer::SegmentMeta;

/// Bloom sizing used when a segment is reopened and its filter rebuilt.
const BLOOM_FPR: f64 = 0.01;

/// Read handle for one immutable segment file.
///
/// [`open`](SegmentReader::open) scans the file once, front to back, to
/// rebuild the sparse index and bloom filter; a freshly written segment can
/// instead be attached to the [`SegmentMeta`] its writer produced via
/// [`from_meta`](SegmentReader::from_meta). A truncated trailing record is
/// dropped with a warning and the file is treated as ending at the last
/// well-formed record.
///
/// A persistent file handle is kept open for the lifetime of the reader,
/// wrapped in a `Mutex` so [`get`](SegmentReader::get) works through `&self`.
/// Point lookups cost one seek plus a short forward scan bounded by the
/// index interval.
pub struct SegmentReader {
    path: PathBuf,
    index: SparseIndex,
    bloom: BloomFilter,
    file: Mutex<BufReader<File>>,
    /// Length of the well-formed record prefix; scans never read past this.
    data_len: u64,
    num_records: usize,
}

impl SegmentReader {
    /// Opens a segment file, rebuilding its sparse index and bloom filter by
    /// a single sequential scan.
    pub fn open<P: AsRef<Path>>(path: P, index_interval: u64) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let f = File::open(&path_buf)
            .with_context(|| format!("opening segment {}", path_buf.display()))?;
        let mut reader = BufReader::new(f);

        let mut keys: Vec<Vec<u8>> = Vec::new();
        let mut index = SparseIndexBuilder::new(index_interval);
        let mut offset: u64 = 0;

        loop {
            match read_record(&mut reader)? {
                ReadRecord::Record { key, value } => {
                    let record_len = encoded_len(&key, value.as_deref());
                    index.observe(&key, offset, record_len);
                    offset += record_len;
                    keys.push(key);
                }
                ReadRecord::Eof => break,
                ReadRecord::Corrupt => {
                    warn!(
                        segment = %path_buf.display(),
                        valid_bytes = offset,
                        "segment ends mid-record, ignoring truncated tail"
                    );
                    break;
                }
            }
        }

        let mut bloom = BloomFilter::new(keys.len().max(1), BLOOM_FPR);
        for key in &keys {
            bloom.insert(key);
        }

        reader.seek(SeekFrom::Start(0))?;

        Ok(Self {
            path: path_buf,
            index: index.finish(),
            bloom,
            file: Mutex::new(reader),
            data_len: offset,
            num_records: keys.len(),
        })
    }

    /// Attaches a reader to a segment the writer just produced, reusing the
    /// index and bloom filter built during the write instead of rescanning.
    pub fn from_meta<P: AsRef<Path>>(path: P, meta: SegmentMeta) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let f = File::open(&path_buf)
            .with_context(|| format!("opening segment {}", path_buf.display()))?;
        Ok(Self {
            path: path_buf,
            index: meta.index,
            bloom: meta.bloom,
            file: Mutex::new(BufReader::new(f)),
            data_len: meta.size_bytes,
            num_records: meta.num_records,
        })
    }

    /// Point lookup for a single key.
    ///
    /// The bloom filter is consulted first; a negative answer skips the file
    /// entirely. Otherwise the sparse index gives the greatest indexed
    /// offset not past the key and records are decoded forward from there,
    /// stopping as soon as a strictly greater key shows up (sort order
    /// guarantees absence) or the data runs out.
    ///
    /// Returns `Ok(None)` if the key is not in this segment, `Ok(Some(None))`
    /// for a tombstone, and `Ok(Some(Some(value)))` for a live record.
    pub fn get(&self, key: &[u8]) -> Result<Option<Option<Vec<u8>>>> {
        if !self.bloom.may_contain(key) {
            return Ok(None);
        }

        let start = match self.index.seek(key) {
            Some(offset) => offset,
            None => return Ok(None),
        };

        let mut f = self
            .file
            .lock()
            .map_err(|e| anyhow::anyhow!("lock poisoned: {}", e))?;
        f.seek(SeekFrom::Start(start))?;

        let mut pos = start;
        while pos < self.data_len {
            match read_record(&mut *f)? {
                ReadRecord::Record { key: rec_key, value } => {
                    pos += encoded_len(&rec_key, value.as_deref());
                    match compare_keys(&rec_key, key) {
                        Ordering::Less => continue,
                        Ordering::Equal => return Ok(Some(value)),
                        Ordering::Greater => return Ok(None),
                    }
                }
                ReadRecord::Eof | ReadRecord::Corrupt => break,
            }
        }

        Ok(None)
    }

    /// Reads every record in file order. Compaction uses this to materialize
    /// merge inputs and to rewrite segments during tombstone propagation.
    pub fn read_all(&self) -> Result<Vec<(Vec<u8>, Option<Vec<u8>>)>> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| anyhow::anyhow!("lock poisoned: {}", e))?;
        f.seek(SeekFrom::Start(0))?;

        let mut records = Vec::with_capacity(self.num_records);
        let mut pos = 0u64;
        while pos < self.data_len {
            match read_record(&mut *f)? {
                ReadRecord::Record { key, value } => {
                    pos += encoded_len(&key, value.as_deref());
                    records.push((key, value));
                }
                ReadRecord::Eof | ReadRecord::Corrupt => break,
            }
        }
        Ok(records)
    }

    /// Bytes of well-formed record data in the file. This is the size the
    /// compactor buckets segments by.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.data_len
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records in the segment.
    #[must_use]
    pub fn len(&self) -> usize {
        self.num_records
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_records == 0
    }
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("path", &self.path)
            .field("records", &self.num_records)
            .field("data_len", &self.data_len)
            .field("index_entries", &self.index.len())
            .finish()
    }
}
