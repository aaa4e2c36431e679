//! Write-ahead log.
//!
//! Every mutation is appended here before the in-memory table is touched, so
//! a crash loses no acknowledged write. On startup [`replay`] reconstructs
//! the logged mutations and reports how many leading bytes of the file are
//! well-formed; [`WalWriter::open`] then drops anything past that point and
//! continues appending.
//!
//! Records use the same binary encoding as segment files (see
//! [`sstable::format`]):
//!
//! ```text
//! [key_len: u64 LE][value_len: u64 LE][key bytes][value bytes]
//! ```
//!
//! A deletion is a tombstone record: the high bit of `value_len` is set and
//! no value bytes follow. There are no checksums. A record that ends
//! mid-stream is a torn tail from an interrupted append; replay keeps every
//! record before it and never fails because of it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{replay, WalRecord, WalWriter};
//!
//! let recovered = replay("log.kdb").unwrap();
//! let mut w = WalWriter::open("log.kdb", recovered.valid_len, false).unwrap();
//! w.append(&WalRecord::Set {
//!     key: b"hello".to_vec(),
//!     value: b"world".to_vec(),
//! }).unwrap();
//! ```

use sstable::format::{encoded_len, read_record, write_record, ReadRecord};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// A single logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// A key-value insertion or overwrite.
    Set {
        /// The lookup key.
        key: Vec<u8>,
        /// The payload value. May be empty; an empty value is still a value.
        value: Vec<u8>,
    },
    /// A key deletion, logged as a tombstone.
    Delete {
        /// The key to delete.
        key: Vec<u8>,
    },
}

impl WalRecord {
    fn parts(&self) -> (&[u8], Option<&[u8]>) {
        match self {
            WalRecord::Set { key, value } => (key, Some(value)),
            WalRecord::Delete { key } => (key, None),
        }
    }
}

/// Errors surfaced by WAL operations.
///
/// A torn or malformed tail is not an error: [`replay`] stops at the last
/// well-formed record and reports success.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O failure.
    #[error("wal io error: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of scanning a log file.
#[derive(Debug)]
pub struct Replay {
    /// Every well-formed record, in append order.
    pub records: Vec<WalRecord>,
    /// Byte length of the well-formed prefix. Bytes past this offset belong
    /// to a torn tail and must be discarded before appending resumes.
    pub valid_len: u64,
}

/// Scans the log at `path` and returns every well-formed record.
///
/// A missing file is an empty log. A torn tail (partial record at the end,
/// left by a crash mid-append) is logged and dropped; everything before it
/// is returned.
pub fn replay<P: AsRef<Path>>(path: P) -> Result<Replay, WalError> {
    let file = match File::open(path.as_ref()) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Replay {
                records: Vec::new(),
                valid_len: 0,
            })
        }
        Err(e) => return Err(e.into()),
    };

    let mut rdr = BufReader::new(file);
    let mut records = Vec::new();
    let mut valid_len = 0u64;
    loop {
        match read_record(&mut rdr)? {
            ReadRecord::Record { key, value } => {
                valid_len += encoded_len(&key, value.as_deref());
                records.push(match value {
                    Some(value) => WalRecord::Set { key, value },
                    None => WalRecord::Delete { key },
                });
            }
            ReadRecord::Eof => break,
            ReadRecord::Corrupt => {
                warn!(
                    path = %path.as_ref().display(),
                    valid_len,
                    "log ends mid-record, dropping torn tail"
                );
                break;
            }
        }
    }

    Ok(Replay { records, valid_len })
}

/// Append-only log writer.
///
/// Each record is serialized into a reusable buffer and handed to the file
/// in a single `write_all` call, so a crash can tear at most the final
/// record. With `sync_on_append` every append is followed by `sync_all()`
/// (fsync) before it returns.
pub struct WalWriter {
    file: File,
    path: PathBuf,
    offset: u64,
    sync_on_append: bool,
    /// Reusable scratch buffer so appends do not allocate.
    buf: Vec<u8>,
}

impl WalWriter {
    /// Opens (or creates) the log at `path` for appending.
    ///
    /// `valid_len` is the well-formed prefix length reported by [`replay`];
    /// any bytes past it are a torn tail and are cut off before the first
    /// append.
    pub fn open<P: AsRef<Path>>(
        path: P,
        valid_len: u64,
        sync_on_append: bool,
    ) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len > valid_len {
            warn!(
                path = %path.display(),
                torn_bytes = len - valid_len,
                "truncating torn tail before appending"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let offset = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file,
            path,
            offset,
            sync_on_append,
            buf: Vec::with_capacity(256),
        })
    }

    /// Serializes `record` and appends it to the log.
    ///
    /// Returns the end offset of the log after the append; the engine
    /// records this boundary when it freezes a memtable so the flushed
    /// prefix can later be dropped with [`truncate_up_to`].
    ///
    /// [`truncate_up_to`]: WalWriter::truncate_up_to
    pub fn append(&mut self, record: &WalRecord) -> Result<u64, WalError> {
        let (key, value) = record.parts();

        self.buf.clear();
        write_record(&mut self.buf, key, value)?;
        self.file.write_all(&self.buf)?;
        self.offset += self.buf.len() as u64;

        if self.sync_on_append {
            self.file.sync_all()?;
        }
        Ok(self.offset)
    }

    /// Current end offset of the log in bytes.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Forces everything appended so far onto disk via `sync_all()`.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Drops every record below `up_to`, keeping the bytes `[up_to, end)`.
    ///
    /// Called after a flush publishes a segment: the flushed prefix is no
    /// longer needed, but records appended since the freeze must survive.
    /// The surviving tail is copied to a sibling temp file which is then
    /// renamed over the log, so a crash at any point leaves either the old
    /// log or the trimmed one, never a half-rewritten file.
    pub fn truncate_up_to(&mut self, up_to: u64) -> Result<(), WalError> {
        let up_to = up_to.min(self.offset);
        let tail_len = self.offset - up_to;

        let tmp_path = {
            let mut name = self.path.as_os_str().to_owned();
            name.push(".tmp");
            PathBuf::from(name)
        };

        let mut tmp = File::create(&tmp_path)?;
        self.file.seek(SeekFrom::Start(up_to))?;
        io::copy(&mut (&self.file).take(tail_len), &mut tmp)?;
        tmp.sync_all()?;
        drop(tmp);

        std::fs::rename(&tmp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            // fsync the directory so the rename survives a crash
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        self.file = file;
        self.offset = tail_len;
        Ok(())
    }
}
