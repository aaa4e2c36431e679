//! Record binary format shared by segments and the write-ahead log.
//!
//! ```text
//! [key_len: u64 LE][value_len: u64 LE][key_bytes][value_bytes]
//! ```
//!
//! A tombstone sets the high bit of `value_len` and carries no value bytes.
//! The remaining 63 bits of `value_len` must be zero for a tombstone; any
//! other combination is treated as corruption. All integers are
//! little-endian.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::Ordering;
use std::io::{self, Read, Write};

/// High bit of `value_len`, marking a deleted key.
pub const TOMBSTONE_BIT: u64 = 1 << 63;

/// Fixed bytes per record before the key: `key_len` + `value_len`.
pub const RECORD_HEADER_BYTES: u64 = 16;

/// Largest key length the decoder will allocate for (64 KiB). A corrupt
/// length field past this is reported as corruption instead of an OOM.
pub const MAX_KEY_BYTES: usize = 64 * 1024;

/// Largest value length the decoder will allocate for (10 MiB).
pub const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// Total ordering over keys: byte-by-byte up to the shorter length, and on a
/// prefix-equal tie the shorter key sorts first. This is the one comparison
/// used everywhere keys are sorted or merged; it agrees with `Ord` on `[u8]`,
/// which the in-memory `BTreeMap`s rely on.
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    let common = a.len().min(b.len());
    for i in 0..common {
        match a[i].cmp(&b[i]) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// Number of bytes `write_record` produces for this key/value pair.
pub fn encoded_len(key: &[u8], value: Option<&[u8]>) -> u64 {
    RECORD_HEADER_BYTES + key.len() as u64 + value.map_or(0, |v| v.len() as u64)
}

/// Appends one record to `w`. `value == None` writes a tombstone. Returns the
/// number of bytes written.
pub fn write_record<W: Write>(w: &mut W, key: &[u8], value: Option<&[u8]>) -> io::Result<u64> {
    w.write_u64::<LittleEndian>(key.len() as u64)?;
    match value {
        Some(v) => {
            w.write_u64::<LittleEndian>(v.len() as u64)?;
            w.write_all(key)?;
            w.write_all(v)?;
        }
        None => {
            w.write_u64::<LittleEndian>(TOMBSTONE_BIT)?;
            w.write_all(key)?;
        }
    }
    Ok(encoded_len(key, value))
}

/// Result of decoding one record from a stream.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadRecord {
    Record {
        key: Vec<u8>,
        /// `None` for a tombstone.
        value: Option<Vec<u8>>,
    },
    /// The stream ended cleanly on a record boundary.
    Eof,
    /// The stream ends mid-record or carries malformed length fields. The
    /// caller treats the input as ending at the previous record.
    Corrupt,
}

/// Decodes the next record from `r`.
///
/// Only real I/O failures surface as `Err`; a truncated or malformed record
/// is reported as [`ReadRecord::Corrupt`] so callers can stop at the last
/// well-formed record instead of failing the whole file.
pub fn read_record<R: Read>(r: &mut R) -> io::Result<ReadRecord> {
    let key_len = match read_len_field(r)? {
        LenField::Value(n) => n,
        LenField::Eof => return Ok(ReadRecord::Eof),
        LenField::Truncated => return Ok(ReadRecord::Corrupt),
    };

    let value_len_raw = match r.read_u64::<LittleEndian>() {
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(ReadRecord::Corrupt),
        Err(e) => return Err(e),
    };

    let tombstone = value_len_raw & TOMBSTONE_BIT != 0;
    let value_len = value_len_raw & !TOMBSTONE_BIT;

    if key_len > MAX_KEY_BYTES as u64 || value_len > MAX_VALUE_BYTES as u64 {
        return Ok(ReadRecord::Corrupt);
    }
    if tombstone && value_len != 0 {
        return Ok(ReadRecord::Corrupt);
    }

    let mut key = vec![0u8; key_len as usize];
    match r.read_exact(&mut key) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(ReadRecord::Corrupt),
        Err(e) => return Err(e),
    }

    let value = if tombstone {
        None
    } else {
        let mut value = vec![0u8; value_len as usize];
        match r.read_exact(&mut value) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(ReadRecord::Corrupt),
            Err(e) => return Err(e),
        }
        Some(value)
    };

    Ok(ReadRecord::Record { key, value })
}

enum LenField {
    Value(u64),
    Eof,
    Truncated,
}

/// Reads the leading `key_len` field, distinguishing a clean end of input
/// (nothing left to read) from a torn record (some bytes of the field).
fn read_len_field<R: Read>(r: &mut R) -> io::Result<LenField> {
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    match filled {
        0 => Ok(LenField::Eof),
        8 => Ok(LenField::Value(u64::from_le_bytes(buf))),
        _ => Ok(LenField::Truncated),
    }
}
