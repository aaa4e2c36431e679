//! # Segments - immutable sorted record files
//!
//! On-disk storage files for the driftkv engine. When the in-memory
//! [`memtable`] exceeds its size threshold the engine flushes it to disk as a
//! segment. Segments are *write-once, read-many*: once published they are
//! never modified, only replaced during compaction.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ records, sorted ascending by key, back to back                │
//! │                                                               │
//! │ key_len (u64 LE) | value_len (u64 LE) | key | value           │
//! │                                                               │
//! │ tombstone: high bit of value_len set, no value bytes follow   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no header, footer, or checksum; the file is exactly the record
//! sequence, and the write-ahead log shares the same encoding. A truncated
//! trailing record (crash mid-write) is detected by the decoder and the file
//! is treated as ending at the last well-formed record.
//!
//! The sparse index and bloom filter for a segment live only in memory. They
//! are built while the segment is written, and rebuilt by a single sequential
//! scan when an existing segment is reopened.

pub mod format;
mod index;
mod merge;
mod reader;
mod writer;

pub use index::{SparseIndex, SparseIndexBuilder};
pub use merge::{merge_pair, MergeOutcome};
pub use reader::SegmentReader;
pub use writer::{SegmentMeta, SegmentWriter};

#[cfg(test)]
mod tests;
