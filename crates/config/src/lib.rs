//! Tunable parameters for the driftkv storage engine.

use std::path::PathBuf;
use std::time::Duration;

/// Size-tier boundaries used by the compactor, in bytes. A segment whose file
/// size is below `boundaries[0]` lands in tier 0, below `boundaries[1]` in
/// tier 1, below `boundaries[2]` in tier 2, anything larger in tier 3.
pub const DEFAULT_TIER_BOUNDARIES: [u64; 3] = [64 * 1024, 1024 * 1024, 16 * 1024 * 1024];

/// Configuration for a driftkv engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base directory for all data files (WAL and segments).
    pub data_dir: PathBuf,

    /// Approximate memtable size in bytes that triggers a freeze + flush.
    pub memtable_max_bytes: usize,

    /// Minimum number of record bytes between two sparse index entries.
    pub index_interval: u64,

    /// Whether to fsync the WAL after every append. Off by default: the log
    /// survives a process crash either way, but not a power loss.
    pub wal_sync: bool,

    /// How long the compactor sleeps between unsolicited passes.
    pub compaction_interval: Duration,

    /// Size-tier boundaries for compaction candidate selection.
    pub tier_boundaries: [u64; 3],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            memtable_max_bytes: 4 * 1024 * 1024,
            index_interval: 4096,
            wal_sync: false,
            compaction_interval: Duration::from_secs(10),
            tier_boundaries: DEFAULT_TIER_BOUNDARIES,
        }
    }
}

impl EngineConfig {
    /// Creates a config rooted at the given data directory, everything else
    /// at defaults.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_memtable_max_bytes(mut self, bytes: usize) -> Self {
        self.memtable_max_bytes = bytes;
        self
    }

    pub fn with_index_interval(mut self, bytes: u64) -> Self {
        self.index_interval = bytes;
        self
    }

    pub fn with_wal_sync(mut self, sync: bool) -> Self {
        self.wal_sync = sync;
        self
    }

    pub fn with_compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    pub fn with_tier_boundaries(mut self, boundaries: [u64; 3]) -> Self {
        self.tier_boundaries = boundaries;
        self
    }

    /// Creates the data directory if it does not exist yet.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}
