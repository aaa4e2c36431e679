//! Bloom filter used to short-circuit segment lookups.
//!
//! A bloom filter answers "definitely not present" with certainty and
//! "possibly present" with a tunable false-positive rate. driftkv builds one
//! in memory for every segment, during flush or when a segment is reopened,
//! so a point lookup can skip segments that cannot contain the key without
//! touching their files. Filters are never written to disk; the segment file
//! format stays a plain record sequence.

/// A bloom filter over byte-string keys.
///
/// Membership probes use double hashing: two FNV-1a accumulators are folded
/// over the key in a single pass, then the probe sequence steps through the
/// bit array as `h1 + i * h2` for `i` in `0..k`.
pub struct BloomFilter {
    words: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl BloomFilter {
    /// Creates a filter sized for `expected_items` keys at the given target
    /// `false_positive_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `expected_items` is 0 or `false_positive_rate` is not in `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        let ln2 = std::f64::consts::LN_2;
        // bits per key for the target rate, then total size and hash count
        let bits_per_key = -false_positive_rate.ln() / (ln2 * ln2);
        let num_bits = ((expected_items as f64 * bits_per_key).ceil() as u64).max(64);
        let num_hashes = ((bits_per_key * ln2).ceil() as u32).clamp(1, 30);

        let word_count = num_bits.div_ceil(64) as usize;
        Self {
            words: vec![0u64; word_count],
            num_bits,
            num_hashes,
        }
    }

    /// Inserts a key into the filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (mut probe, step) = probe_seed(key);
        for _ in 0..self.num_hashes {
            let bit = probe % self.num_bits;
            self.words[(bit / 64) as usize] |= 1u64 << (bit % 64);
            probe = probe.wrapping_add(step);
        }
    }

    /// Returns `true` if the key **might** have been inserted, `false` if it
    /// **definitely** was not.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (mut probe, step) = probe_seed(key);
        for _ in 0..self.num_hashes {
            let bit = probe % self.num_bits;
            if self.words[(bit / 64) as usize] & (1u64 << (bit % 64)) == 0 {
                return false;
            }
            probe = probe.wrapping_add(step);
        }
        true
    }

    /// Number of bits in the filter.
    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Number of probes per key.
    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("words", &self.words.len())
            .finish()
    }
}

/// Folds both FNV-1a accumulators over the key in one pass. The step hash is
/// forced odd so consecutive probes never collapse onto a short cycle.
fn probe_seed(key: &[u8]) -> (u64, u64) {
    let mut h1 = FNV_OFFSET_BASIS;
    let mut h2 = FNV_OFFSET_BASIS ^ 0x5bd1_e995_7b7e_f6a5;
    for &byte in key {
        h1 = (h1 ^ u64::from(byte)).wrapping_mul(FNV_PRIME);
        h2 = (h2 ^ u64::from(byte.rotate_left(3))).wrapping_mul(FNV_PRIME);
    }
    (h1, h2 | 1)
}
