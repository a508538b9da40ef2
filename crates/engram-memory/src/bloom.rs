//! Bloom filter pre-filter for dedup keys
//!
//! Answers "definitely absent" or "maybe present". A maybe is always
//! followed by an exact or approximate check.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64_with_seed;

const SEED_A: u64 = 0x9E37_79B9_7F4A_7C15;
const SEED_B: u64 = 0xC2B2_AE3D_27D4_EB4F;

/// Sizing for a [`BloomFilter`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BloomConfig {
    /// Number of keys the filter is sized for
    pub expected_items: usize,

    /// Target false-positive rate at `expected_items`
    pub false_positive_rate: f64,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            expected_items: 20_000,
            false_positive_rate: 0.01,
        }
    }
}

impl BloomConfig {
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        Self {
            expected_items,
            false_positive_rate,
        }
    }

    /// Bit count and hash count for this sizing
    pub fn dimensions(&self) -> (usize, u32) {
        let n = self.expected_items.max(1) as f64;
        let p = self.false_positive_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;

        let bits = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as usize;
        let hashes = ((bits as f64 / n) * ln2).round().clamp(1.0, 16.0) as u32;
        (bits, hashes)
    }
}

/// Fixed-size Bloom filter with double hashing
#[derive(Debug, Clone)]
pub struct BloomFilter {
    words: Vec<u64>,
    bits: usize,
    hashes: u32,
    items: usize,
}

impl BloomFilter {
    pub fn new(config: &BloomConfig) -> Self {
        let (bits, hashes) = config.dimensions();
        let words = bits.div_ceil(64);
        Self {
            words: vec![0; words],
            bits: words * 64,
            hashes,
            items: 0,
        }
    }

    pub fn insert(&mut self, key: &str) {
        let (h1, h2) = Self::hash_pair(key);
        for i in 0..self.hashes {
            let bit = self.bit_index(h1, h2, i);
            self.words[bit / 64] |= 1 << (bit % 64);
        }
        self.items += 1;
    }

    /// False means the key was never inserted
    pub fn might_contain(&self, key: &str) -> bool {
        let (h1, h2) = Self::hash_pair(key);
        (0..self.hashes).all(|i| {
            let bit = self.bit_index(h1, h2, i);
            self.words[bit / 64] & (1 << (bit % 64)) != 0
        })
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.items = 0;
    }

    /// Insertions since creation or the last clear, duplicates included
    pub fn inserted(&self) -> usize {
        self.items
    }

    pub fn bit_count(&self) -> usize {
        self.bits
    }

    pub fn hash_count(&self) -> u32 {
        self.hashes
    }

    /// Expected false-positive rate at the current fill: (1 - e^(-kn/m))^k
    pub fn estimated_fp_rate(&self) -> f64 {
        let k = self.hashes as f64;
        let fill = 1.0 - (-(k * self.items as f64) / self.bits as f64).exp();
        fill.powf(k)
    }

    fn hash_pair(key: &str) -> (u64, u64) {
        let h1 = xxh3_64_with_seed(key.as_bytes(), SEED_A);
        // odd step so every probe sequence visits distinct bits
        let h2 = xxh3_64_with_seed(key.as_bytes(), SEED_B) | 1;
        (h1, h2)
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> usize {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.bits as u64) as usize
    }
}
