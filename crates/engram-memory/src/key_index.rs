//! Exact-key index
//!
//! Fixed bucket array addressed by xxh3. Entries live in an arena and each
//! bucket is a chain of arena indices; freed entries go on a free list.

use engram_core::NodeId;
use serde::{Deserialize, Serialize};
use tracing::warn;
use xxhash_rust::xxh3::xxh3_64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeyIndexConfig {
    /// Number of buckets, rounded up to a power of two
    pub buckets: usize,

    /// Chain length that triggers a capacity warning
    pub max_bucket_depth: usize,
}

impl Default for KeyIndexConfig {
    fn default() -> Self {
        Self {
            buckets: 8192,
            max_bucket_depth: 8,
        }
    }
}

impl KeyIndexConfig {
    pub fn new(buckets: usize, max_bucket_depth: usize) -> Self {
        Self {
            buckets,
            max_bucket_depth,
        }
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Occupied {
        key: String,
        handle: NodeId,
        next: Option<usize>,
    },
    Free {
        next_free: Option<usize>,
    },
}

/// Hash map from dedup key to node handle
#[derive(Debug, Clone)]
pub struct KeyIndex {
    buckets: Vec<Option<usize>>,
    depths: Vec<usize>,
    warned: Vec<bool>,
    slots: Vec<Slot>,
    free_head: Option<usize>,
    len: usize,
    max_depth: usize,
    depth_warnings: usize,
}

impl KeyIndex {
    pub fn new(config: &KeyIndexConfig) -> Self {
        let buckets = config.buckets.max(1).next_power_of_two();
        Self {
            buckets: vec![None; buckets],
            depths: vec![0; buckets],
            warned: vec![false; buckets],
            slots: Vec::new(),
            free_head: None,
            len: 0,
            max_depth: config.max_bucket_depth.max(1),
            depth_warnings: 0,
        }
    }

    fn bucket_of(&self, key: &str) -> usize {
        (xxh3_64(key.as_bytes()) as usize) & (self.buckets.len() - 1)
    }

    fn find(&self, bucket: usize, key: &str) -> Option<usize> {
        let mut cursor = self.buckets[bucket];
        while let Some(index) = cursor {
            match &self.slots[index] {
                Slot::Occupied { key: k, next, .. } => {
                    if k == key {
                        return Some(index);
                    }
                    cursor = *next;
                }
                Slot::Free { .. } => return None,
            }
        }
        None
    }

    fn allocate(&mut self, slot: Slot) -> usize {
        match self.free_head {
            Some(index) => {
                if let Slot::Free { next_free } = self.slots[index] {
                    self.free_head = next_free;
                }
                self.slots[index] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        }
    }

    /// Map `key` to `handle`, returning the handle it replaced
    pub fn insert(&mut self, key: &str, handle: NodeId) -> Option<NodeId> {
        let bucket = self.bucket_of(key);
        if let Some(index) = self.find(bucket, key) {
            if let Slot::Occupied { handle: h, .. } = &mut self.slots[index] {
                return Some(std::mem::replace(h, handle));
            }
        }

        let index = self.allocate(Slot::Occupied {
            key: key.to_string(),
            handle,
            next: self.buckets[bucket],
        });
        self.buckets[bucket] = Some(index);
        self.depths[bucket] += 1;
        self.len += 1;

        if self.depths[bucket] > self.max_depth && !self.warned[bucket] {
            self.warned[bucket] = true;
            self.depth_warnings += 1;
            warn!(
                "Key index bucket {} exceeded depth {} ({} entries)",
                bucket, self.max_depth, self.depths[bucket]
            );
        }
        None
    }

    pub fn lookup(&self, key: &str) -> Option<NodeId> {
        let bucket = self.bucket_of(key);
        self.find(bucket, key).and_then(|index| match &self.slots[index] {
            Slot::Occupied { handle, .. } => Some(*handle),
            Slot::Free { .. } => None,
        })
    }

    pub fn remove(&mut self, key: &str) -> Option<NodeId> {
        let bucket = self.bucket_of(key);
        let mut prev: Option<usize> = None;
        let mut cursor = self.buckets[bucket];

        while let Some(index) = cursor {
            let (matches, next) = match &self.slots[index] {
                Slot::Occupied { key: k, next, .. } => (k == key, *next),
                Slot::Free { .. } => return None,
            };
            if !matches {
                prev = cursor;
                cursor = next;
                continue;
            }

            match prev {
                Some(p) => {
                    if let Slot::Occupied { next: n, .. } = &mut self.slots[p] {
                        *n = next;
                    }
                }
                None => self.buckets[bucket] = next,
            }
            let freed = std::mem::replace(
                &mut self.slots[index],
                Slot::Free {
                    next_free: self.free_head,
                },
            );
            self.free_head = Some(index);
            self.depths[bucket] -= 1;
            self.len -= 1;
            return match freed {
                Slot::Occupied { handle, .. } => Some(handle),
                Slot::Free { .. } => None,
            };
        }
        None
    }

    /// Remove `key` only while it still maps to `handle`
    pub fn remove_entry(&mut self, key: &str, handle: NodeId) -> bool {
        if self.lookup(key) == Some(handle) {
            self.remove(key);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length of the longest chain
    pub fn deepest_bucket(&self) -> usize {
        self.depths.iter().copied().max().unwrap_or(0)
    }

    /// Buckets that have crossed the depth bound
    pub fn depth_warnings(&self) -> usize {
        self.depth_warnings
    }

    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.depths.iter_mut().for_each(|d| *d = 0);
        self.warned.iter_mut().for_each(|w| *w = false);
        self.slots.clear();
        self.free_head = None;
        self.len = 0;
        self.depth_warnings = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::EntityId;

    fn id(n: u64) -> NodeId {
        NodeId::from_internal(n)
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut index = KeyIndex::new(&KeyIndexConfig::default());
        assert_eq!(index.insert("user_name", id(1)), None);
        assert_eq!(index.lookup("user_name"), Some(id(1)));

        assert_eq!(index.insert("user_name", id(2)), Some(id(1)));
        assert_eq!(index.len(), 1);

        assert_eq!(index.remove("user_name"), Some(id(2)));
        assert_eq!(index.lookup("user_name"), None);
        assert!(index.is_empty());
    }

    #[test]
    fn test_chains_and_free_list() {
        // single bucket: everything chains
        let mut index = KeyIndex::new(&KeyIndexConfig::new(1, 100));
        for n in 0..10 {
            index.insert(&format!("k{}", n), id(n));
        }
        assert_eq!(index.deepest_bucket(), 10);

        assert_eq!(index.remove("k0"), Some(id(0)));
        assert_eq!(index.remove("k5"), Some(id(5)));
        assert_eq!(index.remove("k9"), Some(id(9)));
        assert_eq!(index.remove("k5"), None);

        for n in [1, 2, 3, 4, 6, 7, 8] {
            assert_eq!(index.lookup(&format!("k{}", n)), Some(id(n)));
        }

        // freed slots are reused
        index.insert("fresh", id(42));
        index.insert("fresh2", id(43));
        assert_eq!(index.slots.len(), 10);
        assert_eq!(index.lookup("fresh"), Some(id(42)));
        assert_eq!(index.len(), 9);
    }

    #[test]
    fn test_depth_warning_is_not_failure() {
        let mut index = KeyIndex::new(&KeyIndexConfig::new(1, 4));
        for n in 0..20 {
            index.insert(&format!("k{}", n), id(n));
        }
        // one bucket, warned once
        assert_eq!(index.depth_warnings(), 1);
        for n in 0..20 {
            assert_eq!(index.lookup(&format!("k{}", n)), Some(id(n)));
        }
    }

    #[test]
    fn test_remove_entry_checks_handle() {
        let mut index = KeyIndex::new(&KeyIndexConfig::default());
        index.insert("k", id(2));
        assert!(!index.remove_entry("k", id(1)));
        assert!(index.remove_entry("k", id(2)));
        assert!(index.lookup("k").is_none());
    }
}
