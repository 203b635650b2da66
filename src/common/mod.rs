// Copyright 2026 Interlock Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared utilities: fast hash maps and clock access
//!
//! - `ByteMap`/`ByteSet` for byte-string keys (AHash)
//! - `ConcurrentTxnMap`/`ConcurrentCfMap` for concurrent access (DashMap)
//! - `hash_bytes` for stripe and bucket selection (FxHash)

pub mod clock;

use ahash::{AHashMap, AHashSet};
use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::hash::{BuildHasherDefault, Hasher};

/// Type alias for FxHash's BuildHasher
pub type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Fast hash map for byte-string keys
///
/// AHash handles variable-length keys well thanks to AES-NI, which makes it
/// the better choice over FxHash for user keys.
pub type ByteMap<V> = AHashMap<Vec<u8>, V>;

/// Fast hash set for byte-string keys
pub type ByteSet = AHashSet<Vec<u8>>;

/// Concurrent hash map keyed by transaction id
///
/// Uses DashMap with FxHash: sharded, lock-free reads and fine-grained
/// locking for writes.
pub type ConcurrentTxnMap<V> = DashMap<u64, V, FxBuildHasher>;

/// Concurrent hash map keyed by column family id
pub type ConcurrentCfMap<V> = DashMap<u32, V, FxBuildHasher>;

/// Create a new ConcurrentTxnMap
#[inline]
pub fn new_concurrent_txn_map<V>() -> ConcurrentTxnMap<V> {
    DashMap::with_hasher(FxBuildHasher::default())
}

/// Create a new ConcurrentCfMap
#[inline]
pub fn new_concurrent_cf_map<V>() -> ConcurrentCfMap<V> {
    DashMap::with_hasher(FxBuildHasher::default())
}

/// Hashes a byte-string key for stripe/bucket selection.
///
/// Integer-keyed structures pick their shard with `hash_bytes(key) % n`;
/// the distribution quality of FxHash is sufficient for that purpose and
/// it is cheaper than AHash for one-shot hashing.
#[inline]
pub fn hash_bytes(key: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(key);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_bytes_deterministic() {
        assert_eq!(hash_bytes(b"key-1"), hash_bytes(b"key-1"));
        assert_ne!(hash_bytes(b"key-1"), hash_bytes(b"key-2"));
    }

    #[test]
    fn test_hash_bytes_spreads_sequential_keys() {
        // Sequential keys should land on different stripes most of the time.
        let stripes = 16u64;
        let mut seen = std::collections::HashSet::new();
        for i in 0..64u32 {
            let key = format!("key-{i:04}");
            seen.insert(hash_bytes(key.as_bytes()) % stripes);
        }
        assert!(seen.len() > 8, "keys clustered on {} stripes", seen.len());
    }
}
