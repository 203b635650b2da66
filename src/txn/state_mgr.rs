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

//! Per-key access-class counters
//!
//! One 64-bit atomic word per key, partitioned into four access-class
//! fields. Cross-class conflict probes read the whole word in one load;
//! increments and decrements are CAS loops on the masked subfield.
//!
//! Bit layout:
//!
//! ```text
//!  63        62..42          41..21          20..0
//!  tpl write  tpl read        occ write       occ read
//!  (1 bit)    (21 bits)       (21 bits)       (21 bits)
//! ```
//!
//! The pessimistic-write field is a single bit since that class is
//! exclusive per key.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{hash_bytes, new_concurrent_cf_map, ByteMap, ConcurrentCfMap};
use crate::core::CfId;

const BASE_MASK: u64 = 0x1F_FFFF; // 21 bits

const OCC_READ_SHIFT: u32 = 0;
const OCC_WRITE_SHIFT: u32 = 21;
const PESSIMISTIC_READ_SHIFT: u32 = 42;
const PESSIMISTIC_WRITE_SHIFT: u32 = 63;

const OCC_READ_MASK: u64 = BASE_MASK << OCC_READ_SHIFT;
const OCC_WRITE_MASK: u64 = BASE_MASK << OCC_WRITE_SHIFT;
const PESSIMISTIC_READ_MASK: u64 = BASE_MASK << PESSIMISTIC_READ_SHIFT;
const PESSIMISTIC_WRITE_MASK: u64 = 1 << PESSIMISTIC_WRITE_SHIFT;

/// Decoded view of a state word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessCounts {
    pub occ_reads: u64,
    pub occ_writes: u64,
    pub pessimistic_reads: u64,
    pub pessimistic_write: bool,
}

/// Decodes a raw state word into per-class counts.
#[inline]
pub fn decode_state(word: u64) -> AccessCounts {
    AccessCounts {
        occ_reads: (word & OCC_READ_MASK) >> OCC_READ_SHIFT,
        occ_writes: (word & OCC_WRITE_MASK) >> OCC_WRITE_SHIFT,
        pessimistic_reads: (word & PESSIMISTIC_READ_MASK) >> PESSIMISTIC_READ_SHIFT,
        pessimistic_write: word & PESSIMISTIC_WRITE_MASK != 0,
    }
}

/// Counter handle for one key's state word.
#[derive(Debug, Clone)]
pub struct StateInfo {
    handle: Arc<AtomicU64>,
}

impl StateInfo {
    pub fn new(handle: Arc<AtomicU64>) -> Self {
        Self { handle }
    }

    /// Raw word, for cross-class conflict probes.
    #[inline]
    pub fn load(&self) -> u64 {
        self.handle.load(Ordering::Acquire)
    }

    fn add_impl(&self, mask: u64, shift: u32, delta: i64) {
        let mut old = self.handle.load(Ordering::Acquire);
        loop {
            let count = (old & mask) >> shift;
            let count = if delta > 0 {
                debug_assert!(count < mask >> shift, "access-class counter overflow");
                count + 1
            } else {
                debug_assert!(count > 0, "access-class counter underflow");
                count - 1
            };
            let new = (old & !mask) | (count << shift);
            match self
                .handle
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(observed) => old = observed,
            }
        }
    }

    pub fn increase_read(&self, optimistic: bool) {
        if optimistic {
            self.add_impl(OCC_READ_MASK, OCC_READ_SHIFT, 1);
        } else {
            self.add_impl(PESSIMISTIC_READ_MASK, PESSIMISTIC_READ_SHIFT, 1);
        }
    }

    pub fn decrease_read(&self, optimistic: bool) {
        if optimistic {
            self.add_impl(OCC_READ_MASK, OCC_READ_SHIFT, -1);
        } else {
            self.add_impl(PESSIMISTIC_READ_MASK, PESSIMISTIC_READ_SHIFT, -1);
        }
    }

    pub fn increase_write(&self, optimistic: bool) {
        if optimistic {
            self.add_impl(OCC_WRITE_MASK, OCC_WRITE_SHIFT, 1);
        } else {
            self.add_impl(PESSIMISTIC_WRITE_MASK, PESSIMISTIC_WRITE_SHIFT, 1);
        }
    }

    pub fn decrease_write(&self, optimistic: bool) {
        if optimistic {
            self.add_impl(OCC_WRITE_MASK, OCC_WRITE_SHIFT, -1);
        } else {
            self.add_impl(PESSIMISTIC_WRITE_MASK, PESSIMISTIC_WRITE_SHIFT, -1);
        }
    }
}

struct StateMapStripe {
    keys: Mutex<ByteMap<Arc<AtomicU64>>>,
}

/// Striped key -> state-word map for one column family.
pub struct StateMap {
    stripes: Vec<StateMapStripe>,
}

impl StateMap {
    fn new(num_stripes: usize) -> Self {
        Self {
            stripes: (0..num_stripes)
                .map(|_| StateMapStripe {
                    keys: Mutex::new(ByteMap::new()),
                })
                .collect(),
        }
    }

    fn state(&self, key: &[u8]) -> Arc<AtomicU64> {
        let idx = (hash_bytes(key) % self.stripes.len() as u64) as usize;
        let mut keys = self.stripes[idx].keys.lock();
        Arc::clone(keys.entry(key.to_vec()).or_default())
    }
}

/// Engine-wide state manager: `cf -> StateMap`.
pub struct TxnStateMgr {
    maps: ConcurrentCfMap<Arc<StateMap>>,
    num_stripes: usize,
}

impl TxnStateMgr {
    pub fn new(num_stripes: usize) -> Self {
        assert!(num_stripes > 0, "state map needs at least one stripe");
        Self {
            maps: new_concurrent_cf_map(),
            num_stripes,
        }
    }

    /// Counter handle for `(cf, key)`; maps and entries are created on
    /// first use.
    pub fn state(&self, cf: CfId, key: &[u8]) -> StateInfo {
        let map = if let Some(map) = self.maps.get(&cf) {
            Arc::clone(&map)
        } else {
            Arc::clone(
                &self
                    .maps
                    .entry(cf)
                    .or_insert_with(|| Arc::new(StateMap::new(self.num_stripes))),
            )
        };
        StateInfo::new(map.state(key))
    }

    /// Drops a column family's map. Callers must guarantee the column
    /// family is no longer in use; live StateInfo handles stay valid.
    pub fn remove_column_family(&self, cf: CfId) {
        self.maps.remove(&cf);
    }
}
