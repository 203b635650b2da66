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

//! Per-column-family access history
//!
//! Newest-first chains of committed accessors per key, used by the
//! pessimistic path to resolve the previous accessor of a key. Not on the
//! optimistic hot path. Each stripe owns its keys behind a read-write
//! mutex.

use std::collections::VecDeque;

use parking_lot::RwLock;

use crate::common::{hash_bytes, ByteMap};
use crate::core::{Error, Result, SequenceNumber, TxnId};

/// One accessor in a key's history chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessInfo {
    pub seq: SequenceNumber,
    pub txn_id: TxnId,
}

/// Striped key -> accessor-chain map for one column family.
pub struct AccessList {
    stripes: Vec<RwLock<ByteMap<VecDeque<AccessInfo>>>>,
}

impl AccessList {
    pub fn new(num_stripes: usize) -> Self {
        assert!(num_stripes > 0, "access list needs at least one stripe");
        Self {
            stripes: (0..num_stripes)
                .map(|_| RwLock::new(ByteMap::new()))
                .collect(),
        }
    }

    #[inline]
    fn stripe(&self, key: &[u8]) -> &RwLock<ByteMap<VecDeque<AccessInfo>>> {
        let idx = (hash_bytes(key) % self.stripes.len() as u64) as usize;
        &self.stripes[idx]
    }

    /// Prepends an accessor to the key's chain.
    pub fn add(&self, key: &[u8], seq: SequenceNumber, txn_id: TxnId) {
        let mut map = self.stripe(key).write();
        map.entry(key.to_vec())
            .or_default()
            .push_front(AccessInfo { seq, txn_id });
    }

    /// The newest accessor of `key`, or `NotFound` when the key has no
    /// history.
    pub fn get(&self, key: &[u8]) -> Result<AccessInfo> {
        let map = self.stripe(key).read();
        map.get(key)
            .and_then(|chain| chain.front().copied())
            .ok_or(Error::NotFound)
    }

    /// Splices every node of `txn_id` out of the key's chain; an emptied
    /// chain is removed.
    pub fn remove(&self, key: &[u8], txn_id: TxnId) {
        let mut map = self.stripe(key).write();
        if let Some(chain) = map.get_mut(key) {
            chain.retain(|info| info.txn_id != txn_id);
            if chain.is_empty() {
                map.remove(key);
            }
        }
    }

    /// Total number of chained nodes. Test/debug helper.
    pub fn len(&self) -> usize {
        self.stripes
            .iter()
            .map(|stripe| stripe.read().values().map(VecDeque::len).sum::<usize>())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
