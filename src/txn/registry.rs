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

//! Process-wide transaction registries
//!
//! Three registries share this module:
//!
//! - [`TxnRegistry`] publishes a [`TxnMetadata`] per live transaction.
//!   Dependents spin on the metadata's simple state; the entry stays
//!   readable after the transaction object is gone, until [`retire`] runs.
//! - The expirable table maps expirable transactions to their shared state
//!   cell so a blocked waiter can steal locks from an expired owner.
//! - The name table backs `set_name` uniqueness.
//!
//! [`retire`]: TxnRegistry::retire

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::common::{new_concurrent_txn_map, ConcurrentTxnMap};
use crate::common::clock::now_micros;
use crate::core::{
    AtomicSimpleState, AtomicTxnState, SequenceNumber, SimpleState, TxnId, TxnState,
};

/// Shared per-transaction metadata published for dependents.
///
/// Writers publish `commit_seq` before flipping `state` to a terminal
/// value; a dependent that observes `Committed` is therefore guaranteed to
/// read the final commit sequence.
#[derive(Debug)]
pub struct TxnMetadata {
    state: AtomicSimpleState,
    current_piece_idx: AtomicU32,
    txn_type: AtomicU32,
    commit_seq: AtomicU64,
}

impl TxnMetadata {
    fn new() -> Self {
        Self {
            state: AtomicSimpleState::new(SimpleState::Started),
            current_piece_idx: AtomicU32::new(0),
            txn_type: AtomicU32::new(0),
            commit_seq: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn state(&self) -> SimpleState {
        self.state.load()
    }

    /// Terminal-state publication; must run after `set_commit_seq`.
    #[inline]
    pub fn set_state(&self, state: SimpleState) {
        self.state.store(state);
    }

    #[inline]
    pub fn current_piece_idx(&self) -> u32 {
        self.current_piece_idx.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_current_piece_idx(&self, idx: u32) {
        self.current_piece_idx.store(idx, Ordering::Release);
    }

    #[inline]
    pub fn txn_type(&self) -> u32 {
        self.txn_type.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_txn_type(&self, txn_type: u32) {
        self.txn_type.store(txn_type, Ordering::Release);
    }

    #[inline]
    pub fn commit_seq(&self) -> SequenceNumber {
        self.commit_seq.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_commit_seq(&self, seq: SequenceNumber) {
        self.commit_seq.store(seq, Ordering::Release);
    }
}

/// Registry of live (and recently terminated) transaction metadata.
#[derive(Debug)]
pub struct TxnRegistry {
    next_txn_id: AtomicU64,
    txns: ConcurrentTxnMap<Arc<TxnMetadata>>,
}

impl Default for TxnRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnRegistry {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            txns: new_concurrent_txn_map(),
        }
    }

    /// Allocates the next transaction id.
    #[inline]
    pub fn next_id(&self) -> TxnId {
        self.next_txn_id.fetch_add(1, Ordering::AcqRel)
    }

    /// Publishes metadata for a newly created transaction.
    pub fn register(&self, txn_id: TxnId) -> Arc<TxnMetadata> {
        let metadata = Arc::new(TxnMetadata::new());
        self.txns.insert(txn_id, Arc::clone(&metadata));
        metadata
    }

    /// Metadata for `txn_id`, if not yet retired.
    pub fn get(&self, txn_id: TxnId) -> Option<Arc<TxnMetadata>> {
        self.txns.get(&txn_id).map(|entry| Arc::clone(&entry))
    }

    /// Reclaims a terminated transaction's entry. Callers must ensure every
    /// dependent has already observed the terminal state.
    pub fn retire(&self, txn_id: TxnId) {
        self.txns.remove(&txn_id);
    }

    /// Number of registered entries (live + not yet retired).
    pub fn len(&self) -> usize {
        self.txns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txns.is_empty()
    }
}

/// Handle to an expirable transaction's shared state.
#[derive(Debug, Clone)]
pub struct ExpirableHandle {
    pub state: Arc<AtomicTxnState>,
    pub expiration_time: u64,
}

/// Table of expirable transactions, consulted by blocked lock waiters.
#[derive(Debug)]
pub struct ExpirableRegistry {
    txns: ConcurrentTxnMap<ExpirableHandle>,
}

impl Default for ExpirableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpirableRegistry {
    pub fn new() -> Self {
        Self {
            txns: new_concurrent_txn_map(),
        }
    }

    pub fn insert(&self, txn_id: TxnId, state: Arc<AtomicTxnState>, expiration_time: u64) {
        self.txns.insert(
            txn_id,
            ExpirableHandle {
                state,
                expiration_time,
            },
        );
    }

    pub fn remove(&self, txn_id: TxnId) {
        self.txns.remove(&txn_id);
    }

    /// Attempts to steal an expired transaction's locks by flipping its
    /// state STARTED -> LOCKS_STOLEN. Only succeeds when the deadline has
    /// passed and the owner has not advanced beyond STARTED.
    pub fn try_steal(&self, txn_id: TxnId) -> bool {
        let Some(handle) = self.txns.get(&txn_id) else {
            return false;
        };
        if handle.expiration_time == 0 || now_micros() < handle.expiration_time {
            return false;
        }
        let stolen = handle
            .state
            .compare_exchange(TxnState::Started, TxnState::LocksStolen);
        if stolen {
            debug!(txn_id, "stole locks from expired transaction");
        }
        stolen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let registry = TxnRegistry::new();
        let id = registry.next_id();
        let metadata = registry.register(id);

        assert_eq!(metadata.state(), SimpleState::Started);
        assert!(registry.get(id).is_some());
        assert!(registry.get(id + 1).is_none());
    }

    #[test]
    fn test_ids_monotonic() {
        let registry = TxnRegistry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        assert!(b > a);
    }

    #[test]
    fn test_commit_seq_visible_after_state_flip() {
        let registry = TxnRegistry::new();
        let id = registry.next_id();
        let metadata = registry.register(id);

        metadata.set_commit_seq(42);
        metadata.set_state(SimpleState::Committed);

        let seen = registry.get(id).unwrap();
        assert_eq!(seen.state(), SimpleState::Committed);
        assert_eq!(seen.commit_seq(), 42);
    }

    #[test]
    fn test_retire() {
        let registry = TxnRegistry::new();
        let id = registry.next_id();
        registry.register(id);
        registry.retire(id);
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn test_piece_and_type() {
        let registry = TxnRegistry::new();
        let metadata = registry.register(registry.next_id());
        metadata.set_txn_type(2);
        metadata.set_current_piece_idx(5);
        assert_eq!(metadata.txn_type(), 2);
        assert_eq!(metadata.current_piece_idx(), 5);
    }

    #[test]
    fn test_try_steal_requires_expiry() {
        let expirable = ExpirableRegistry::new();
        let state = Arc::new(AtomicTxnState::new(TxnState::Started));

        // Deadline far in the future: no steal.
        expirable.insert(7, Arc::clone(&state), now_micros() + 60_000_000);
        assert!(!expirable.try_steal(7));
        assert_eq!(state.load(), TxnState::Started);

        // Deadline in the past: steal flips the state exactly once.
        expirable.insert(7, Arc::clone(&state), now_micros() - 1);
        assert!(expirable.try_steal(7));
        assert_eq!(state.load(), TxnState::LocksStolen);
        assert!(!expirable.try_steal(7));
    }

    #[test]
    fn test_try_steal_unknown_txn() {
        let expirable = ExpirableRegistry::new();
        assert!(!expirable.try_steal(99));
    }
}
