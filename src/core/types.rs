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

//! Core identifier and state types shared across the concurrency core

use std::sync::atomic::{AtomicU8, Ordering};

/// Storage sequence number; assigned by the storage layer on write-through.
pub type SequenceNumber = u64;

/// Transaction identifier, monotonically assigned per engine.
pub type TxnId = u64;

/// Column family identifier.
pub type CfId = u32;

/// Sentinel for "no sequence known" / "not recently written".
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = u64::MAX;

/// Key-state bit: key tracked as an optimistic read.
pub const KEY_STATE_OCC_READ: u8 = 1;
/// Key-state bit: key tracked as an optimistic write.
pub const KEY_STATE_OCC_WRITE: u8 = 2;
/// Key-state bit: key holds (or held) a pessimistic lock.
pub const KEY_STATE_PESSIMISTIC: u8 = 4;

/// Transaction lifecycle state.
///
/// `LocksStolen` is reachable only through expiration; a locks-stolen
/// transaction may only transition to `RolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxnState {
    /// Transaction is active and can perform operations
    Started = 0,
    /// Prepare in flight
    AwaitingPrepare = 1,
    /// Prepared; expiration no longer applies
    Prepared = 2,
    /// Commit in flight
    AwaitingCommit = 3,
    /// Terminal: committed
    Committed = 4,
    /// Rollback in flight
    AwaitingRollback = 5,
    /// Terminal: rolled back
    RolledBack = 6,
    /// Expired; another thread reclaimed the locks
    LocksStolen = 7,
}

impl TxnState {
    #[inline]
    fn from_u8(value: u8) -> TxnState {
        match value {
            0 => TxnState::Started,
            1 => TxnState::AwaitingPrepare,
            2 => TxnState::Prepared,
            3 => TxnState::AwaitingCommit,
            4 => TxnState::Committed,
            5 => TxnState::AwaitingRollback,
            6 => TxnState::RolledBack,
            _ => TxnState::LocksStolen,
        }
    }

    /// Returns true for the terminal states.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, TxnState::Committed | TxnState::RolledBack)
    }
}

/// Atomic cell holding a [`TxnState`].
///
/// The state must be shareable across threads because lock stealing flips an
/// expired transaction's state from another thread.
#[derive(Debug)]
pub struct AtomicTxnState(AtomicU8);

impl AtomicTxnState {
    pub fn new(state: TxnState) -> Self {
        AtomicTxnState(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn load(&self) -> TxnState {
        TxnState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, state: TxnState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Transition `current` -> `new` atomically; returns whether the swap
    /// happened.
    #[inline]
    pub fn compare_exchange(&self, current: TxnState, new: TxnState) -> bool {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Collapsed transaction state published in the metadata registry.
///
/// Dependents spin on this value; the transition to `Committed` or `Aborted`
/// happens exactly once, after commit_seq has been published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SimpleState {
    Started = 0,
    Committed = 1,
    Aborted = 2,
}

impl SimpleState {
    #[inline]
    fn from_u8(value: u8) -> SimpleState {
        match value {
            0 => SimpleState::Started,
            1 => SimpleState::Committed,
            _ => SimpleState::Aborted,
        }
    }
}

/// Atomic cell holding a [`SimpleState`].
#[derive(Debug)]
pub struct AtomicSimpleState(AtomicU8);

impl AtomicSimpleState {
    pub fn new(state: SimpleState) -> Self {
        AtomicSimpleState(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn load(&self) -> SimpleState {
        SimpleState::from_u8(self.0.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn store(&self, state: SimpleState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}
