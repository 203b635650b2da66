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

//! Concurrency control core
//!
//! Mixed-mode transaction machinery over a shared keyspace:
//!
//! - [`LockList`] / [`LockManager`] — per-key S/X lock queues behind
//!   striped maps (the pessimistic half)
//! - [`DirtyBuffer`] — uncommitted versions, read markers, and dependency
//!   capture (the optimistic half)
//! - [`ValidationMap`], [`AccessList`], [`TxnStateMgr`] — commit-time
//!   validation and access bookkeeping
//! - [`TxnRegistry`] / [`TxnMetadata`] — published transaction state that
//!   dependents spin on
//! - [`ConflictTable`] — piece-level wait rules per workload type
//! - [`TransactionDb`] / [`Transaction`] — the engine handle and the
//!   per-transaction façade tying it together
//!
//! # Transaction lifecycle
//!
//! ```text
//! Begin -> Started -> [AwaitingPrepare -> Prepared] -> AwaitingCommit -> Committed
//!                 \-> LocksStolen (expiration) ----------------------\-> RolledBack
//! ```

pub mod access_list;
pub mod conflict;
pub mod dirty_buffer;
pub mod engine;
pub mod lock_list;
pub mod lock_manager;
pub mod registry;
pub mod state_mgr;
pub mod transaction;
pub mod validation_map;

pub use access_list::{AccessInfo, AccessList};
pub use conflict::{
    check_transaction_state, ConflictTable, DEPENDENCY_WAIT_CAP_MICROS, WAIT_FOR_TERMINATION,
};
pub use dirty_buffer::{DirtyBuffer, DirtyHit, DirtyScanCallback, DirtyWriteContext};
pub use engine::TransactionDb;
pub use lock_list::{GrabOutcome, GrantSignal, HolderState, LockList, LockMode};
pub use lock_manager::LockManager;
pub use registry::{ExpirableHandle, ExpirableRegistry, TxnMetadata, TxnRegistry};
pub use state_mgr::{decode_state, AccessCounts, StateInfo, StateMap, TxnStateMgr};
pub use transaction::{AccessMode, TrackedKeyInfo, Transaction};
pub use validation_map::ValidationMap;
