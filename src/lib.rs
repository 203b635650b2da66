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

//! # Interlock - mixed-mode concurrency control for KV storage
//!
//! Interlock is the concurrency-control core of a transactional key-value
//! engine that interleaves two disciplines on one keyspace: strict
//! two-phase locking for pessimistic accesses and dirty-version optimistic
//! concurrency control for optimistic ones. A single transaction may mix
//! both per operation.
//!
//! ## Key pieces
//!
//! - **Dirty buffer** — a concurrent keyed store of uncommitted writes and
//!   read markers. Dirty reads, write-write and anti-dependency capture,
//!   scan-overlap capture; fine-grained bucket locking with a buffer-wide
//!   exclusive mode for range scans.
//! - **Lock manager** — per-key shared/exclusive owner/waiter queues with
//!   in-place upgrade, FIFO grant with shared batching, timeouts, and lock
//!   stealing from expired transactions.
//! - **Dependency engine** — per-transaction dependency sets, with either
//!   full-termination waits at commit or piece-level waits driven by a
//!   workload conflict table.
//! - **Commit path** — dependency wait, OCC-write lock upgrade, validation
//!   of optimistic reads against last-committed sequences inside the
//!   storage write callback, ordered release of locks and dirty entries.
//!
//! The storage layer itself (memtable/LSM, WAL, snapshots) sits behind the
//! [`Storage`] trait; [`MemStorage`] is the bundled in-memory reference.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use interlock::{AccessMode, EngineConfig, MemStorage, TransactionDb, TransactionOptions};
//!
//! let db = TransactionDb::new(Arc::new(MemStorage::new()), EngineConfig::default());
//!
//! let mut txn = db.begin(TransactionOptions::default());
//! txn.put(0, b"answer", b"42", AccessMode::Optimistic).unwrap();
//! txn.commit().unwrap();
//!
//! let mut reader = db.begin(TransactionOptions::default());
//! let value = reader.get(0, b"answer", AccessMode::Pessimistic, false).unwrap();
//! assert_eq!(value.as_deref(), Some(b"42".as_ref()));
//! ```

pub mod common;
pub mod core;
pub mod storage;
pub mod txn;

// Re-export core types
pub use crate::core::{
    CfId, Error, Result, SequenceNumber, SimpleState, TxnId, TxnState, MAX_SEQUENCE_NUMBER,
};

// Re-export storage seam types
pub use storage::{
    BatchGet, BatchOp, BytewiseComparator, CommitCallback, Comparator, EngineConfig, MemStorage,
    NearbyInfo, NoopCommitCallback, ScannedRow, Storage, TransactionOptions, WriteBatch,
};

// Re-export concurrency-core types
pub use txn::{
    check_transaction_state, decode_state, AccessInfo, AccessList, AccessMode, ConflictTable,
    DirtyBuffer, DirtyHit, DirtyScanCallback, DirtyWriteContext, GrabOutcome, GrantSignal,
    HolderState, LockList, LockManager, LockMode, StateInfo, TrackedKeyInfo, Transaction,
    TransactionDb, TxnMetadata, TxnRegistry, TxnStateMgr, ValidationMap,
    DEPENDENCY_WAIT_CAP_MICROS, WAIT_FOR_TERMINATION,
};
