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

//! Piece-level dependency wait tests
//!
//! Conflict-table driven waits: skipping at zero-conflict pieces,
//! releasing on dependent piece progress, and full-termination waits for
//! unknown tuples.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use interlock::{
    AccessMode, ConflictTable, EngineConfig, MemStorage, TransactionDb, TransactionOptions,
};

fn engine() -> Arc<TransactionDb> {
    TransactionDb::new(Arc::new(MemStorage::new()), EngineConfig::default())
}

/// Builds a waiter with a captured dependency on a fresh dependent of the
/// given type.
fn waiter_with_dep(
    db: &Arc<TransactionDb>,
    dep_type: u32,
) -> (interlock::Transaction, interlock::Transaction) {
    let mut dep = db.begin(TransactionOptions::default());
    dep.set_txn_type(dep_type);
    dep.put(0, b"shared", b"d", AccessMode::Optimistic).unwrap();

    let mut waiter = db.begin(TransactionOptions::default());
    waiter.set_txn_type(0);
    waiter.put(0, b"shared", b"w", AccessMode::Optimistic).unwrap();
    assert_eq!(waiter.dependencies(), &[dep.id()]);
    (dep, waiter)
}

#[test]
fn test_zero_conflict_piece_skips_without_removing() {
    // S6, first half: table entry (0, 1, 0) = 0 means no wait at piece 1,
    // and the dependency is retained because the conflict is not a
    // full-termination one.
    let db = engine();
    let (dep, mut waiter) = waiter_with_dep(&db, 0);

    waiter.wait_for_piece(0, 1).unwrap();
    assert_eq!(waiter.dependencies(), &[dep.id()]);
}

#[test]
fn test_piece_wait_releases_on_progress() {
    // S6, second half: table entry (0, 2, 0) = 2 blocks until the
    // dependent reaches piece 2, and still keeps the dependency.
    let db = engine();
    let (dep, mut waiter) = waiter_with_dep(&db, 0);
    let dep_id = dep.id();

    let handle = thread::spawn(move || {
        waiter.wait_for_piece(0, 2).unwrap();
        waiter
    });

    thread::sleep(Duration::from_millis(60));
    assert!(!handle.is_finished(), "waiter released before dep progressed");

    dep.set_piece_idx(2);
    let waiter = handle.join().unwrap();
    assert_eq!(waiter.dependencies(), &[dep_id]);
}

#[test]
fn test_unknown_tuple_waits_for_termination_and_removes() {
    // Tuples outside the table wait for full termination; a dependency
    // satisfied that way is dropped from the set.
    let db = engine();
    let (mut dep, mut waiter) = waiter_with_dep(&db, 0);

    let handle = thread::spawn(move || {
        // Piece 9 has no entry for (0, 9, 0).
        waiter.wait_for_piece(0, 9).unwrap();
        waiter
    });

    thread::sleep(Duration::from_millis(60));
    assert!(!handle.is_finished());

    dep.commit().unwrap();
    let waiter = handle.join().unwrap();
    assert!(waiter.dependencies().is_empty());
}

#[test]
fn test_piece_progress_insufficient_then_sufficient() {
    // (0, 4, 0) = 4: piece 3 is not enough, piece 4 releases.
    let db = engine();
    let (dep, mut waiter) = waiter_with_dep(&db, 0);
    dep.set_piece_idx(3);

    let handle = thread::spawn(move || {
        waiter.wait_for_piece(0, 4).unwrap();
        waiter
    });

    thread::sleep(Duration::from_millis(60));
    assert!(!handle.is_finished());

    dep.set_piece_idx(4);
    handle.join().unwrap();
}

#[test]
fn test_custom_conflict_table() {
    // A workload can ship its own table; unknown tuples still fall back
    // to full-termination waits.
    let table = ConflictTable::from_entries([((7, 1, 7), 0), ((7, 2, 7), 1)]);
    let db = TransactionDb::with_parts(
        Arc::new(MemStorage::new()),
        EngineConfig::default(),
        Arc::new(interlock::BytewiseComparator),
        table,
    );

    let mut dep = db.begin(TransactionOptions::default());
    dep.set_txn_type(7);
    dep.put(0, b"k", b"d", AccessMode::Optimistic).unwrap();

    let mut waiter = db.begin(TransactionOptions::default());
    waiter.set_txn_type(7);
    waiter.put(0, b"k", b"w", AccessMode::Optimistic).unwrap();

    // (7, 1, 7) = 0: no wait.
    waiter.wait_for_piece(7, 1).unwrap();

    // (7, 2, 7) = 1: released once the dependent reaches piece 1.
    dep.set_piece_idx(1);
    waiter.wait_for_piece(7, 2).unwrap();
    assert_eq!(waiter.dependencies(), &[dep.id()]);
}

#[test]
fn test_dependent_abort_during_piece_wait() {
    // An ordering-only dependency whose dependent aborts is dropped and
    // the waiter proceeds.
    let db = engine();
    let (mut dep, mut waiter) = waiter_with_dep(&db, 0);

    let handle = thread::spawn(move || {
        waiter.wait_for_piece(0, 9).unwrap();
        waiter
    });
    thread::sleep(Duration::from_millis(40));
    dep.rollback().unwrap();

    let waiter = handle.join().unwrap();
    assert!(waiter.dependencies().is_empty());
}
