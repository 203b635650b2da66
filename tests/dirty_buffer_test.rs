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

//! Dirty buffer tests
//!
//! Dependency-capture completeness and release cleanliness across the
//! transaction façade, plus buffer behavior under bucket collisions and
//! concurrent scans.

use std::sync::Arc;
use std::thread;

use rand::Rng;

use interlock::{
    AccessMode, DirtyBuffer, DirtyWriteContext, EngineConfig, MemStorage, TransactionDb,
    TransactionOptions,
};

fn engine() -> Arc<TransactionDb> {
    TransactionDb::new(Arc::new(MemStorage::new()), EngineConfig::default())
}

#[test]
fn test_dependency_capture_both_directions() {
    // Property 3: T1 writes k, T2 reads k while dirty. T1 lands in
    // T2's dependency set; T2 lands in T1's (as an anti-dependency) once
    // T1 probes the key again.
    let db = engine();
    let mut t1 = db.begin(TransactionOptions::default());
    t1.put(0, b"k", b"v1", AccessMode::Optimistic).unwrap();

    let mut t2 = db.begin(TransactionOptions::default());
    assert_eq!(
        t2.get(0, b"k", AccessMode::Optimistic, true).unwrap(),
        Some(b"v1".to_vec())
    );
    assert!(t2.dependencies().contains(&t1.id()));

    t1.put(0, b"k", b"v2", AccessMode::Optimistic).unwrap();
    assert!(t1.dependencies().contains(&t2.id()));

    // The reader aborts; the anti-dependency is ordering-only, so T1's
    // commit proceeds.
    t2.rollback().unwrap();
    t1.commit().unwrap();

    let mut check = db.begin(TransactionOptions::default());
    assert_eq!(
        check.get(0, b"k", AccessMode::Pessimistic, false).unwrap(),
        Some(b"v2".to_vec())
    );
}

#[test]
fn test_no_residue_after_mixed_workload() {
    // Property 2: whatever mix of writes, dirty reads, and scans a
    // transaction performed, termination leaves no record behind.
    let db = engine();

    let mut setup = db.begin(TransactionOptions::default());
    setup.put(0, b"seed", b"s", AccessMode::Pessimistic).unwrap();
    setup.commit().unwrap();

    let mut ids = Vec::new();
    for round in 0..6u32 {
        let mut txn = db.begin(TransactionOptions::default());
        ids.push(txn.id());
        let key = format!("k{}", round % 3);
        txn.put(0, key.as_bytes(), b"v", AccessMode::Optimistic).unwrap();
        txn.get(0, b"seed", AccessMode::Optimistic, true).unwrap();
        txn.scan(0, b"a", b"z").unwrap();
        if round % 2 == 0 {
            let _ = txn.commit();
        } else {
            txn.rollback().unwrap();
        }
    }

    let buffer = db.dirty_buffer(0);
    for id in ids {
        assert!(!buffer.contains_txn(id), "txn {} left dirty residue", id);
    }
    assert_eq!(db.lock_manager().live_lock_count(), 0);
}

#[test]
fn test_interleaved_keys_in_one_bucket() {
    // A single-bucket buffer chains every key together; per-key walks
    // must still resolve the right records.
    let buffer = DirtyBuffer::new(0, 1);
    let mut ctx = DirtyWriteContext::default();
    buffer.put(b"k1", b"a", 1, 1, &mut ctx).unwrap();

    let mut ctx = DirtyWriteContext::default();
    buffer.put(b"k2", b"b", 2, 2, &mut ctx).unwrap();
    // Different key: no write-write dependency.
    assert_eq!(ctx.write_txn_id, 0);

    let mut ctx = DirtyWriteContext::default();
    buffer.put(b"k1", b"c", 3, 3, &mut ctx).unwrap();
    assert_eq!(ctx.write_txn_id, 1);

    assert_eq!(buffer.get(b"k2", 9).unwrap().txn_id, 2);
    assert_eq!(buffer.get(b"k1", 9).unwrap().txn_id, 3);
}

#[test]
fn test_scan_writer_capture_is_symmetric() {
    // A scan that observes a dirty value depends on the writer; a write
    // after the scan depends on the scanner. Both directions through the
    // transaction façade.
    let db = engine();

    let mut writer = db.begin(TransactionOptions::default());
    writer.put(0, b"w", b"1", AccessMode::Optimistic).unwrap();

    let mut scanner = db.begin(TransactionOptions::default());
    let rows = scanner.scan(0, b"a", b"z").unwrap();
    assert_eq!(rows, vec![(b"w".to_vec(), b"1".to_vec())]);
    assert!(scanner.dependencies().contains(&writer.id()));

    // A later write overlapping the scan picks up the scanner.
    let mut late = db.begin(TransactionOptions::default());
    late.put(0, b"z", b"2", AccessMode::Optimistic).unwrap();
    assert!(late.dependencies().contains(&scanner.id()));
}

#[test]
fn test_concurrent_scans_and_writes() {
    // Scans take the buffer exclusively; point writes take it shared.
    // Everything completes and the captured scan dependencies only ever
    // point at registered scanners.
    let db = engine();
    let mut setup = db.begin(TransactionOptions::default());
    setup.put(0, b"base", b"b", AccessMode::Pessimistic).unwrap();
    setup.commit().unwrap();

    // Live scanners stay registered until dropped at the end.
    let mut scanners = Vec::new();
    for _ in 0..3 {
        let mut txn = db.begin(TransactionOptions::default());
        txn.scan(0, b"a", b"z").unwrap();
        scanners.push(txn);
    }
    let scanner_ids: Arc<Vec<u64>> = Arc::new(scanners.iter().map(|txn| txn.id()).collect());

    let mut handles = Vec::new();
    for worker in 0..4u64 {
        let db = Arc::clone(&db);
        let scanner_ids = Arc::clone(&scanner_ids);
        handles.push(thread::spawn(move || {
            for i in 0..50u64 {
                let mut txn = db.begin(TransactionOptions::default());
                let key = format!("w{worker}-{i}");
                txn.put(0, key.as_bytes(), b"v", AccessMode::Optimistic)
                    .unwrap();
                for dep in txn.dependencies() {
                    assert!(
                        scanner_ids.contains(dep),
                        "unexpected dependency {dep} for worker {worker}"
                    );
                }
                txn.rollback().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    drop(scanners);
    for id in scanner_ids.iter() {
        assert!(!db.dirty_buffer(0).contains_txn(*id));
    }
}

#[test]
fn test_randomized_buffer_churn() {
    // Random interleavings of puts, dirty reads, and removals over a
    // small key space; the buffer must end empty once every transaction
    // has swept its keys.
    let buffer = Arc::new(DirtyBuffer::new(0, 32));
    let mut handles = Vec::new();

    for txn_id in 1..=8u64 {
        let buffer = Arc::clone(&buffer);
        handles.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let mut touched = Vec::new();
            for _ in 0..300 {
                let key = format!("k{}", rng.gen_range(0..16));
                match rng.gen_range(0..3) {
                    0 => {
                        let mut ctx = DirtyWriteContext::default();
                        buffer
                            .put(key.as_bytes(), b"v", 1, txn_id, &mut ctx)
                            .unwrap();
                        touched.push(key);
                    }
                    1 => {
                        let mut ctx = DirtyWriteContext::default();
                        buffer.delete(key.as_bytes(), 1, txn_id, &mut ctx).unwrap();
                        touched.push(key);
                    }
                    _ => {
                        buffer.get(key.as_bytes(), txn_id);
                        touched.push(key);
                    }
                }
            }
            for key in touched {
                buffer.remove(key.as_bytes(), txn_id);
            }
            txn_id
        }));
    }

    for handle in handles {
        let txn_id = handle.join().unwrap();
        assert!(!buffer.contains_txn(txn_id));
    }
}
