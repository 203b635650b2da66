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

//! Per-column-family dirty version buffer
//!
//! Uncommitted writes and read markers live here between the writing
//! transaction's operation and its termination. Other transactions read
//! dirty values out of the buffer, and every access records the dependency
//! edges the commit protocol later waits on:
//!
//! - a writer finding an earlier other-writer for the key records a
//!   write-write dependency,
//! - a writer finding read markers newer than that writer records
//!   anti-dependencies on the readers,
//! - a writer overlapping an in-progress scan records a dependency on the
//!   scanning transaction.
//!
//! # Concurrency
//!
//! Point operations hold the buffer-wide latch shared plus one bucket
//! mutex, so different buckets proceed in parallel and same-bucket
//! operations serialize. Scans hold the latch exclusively, which makes a
//! scan atomic with respect to every point operation (§ scan
//! linearizability). Bucket chains are container-owned, newest first;
//! records of different keys interleave within a bucket.

use std::collections::VecDeque;

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::common::hash_bytes;
use crate::core::{CfId, Result, SequenceNumber, TxnId};
use crate::storage::traits::Comparator;

/// Payload of a dirty record.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DirtyKind {
    /// Uncommitted put or delete; `value == None` marks a deletion.
    Write {
        value: Option<Vec<u8>>,
        seq: SequenceNumber,
    },
    /// A transaction observed a dirty value for this key.
    ReadMarker,
}

/// One node in a bucket chain.
#[derive(Debug)]
struct DirtyRecord {
    key: Vec<u8>,
    txn_id: TxnId,
    kind: DirtyKind,
}

/// Dependencies captured by a dirty put or delete.
#[derive(Debug, Default)]
pub struct DirtyWriteContext {
    /// Most recent other-writer of the key; 0 = none.
    pub write_txn_id: TxnId,
    /// Readers that observed the key after that writer, plus transactions
    /// whose scans were in progress before ours. Oldest first, may repeat.
    pub read_txn_ids: SmallVec<[TxnId; 4]>,
}

/// A dirty value found by [`DirtyBuffer::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyHit {
    /// `None` when the dirty record is a deletion.
    pub value: Option<Vec<u8>>,
    pub seq: SequenceNumber,
    /// The transaction whose uncommitted write was observed.
    pub txn_id: TxnId,
}

/// Receiver for dirty values during a scan.
pub trait DirtyScanCallback {
    fn invoke(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
    fn invoke_deletion(&mut self, key: &[u8]) -> Result<()>;
}

/// Buffer of uncommitted versions for one column family.
pub struct DirtyBuffer {
    cf_id: CfId,
    buckets: Vec<Mutex<VecDeque<DirtyRecord>>>,
    /// Shared for point operations, exclusive for scans.
    latch: RwLock<()>,
    /// Transactions with a scan in progress, oldest first.
    scan_list: Mutex<Vec<TxnId>>,
}

impl DirtyBuffer {
    /// Creates a buffer with `size` hash buckets.
    pub fn new(cf_id: CfId, size: usize) -> Self {
        assert!(size > 0, "dirty buffer needs at least one bucket");
        Self {
            cf_id,
            buckets: (0..size).map(|_| Mutex::new(VecDeque::new())).collect(),
            latch: RwLock::new(()),
            scan_list: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub fn cf_id(&self) -> CfId {
        self.cf_id
    }

    #[inline]
    fn bucket(&self, key: &[u8]) -> &Mutex<VecDeque<DirtyRecord>> {
        let idx = (hash_bytes(key) % self.buckets.len() as u64) as usize;
        &self.buckets[idx]
    }

    /// Records an uncommitted put and captures its dependencies.
    pub fn put(
        &self,
        key: &[u8],
        value: &[u8],
        seq: SequenceNumber,
        txn_id: TxnId,
        ctx: &mut DirtyWriteContext,
    ) -> Result<()> {
        self.write_record(key, Some(value.to_vec()), seq, txn_id, ctx)
    }

    /// Records an uncommitted deletion and captures its dependencies.
    pub fn delete(
        &self,
        key: &[u8],
        seq: SequenceNumber,
        txn_id: TxnId,
        ctx: &mut DirtyWriteContext,
    ) -> Result<()> {
        self.write_record(key, None, seq, txn_id, ctx)
    }

    fn write_record(
        &self,
        key: &[u8],
        value: Option<Vec<u8>>,
        seq: SequenceNumber,
        txn_id: TxnId,
        ctx: &mut DirtyWriteContext,
    ) -> Result<()> {
        let _shared = self.latch.read();
        let mut bucket = self.bucket(key).lock();

        // Scans ordered before this write: every scanning transaction that
        // registered ahead of ours (or all of them if ours never scanned).
        {
            let scans = self.scan_list.lock();
            for &scanner in scans.iter() {
                if scanner == txn_id {
                    break;
                }
                ctx.read_txn_ids.push(scanner);
            }
        }

        // Walk newest-first: read markers ahead of the most recent
        // other-writer are anti-dependencies, the writer itself is the W-W
        // dependency.
        for record in bucket.iter() {
            if record.key != key || record.txn_id == txn_id {
                continue;
            }
            match record.kind {
                DirtyKind::Write { .. } => {
                    ctx.write_txn_id = record.txn_id;
                    break;
                }
                DirtyKind::ReadMarker => ctx.read_txn_ids.push(record.txn_id),
            }
        }

        bucket.push_front(DirtyRecord {
            key: key.to_vec(),
            txn_id,
            kind: DirtyKind::Write { value, seq },
        });
        Ok(())
    }

    /// Reads the newest dirty version of `key`, leaving a read marker for
    /// `self_txn_id`. Returns `None` when no dirty version exists.
    pub fn get(&self, key: &[u8], self_txn_id: TxnId) -> Option<DirtyHit> {
        let _shared = self.latch.read();
        let mut bucket = self.bucket(key).lock();

        bucket.push_front(DirtyRecord {
            key: key.to_vec(),
            txn_id: self_txn_id,
            kind: DirtyKind::ReadMarker,
        });

        bucket.iter().find_map(|record| {
            if record.key != key {
                return None;
            }
            match &record.kind {
                DirtyKind::Write { value, seq } => Some(DirtyHit {
                    value: value.clone(),
                    seq: *seq,
                    txn_id: record.txn_id,
                }),
                DirtyKind::ReadMarker => None,
            }
        })
    }

    /// Scans every dirty write record with a key in `[lower, upper)`.
    ///
    /// Registers `self_txn_id` in the scan list (newest last) so later
    /// writers capture a dependency on this scan. Returns the distinct
    /// other-writers whose records were visited; the first record seen for
    /// a key is its newest version.
    pub fn scan(
        &self,
        lower: &[u8],
        upper: &[u8],
        comparator: &dyn Comparator,
        self_txn_id: TxnId,
        callback: &mut dyn DirtyScanCallback,
    ) -> Result<SmallVec<[TxnId; 4]>> {
        let _exclusive = self.latch.write();

        {
            let mut scans = self.scan_list.lock();
            if !scans.contains(&self_txn_id) {
                scans.push(self_txn_id);
            }
        }

        let mut writer_ids: SmallVec<[TxnId; 4]> = SmallVec::new();
        for bucket in &self.buckets {
            let bucket = bucket.lock();
            for record in bucket.iter() {
                let DirtyKind::Write { value, .. } = &record.kind else {
                    continue;
                };
                if !comparator.in_range(&record.key, lower, upper) {
                    continue;
                }
                match value {
                    Some(value) => callback.invoke(&record.key, value)?,
                    None => callback.invoke_deletion(&record.key)?,
                }
                if record.txn_id != self_txn_id && !writer_ids.contains(&record.txn_id) {
                    writer_ids.push(record.txn_id);
                }
            }
        }
        Ok(writer_ids)
    }

    /// Removes every record (writes and read markers) of `txn_id` for
    /// `key`. Called for each tracked key when the transaction terminates.
    pub fn remove(&self, key: &[u8], txn_id: TxnId) {
        let _shared = self.latch.read();
        let mut bucket = self.bucket(key).lock();
        bucket.retain(|record| !(record.key == key && record.txn_id == txn_id));
    }

    /// Deregisters a terminated transaction's scan.
    pub fn remove_scan_info(&self, txn_id: TxnId) {
        let mut scans = self.scan_list.lock();
        scans.retain(|&id| id != txn_id);
    }

    /// True when any record of `txn_id` remains. Test/debug helper.
    pub fn contains_txn(&self, txn_id: TxnId) -> bool {
        let _shared = self.latch.read();
        self.buckets
            .iter()
            .any(|bucket| bucket.lock().iter().any(|r| r.txn_id == txn_id))
            || self.scan_list.lock().contains(&txn_id)
    }
}
