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

//! In-memory reference storage
//!
//! Single-writer ordered maps per column family. Deletions are kept as
//! tombstones so the row's sequence history survives, mirroring how an LSM
//! keeps deletion markers around. Not meant for production durability —
//! the point is a faithful [`Storage`] seam for tests and examples.

use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::core::{CfId, Result, SequenceNumber};
use crate::storage::traits::{CommitCallback, NearbyInfo, ScannedRow, Storage};
use crate::storage::write_batch::{BatchOp, WriteBatch};

#[derive(Debug, Clone)]
struct StoredRow {
    /// `None` marks a tombstone.
    value: Option<Vec<u8>>,
    seq: SequenceNumber,
}

#[derive(Debug, Default)]
struct CfData {
    rows: std::collections::BTreeMap<Vec<u8>, StoredRow>,
    /// Structural sequence of the list head; bumped when a minimal-key
    /// insert commits.
    head_seq: SequenceNumber,
}

/// In-memory [`Storage`] implementation.
#[derive(Debug, Default)]
pub struct MemStorage {
    cfs: RwLock<FxHashMap<CfId, CfData>>,
    last_seq: AtomicU64,
    /// Serializes writers so the commit callback and publication are atomic
    /// with respect to each other.
    write_lock: Mutex<()>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    fn write(
        &self,
        batch: &WriteBatch,
        callback: &mut dyn CommitCallback,
    ) -> Result<SequenceNumber> {
        let _writer = self.write_lock.lock();

        let base = self.last_seq.load(Ordering::Acquire) + 1;
        callback.before_publish(base)?;

        let mut cfs = self.cfs.write();
        for (offset, op) in batch.ops().iter().enumerate() {
            let seq = base + offset as u64;
            let cf_data = cfs.entry(op.cf()).or_default();
            match op {
                BatchOp::Put { key, value, .. } => {
                    cf_data.rows.insert(
                        key.clone(),
                        StoredRow {
                            value: Some(value.clone()),
                            seq,
                        },
                    );
                }
                BatchOp::Delete { key, .. } => {
                    cf_data.rows.insert(key.clone(), StoredRow { value: None, seq });
                }
            }
        }
        drop(cfs);

        self.last_seq
            .store(base - 1 + batch.count() as u64, Ordering::Release);
        Ok(base)
    }

    fn get(&self, cf: CfId, key: &[u8]) -> Result<Option<(Vec<u8>, SequenceNumber)>> {
        let cfs = self.cfs.read();
        Ok(cfs
            .get(&cf)
            .and_then(|data| data.rows.get(key))
            .and_then(|row| row.value.as_ref().map(|v| (v.clone(), row.seq))))
    }

    fn scan(&self, cf: CfId, lower: &[u8], upper: &[u8]) -> Result<Vec<ScannedRow>> {
        if lower >= upper {
            return Ok(Vec::new());
        }
        let cfs = self.cfs.read();
        let Some(data) = cfs.get(&cf) else {
            return Ok(Vec::new());
        };
        Ok(data
            .rows
            .range::<[u8], _>((Bound::Included(lower), Bound::Excluded(upper)))
            .filter_map(|(key, row)| {
                row.value.as_ref().map(|value| ScannedRow {
                    key: key.clone(),
                    value: value.clone(),
                    seq: row.seq,
                })
            })
            .collect())
    }

    fn latest_sequence_number(&self) -> SequenceNumber {
        self.last_seq.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> SequenceNumber {
        self.latest_sequence_number()
    }

    fn nearby_info(&self, cf: CfId, key: &[u8]) -> Result<Option<NearbyInfo>> {
        let cfs = self.cfs.read();
        let Some(data) = cfs.get(&cf) else {
            // Unknown column family behaves as empty: the head stands in.
            return Ok(Some(NearbyInfo {
                key: Vec::new(),
                seq: 0,
                is_head: true,
            }));
        };
        // Tombstones still count as structural nodes.
        match data
            .rows
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
        {
            Some((nearby, row)) => Ok(Some(NearbyInfo {
                key: nearby.clone(),
                seq: row.seq,
                is_head: false,
            })),
            None => Ok(Some(NearbyInfo {
                key: Vec::new(),
                seq: data.head_seq,
                is_head: true,
            })),
        }
    }

    fn update_nearby_seq(&self, cf: CfId, key: &[u8], is_head: bool) -> Result<()> {
        let seq = self.latest_sequence_number();
        let mut cfs = self.cfs.write();
        let data = cfs.entry(cf).or_default();
        if is_head {
            data.head_seq = seq;
        } else if let Some(row) = data.rows.get_mut(key) {
            row.seq = seq;
        }
        Ok(())
    }
}
