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

//! Storage seam
//!
//! The concurrency core does not own the data path. Everything below the
//! tracked-key layer — the memtable/LSM write path, WAL, snapshots — is
//! reached through the [`Storage`] trait. [`MemStorage`] in this crate is
//! the reference implementation used by tests.
//!
//! [`MemStorage`]: crate::storage::MemStorage

use std::cmp::Ordering;

use crate::core::{CfId, Result, SequenceNumber};
use crate::storage::write_batch::WriteBatch;

/// Total order on byte-string keys.
pub trait Comparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// `lower <= key < upper` under this comparator.
    fn in_range(&self, key: &[u8], lower: &[u8], upper: &[u8]) -> bool {
        self.compare(key, lower) != Ordering::Less && self.compare(key, upper) == Ordering::Less
    }
}

/// Default lexicographic byte order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    #[inline]
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// In-storage predecessor of a key, used to close the phantom window for
/// range scans around inserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearbyInfo {
    /// The predecessor key; empty when `is_head` is set.
    pub key: Vec<u8>,
    /// The predecessor's structural sequence number.
    pub seq: SequenceNumber,
    /// True when the inserted key would become the minimal key of the
    /// column family, in which case the list head stands in for the
    /// predecessor.
    pub is_head: bool,
}

/// A committed row surfaced by [`Storage::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRow {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub seq: SequenceNumber,
}

/// Pre-publish hook invoked inside [`Storage::write`], after the base
/// sequence is reserved and before the batch becomes visible.
///
/// Returning an error rejects the whole batch; the storage layer must leave
/// no trace of it. The commit path uses this hook for OCC validation.
pub trait CommitCallback {
    fn before_publish(&mut self, base_seq: SequenceNumber) -> Result<()>;
}

/// No-op callback for write paths that need no validation.
pub struct NoopCommitCallback;

impl CommitCallback for NoopCommitCallback {
    fn before_publish(&mut self, _base_seq: SequenceNumber) -> Result<()> {
        Ok(())
    }
}

/// The storage layer consumed by the concurrency core.
///
/// Implementations must make `write` atomic: the callback runs with the
/// batch's base sequence reserved, and either every operation becomes
/// visible with consecutive sequences starting at that base, or none does.
pub trait Storage: Send + Sync {
    /// Atomically applies `batch`, assigning consecutive sequence numbers
    /// starting at the returned base. `callback.before_publish(base)` runs
    /// before anything becomes visible; its error rejects the batch.
    fn write(&self, batch: &WriteBatch, callback: &mut dyn CommitCallback)
        -> Result<SequenceNumber>;

    /// Reads the latest committed value and its sequence. `None` for
    /// missing or deleted keys.
    fn get(&self, cf: CfId, key: &[u8]) -> Result<Option<(Vec<u8>, SequenceNumber)>>;

    /// Committed rows with keys in `[lower, upper)`, ascending.
    fn scan(&self, cf: CfId, lower: &[u8], upper: &[u8]) -> Result<Vec<ScannedRow>>;

    /// The most recently published sequence number.
    fn latest_sequence_number(&self) -> SequenceNumber;

    /// Allocates a read snapshot (the current published sequence).
    fn snapshot(&self) -> SequenceNumber;

    /// The in-storage predecessor of `key` in `cf`, or the head-node record
    /// when `key` would be minimal. `None` when the column family is
    /// unknown to storage.
    fn nearby_info(&self, cf: CfId, key: &[u8]) -> Result<Option<NearbyInfo>>;

    /// Bumps the structural sequence of a predecessor node (or of the list
    /// head) to the current published sequence. Called by committing
    /// inserts so later scans observe the structural change.
    fn update_nearby_seq(&self, cf: CfId, key: &[u8], is_head: bool) -> Result<()>;
}
