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

//! Transaction façade: tracked keys, access routing, and lifecycle
//!
//! Every read and write flows through here. Pessimistic accesses go to the
//! lock manager, optimistic accesses to the dirty buffer; both record the
//! key in the transaction's tracked-key map and accumulate dependency ids.
//!
//! # Commit protocol (write-committed, mixed OCC + 2PL)
//!
//! 1. Wait for every captured dependency to terminate.
//! 2. Upgrade optimistic writes to exclusive pessimistic locks.
//! 3. Write through storage; the pre-publish callback validates optimistic
//!    reads and rejects the batch on conflict.
//! 4. Publish per-key committed sequences to the validation map.
//! 5. Release locks, then dirty entries, then clear local state, then flip
//!    the registry state — dependents that observe COMMITTED are guaranteed
//!    to see the commit sequence and the released locks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::common::clock::now_micros;
use crate::common::ByteMap;
use crate::core::{
    CfId, Error, Result, SequenceNumber, SimpleState, TxnId, TxnState, AtomicTxnState,
    KEY_STATE_OCC_READ, KEY_STATE_OCC_WRITE, KEY_STATE_PESSIMISTIC, MAX_SEQUENCE_NUMBER,
};
use crate::storage::{BatchGet, CommitCallback, TransactionOptions, WriteBatch};
use crate::txn::conflict::{check_transaction_state, WAIT_FOR_TERMINATION};
use crate::txn::dirty_buffer::{DirtyScanCallback, DirtyWriteContext};
use crate::txn::engine::TransactionDb;
use crate::txn::registry::TxnMetadata;

/// Concurrency discipline for one access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Optimistic,
    Pessimistic,
}

/// State-map class bits recorded per tracked key so counters can be
/// decremented symmetrically at release.
const COUNTED_OCC_READ: u8 = 1;
const COUNTED_OCC_WRITE: u8 = 2;
const COUNTED_PESSIMISTIC_READ: u8 = 4;
const COUNTED_PESSIMISTIC_WRITE: u8 = 8;

/// Per-key tracking info accumulated over a transaction's accesses.
#[derive(Debug, Clone)]
pub struct TrackedKeyInfo {
    /// Earliest sequence at which the key is known unmodified.
    pub seq: SequenceNumber,
    pub num_reads: u32,
    pub num_writes: u32,
    pub exclusive: bool,
    /// Bitset over {OCC_READ, OCC_WRITE, PESSIMISTIC}.
    pub key_state: u8,
    pub is_dirty_read: bool,
    pub is_nearby_key: bool,
    pub is_head_node: bool,
    /// Writer whose dirty version this read observed; 0 when unknown or
    /// when two different writers were observed (validation must fail).
    pub dependent_txn: TxnId,
    counted: u8,
}

impl TrackedKeyInfo {
    fn new(seq: SequenceNumber) -> Self {
        Self {
            seq,
            num_reads: 0,
            num_writes: 0,
            exclusive: false,
            key_state: 0,
            is_dirty_read: false,
            is_nearby_key: false,
            is_head_node: false,
            dependent_txn: 0,
            counted: 0,
        }
    }
}

type CfTrackedKeys = ByteMap<TrackedKeyInfo>;
type TrackedKeys = FxHashMap<CfId, CfTrackedKeys>;

/// Read/write deltas tracked since a savepoint.
#[derive(Debug, Default, Clone, Copy)]
struct KeyDelta {
    num_reads: u32,
    num_writes: u32,
}

#[derive(Debug, Default)]
struct SavePoint {
    snapshot: Option<SequenceNumber>,
    num_puts: u64,
    num_deletes: u64,
    new_keys: FxHashMap<CfId, ByteMap<KeyDelta>>,
}

/// A transaction against a [`TransactionDb`].
pub struct Transaction {
    db: Arc<TransactionDb>,
    id: TxnId,
    state: Arc<AtomicTxnState>,
    metadata: Arc<TxnMetadata>,
    name: Option<String>,
    start_time: u64,
    /// Microseconds since epoch; 0 = never expires.
    expiration_time: u64,
    lock_timeout: Duration,
    snapshot: Option<SequenceNumber>,
    write_batch: WriteBatch,
    tracked_keys: TrackedKeys,
    depend_txn_ids: SmallVec<[TxnId; 8]>,
    /// Dependencies whose dirty data this transaction consumed; their
    /// abort cascades, unlike ordering-only (write-write, anti, scan)
    /// dependencies.
    data_dep_ids: SmallVec<[TxnId; 4]>,
    scan_cf_ids: SmallVec<[CfId; 4]>,
    save_points: Vec<SavePoint>,
    num_puts: u64,
    num_deletes: u64,
    track_state: bool,
    deadlock_detect: bool,
    deadlock_detect_depth: u32,
    use_only_the_last_commit_time_batch_for_recovery: bool,
}

impl Transaction {
    pub(crate) fn new(db: Arc<TransactionDb>, options: TransactionOptions) -> Self {
        let id = db.registry().next_id();
        let metadata = db.registry().register(id);
        let state = Arc::new(AtomicTxnState::new(TxnState::Started));
        let start_time = now_micros();

        let expiration_time = if options.expiration_ms > 0 {
            start_time + options.expiration_ms as u64 * 1000
        } else {
            0
        };
        if expiration_time > 0 {
            db.expirable()
                .insert(id, Arc::clone(&state), expiration_time);
        }

        let lock_timeout_ms = if options.lock_timeout_ms < 0 {
            db.config().txn_lock_timeout_ms
        } else {
            options.lock_timeout_ms
        };
        let lock_timeout = Duration::from_millis(lock_timeout_ms.max(0) as u64);

        let snapshot = options.set_snapshot.then(|| db.storage().snapshot());

        Self {
            id,
            state,
            metadata,
            name: None,
            start_time,
            expiration_time,
            lock_timeout,
            snapshot,
            write_batch: WriteBatch::with_max_bytes(options.max_write_batch_size),
            tracked_keys: TrackedKeys::default(),
            depend_txn_ids: SmallVec::new(),
            data_dep_ids: SmallVec::new(),
            scan_cf_ids: SmallVec::new(),
            save_points: Vec::new(),
            num_puts: 0,
            num_deletes: 0,
            track_state: options.track_state,
            deadlock_detect: options.deadlock_detect,
            deadlock_detect_depth: options.deadlock_detect_depth,
            use_only_the_last_commit_time_batch_for_recovery: options
                .use_only_the_last_commit_time_batch_for_recovery,
            db,
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    #[inline]
    pub fn id(&self) -> TxnId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> TxnState {
        self.state.load()
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Commit sequence, meaningful once committed.
    #[inline]
    pub fn commit_seq(&self) -> SequenceNumber {
        self.metadata.commit_seq()
    }

    /// Snapshot sequence pinned at begin, if requested.
    #[inline]
    pub fn snapshot(&self) -> Option<SequenceNumber> {
        self.snapshot
    }

    /// Dependency ids accumulated so far (unsorted).
    pub fn dependencies(&self) -> &[TxnId] {
        &self.depend_txn_ids
    }

    pub fn num_puts(&self) -> u64 {
        self.num_puts
    }

    pub fn num_deletes(&self) -> u64 {
        self.num_deletes
    }

    /// Number of distinct tracked keys across all column families.
    pub fn num_keys(&self) -> u64 {
        self.tracked_keys.values().map(|keys| keys.len() as u64).sum()
    }

    pub fn elapsed_micros(&self) -> u64 {
        now_micros() - self.start_time
    }

    /// Advisory deadlock-detection request carried from the options. The
    /// mixed commit protocol orders waits and upgrades so no cycle forms,
    /// so no detector runs.
    pub fn deadlock_detect(&self) -> bool {
        self.deadlock_detect
    }

    pub fn deadlock_detect_depth(&self) -> u32 {
        self.deadlock_detect_depth
    }

    /// Recovery hint carried through for the storage layer.
    pub fn use_only_the_last_commit_time_batch_for_recovery(&self) -> bool {
        self.use_only_the_last_commit_time_batch_for_recovery
    }

    /// True once the expiration deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.expiration_time > 0 && now_micros() >= self.expiration_time
    }

    fn check_active(&self) -> Result<()> {
        match self.state.load() {
            TxnState::Started => Ok(()),
            TxnState::LocksStolen => Err(Error::Expired),
            _ => Err(Error::invalid_argument("transaction is not active")),
        }
    }

    // ------------------------------------------------------------------
    // Naming and snapshots
    // ------------------------------------------------------------------

    /// Names the transaction. Only valid while STARTED; names are unique
    /// and between 1 and 512 bytes.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        if self.state.load() != TxnState::Started {
            return Err(Error::invalid_argument(
                "transaction is beyond state for naming",
            ));
        }
        if self.name.is_some() {
            return Err(Error::invalid_argument("transaction has already been named"));
        }
        if name.is_empty() || name.len() > 512 {
            return Err(Error::invalid_argument(
                "transaction name length must be between 1 and 512 chars",
            ));
        }
        self.db.register_name(name, self.id)?;
        self.name = Some(name.to_string());
        Ok(())
    }

    /// Pins the read snapshot to the current published sequence.
    pub fn set_snapshot(&mut self) {
        self.snapshot = Some(self.db.storage().snapshot());
    }

    // ------------------------------------------------------------------
    // Piece bookkeeping
    // ------------------------------------------------------------------

    /// Publishes the workload type for conflict-table lookups by
    /// dependents.
    pub fn set_txn_type(&self, txn_type: u32) {
        self.metadata.set_txn_type(txn_type);
    }

    /// Publishes the current piece index; dependents blocked on an earlier
    /// piece unblock once this advances far enough.
    pub fn set_piece_idx(&self, piece_idx: u32) {
        self.metadata.set_current_piece_idx(piece_idx);
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Point read.
    ///
    /// With `AccessMode::Optimistic` and `dirty_read`, the read first
    /// probes the local batch, then the dirty buffer; observing another
    /// transaction's dirty version records a dependency on that writer and
    /// tracks the key for commit-time validation. Otherwise the key is
    /// tracked (optimistic) or locked shared (pessimistic) and the read is
    /// served from the local batch or storage.
    pub fn get(
        &mut self,
        cf: CfId,
        key: &[u8],
        mode: AccessMode,
        dirty_read: bool,
    ) -> Result<Option<Vec<u8>>> {
        self.check_active()?;

        if mode == AccessMode::Optimistic && dirty_read {
            match self.write_batch.get(cf, key) {
                BatchGet::Value(value) => return Ok(Some(value.to_vec())),
                BatchGet::Deleted => return Ok(None),
                BatchGet::Missing => {}
            }

            if let Some(hit) = self.db.dirty_buffer(cf).get(key, self.id) {
                self.add_dependency(hit.txn_id, true);
                self.optimistic_lock(cf, key, true, false, hit.txn_id);
                trace!(txn_id = self.id, writer = hit.txn_id, "dirty read");
                return Ok(hit.value);
            }
        }

        match mode {
            AccessMode::Optimistic => self.optimistic_lock(cf, key, true, false, 0),
            AccessMode::Pessimistic => {
                self.pessimistic_lock(cf, key, true, false, true)?;
            }
        }

        self.read_batch_then_storage(cf, key)
    }

    /// Locked read: takes an exclusive pessimistic lock (fail-fast), then
    /// reads through the local batch and storage.
    pub fn get_for_update(&mut self, cf: CfId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_active()?;
        self.pessimistic_lock(cf, key, true, true, true)?;
        self.read_batch_then_storage(cf, key)
    }

    /// Convenience loop over [`get`].
    ///
    /// [`get`]: Transaction::get
    pub fn multi_get(
        &mut self,
        cf: CfId,
        keys: &[&[u8]],
        mode: AccessMode,
        dirty_read: bool,
    ) -> Vec<Result<Option<Vec<u8>>>> {
        keys.iter()
            .map(|key| self.get(cf, key, mode, dirty_read))
            .collect()
    }

    fn read_batch_then_storage(&self, cf: CfId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.write_batch.get(cf, key) {
            BatchGet::Value(value) => Ok(Some(value.to_vec())),
            BatchGet::Deleted => Ok(None),
            BatchGet::Missing => Ok(self.db.storage().get(cf, key)?.map(|(value, _)| value)),
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Buffered put. Optimistic puts publish a dirty version and merge the
    /// captured write-write and anti-dependencies.
    pub fn put(&mut self, cf: CfId, key: &[u8], value: &[u8], mode: AccessMode) -> Result<()> {
        self.check_active()?;
        self.write_locked(cf, key, Some(value), mode)
    }

    /// Buffered deletion; same tracking as [`put`].
    ///
    /// [`put`]: Transaction::put
    pub fn delete(&mut self, cf: CfId, key: &[u8], mode: AccessMode) -> Result<()> {
        self.check_active()?;
        self.write_locked(cf, key, None, mode)
    }

    /// Insert: a put that additionally tracks the in-storage predecessor
    /// of `key` as an optimistic read, closing the phantom window for
    /// range scans.
    pub fn insert(&mut self, cf: CfId, key: &[u8], value: &[u8], mode: AccessMode) -> Result<()> {
        self.check_active()?;
        self.write_locked(cf, key, Some(value), mode)?;

        if let Some(nearby) = self.db.storage().nearby_info(cf, key)? {
            let is_head = nearby.is_head;
            let nearby_key = nearby.key;
            self.track_key(cf, &nearby_key, nearby.seq, true, false, true, true, is_head, 0);
        }
        Ok(())
    }

    fn write_locked(
        &mut self,
        cf: CfId,
        key: &[u8],
        value: Option<&[u8]>,
        mode: AccessMode,
    ) -> Result<()> {
        match mode {
            AccessMode::Optimistic => self.optimistic_lock(cf, key, false, true, 0),
            AccessMode::Pessimistic => {
                self.pessimistic_lock(cf, key, false, true, true)?;
            }
        }

        match value {
            Some(value) => {
                self.write_batch.put(cf, key, value)?;
                self.num_puts += 1;
            }
            None => {
                self.write_batch.delete(cf, key)?;
                self.num_deletes += 1;
            }
        }

        if mode == AccessMode::Optimistic {
            let seq = self.current_read_seq();
            let mut ctx = DirtyWriteContext::default();
            let buffer = self.db.dirty_buffer(cf);
            match value {
                Some(value) => buffer.put(key, value, seq, self.id, &mut ctx)?,
                None => buffer.delete(key, seq, self.id, &mut ctx)?,
            }
            self.merge_write_dependencies(ctx);
        }
        Ok(())
    }

    /// Batch-only put: no tracking, no conflict detection.
    pub fn put_untracked(&mut self, cf: CfId, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_active()?;
        self.write_batch.put(cf, key, value)?;
        self.num_puts += 1;
        Ok(())
    }

    /// Batch-only deletion: no tracking, no conflict detection.
    pub fn delete_untracked(&mut self, cf: CfId, key: &[u8]) -> Result<()> {
        self.check_active()?;
        self.write_batch.delete(cf, key)?;
        self.num_deletes += 1;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scans
    // ------------------------------------------------------------------

    /// Range scan over `[lower, upper)`: committed rows overlaid with
    /// dirty versions and the transaction's own batch.
    ///
    /// Every committed key observed is tracked as an optimistic read at
    /// its storage sequence. The scan registers in the dirty buffer's scan
    /// list, so writers that land later capture a dependency on this
    /// transaction; writers whose dirty versions the scan observed become
    /// dependencies of this transaction.
    pub fn scan(&mut self, cf: CfId, lower: &[u8], upper: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_active()?;

        let rows = self.db.storage().scan(cf, lower, upper)?;
        for row in &rows {
            self.track_scan_key(cf, &row.key, row.seq);
        }

        // An insert below the scanned range's first key bumps the head
        // node; track it so such an insert fails this scan's validation.
        if let Some(nearby) = self.db.storage().nearby_info(cf, lower)? {
            if nearby.is_head {
                self.track_key(cf, &nearby.key, nearby.seq, true, false, true, false, true, 0);
            }
        }

        if !self.scan_cf_ids.contains(&cf) {
            self.scan_cf_ids.push(cf);
        }

        let mut overlay = ScanOverlay::default();
        let writer_ids = self.db.dirty_buffer(cf).scan(
            lower,
            upper,
            self.db.comparator(),
            self.id,
            &mut overlay,
        )?;
        for writer in writer_ids {
            // The scan consumed these writers' uncommitted values.
            self.add_dependency(writer, true);
        }

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            rows.into_iter().map(|row| (row.key, row.value)).collect();
        for (key, value) in overlay.entries {
            match value {
                Some(value) => {
                    merged.insert(key, value);
                }
                None => {
                    merged.remove(&key);
                }
            }
        }
        // The local batch wins over everything, latest op per key last.
        for op in self.write_batch.ops() {
            if op.cf() != cf || !self.db.comparator().in_range(op.key(), lower, upper) {
                continue;
            }
            match op {
                crate::storage::BatchOp::Put { key, value, .. } => {
                    merged.insert(key.clone(), value.clone());
                }
                crate::storage::BatchOp::Delete { key, .. } => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged.into_iter().collect())
    }

    /// Tracks a key observed by a storage-level scan as an optimistic read
    /// at the sequence the scan returned.
    pub fn track_scan_key(&mut self, cf: CfId, key: &[u8], seq: SequenceNumber) {
        self.track_key(cf, key, seq, true, false, true, false, false, 0);
    }

    // ------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------

    /// Acquires (or upgrades) a pessimistic lock and tracks the key.
    ///
    /// Skips the lock manager when this transaction already holds a
    /// covering lock. `fail_fast` turns contention into `Busy` instead of
    /// waiting out the lock timeout.
    pub fn pessimistic_lock(
        &mut self,
        cf: CfId,
        key: &[u8],
        read_only: bool,
        exclusive: bool,
        fail_fast: bool,
    ) -> Result<()> {
        let mut tracked_at_seq = MAX_SEQUENCE_NUMBER;
        let mut previously_locked = false;
        let mut lock_upgrade = false;

        if let Some(info) = self.tracked_keys.get(&cf).and_then(|keys| keys.get(key)) {
            previously_locked = info.key_state & KEY_STATE_PESSIMISTIC != 0;
            if previously_locked && !info.exclusive && exclusive {
                lock_upgrade = true;
            }
            tracked_at_seq = info.seq;
        }

        if !previously_locked || lock_upgrade {
            self.db.lock_manager().acquire(
                cf,
                key,
                self.id,
                exclusive,
                self.expiration_time,
                self.lock_timeout,
                fail_fast,
            )?;
            if !previously_locked {
                self.db
                    .access_list(cf)
                    .add(key, self.db.storage().latest_sequence_number(), self.id);
            }
        }

        if tracked_at_seq == MAX_SEQUENCE_NUMBER {
            // First contact with the key: it cannot have been modified
            // after this point while we hold the lock.
            tracked_at_seq = self.current_read_seq();
        }

        self.track_key(cf, key, tracked_at_seq, read_only, exclusive, false, false, false, 0);
        Ok(())
    }

    /// Tracks an optimistic access; conflict checking happens at commit.
    fn optimistic_lock(
        &mut self,
        cf: CfId,
        key: &[u8],
        read_only: bool,
        exclusive: bool,
        dependent_id: TxnId,
    ) {
        let seq = self.current_read_seq();
        self.track_key(cf, key, seq, read_only, exclusive, true, false, false, dependent_id);
    }

    #[inline]
    fn current_read_seq(&self) -> SequenceNumber {
        self.snapshot
            .unwrap_or_else(|| self.db.storage().latest_sequence_number())
    }

    fn add_dependency(&mut self, txn_id: TxnId, consumed_data: bool) {
        if txn_id == 0 || txn_id == self.id {
            return;
        }
        if !self.depend_txn_ids.contains(&txn_id) {
            self.depend_txn_ids.push(txn_id);
        }
        if consumed_data && !self.data_dep_ids.contains(&txn_id) {
            self.data_dep_ids.push(txn_id);
        }
    }

    fn merge_write_dependencies(&mut self, ctx: DirtyWriteContext) {
        self.add_dependency(ctx.write_txn_id, false);
        for reader in ctx.read_txn_ids {
            self.add_dependency(reader, false);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn track_key(
        &mut self,
        cf: CfId,
        key: &[u8],
        seq: SequenceNumber,
        read_only: bool,
        exclusive: bool,
        optimistic: bool,
        is_nearby_key: bool,
        is_head_node: bool,
        dependent_id: TxnId,
    ) {
        let cf_keys = self.tracked_keys.entry(cf).or_default();
        let info = cf_keys
            .entry(key.to_vec())
            .or_insert_with(|| TrackedKeyInfo::new(seq));

        // A smaller sequence is a stronger "unmodified since" guarantee.
        if seq < info.seq {
            info.seq = seq;
        }

        if read_only {
            info.num_reads += 1;
            info.key_state |= if optimistic {
                KEY_STATE_OCC_READ
            } else {
                KEY_STATE_PESSIMISTIC
            };
        } else {
            info.num_writes += 1;
            info.key_state |= if optimistic {
                KEY_STATE_OCC_WRITE
            } else {
                KEY_STATE_PESSIMISTIC
            };
        }
        info.exclusive |= exclusive;

        if optimistic && read_only {
            if dependent_id != 0 {
                info.is_dirty_read = true;
                if info.dependent_txn != 0 && info.dependent_txn != dependent_id {
                    // Dirty versions from two different writers were
                    // observed; validation has no single committed
                    // sequence to accept, so it must fail.
                    info.dependent_txn = 0;
                } else {
                    info.dependent_txn = dependent_id;
                }
            }
            if is_nearby_key {
                debug_assert_eq!(dependent_id, 0);
                info.is_nearby_key = true;
            }
            if is_head_node {
                info.is_head_node = true;
            }
        }

        if self.track_state {
            let class_bit = match (read_only, optimistic) {
                (true, true) => COUNTED_OCC_READ,
                (false, true) => COUNTED_OCC_WRITE,
                (true, false) => COUNTED_PESSIMISTIC_READ,
                (false, false) => COUNTED_PESSIMISTIC_WRITE,
            };
            if info.counted & class_bit == 0 {
                info.counted |= class_bit;
                let state = self.db.state_mgr().state(cf, key);
                if read_only {
                    state.increase_read(optimistic);
                } else {
                    state.increase_write(optimistic);
                }
            }
        }

        if let Some(save_point) = self.save_points.last_mut() {
            let delta = save_point
                .new_keys
                .entry(cf)
                .or_default()
                .entry(key.to_vec())
                .or_default();
            if read_only {
                delta.num_reads += 1;
            } else {
                delta.num_writes += 1;
            }
        }
    }

    /// Tracked-key info for tests and diagnostics.
    pub fn tracked_key(&self, cf: CfId, key: &[u8]) -> Option<&TrackedKeyInfo> {
        self.tracked_keys.get(&cf).and_then(|keys| keys.get(key))
    }

    // ------------------------------------------------------------------
    // Savepoints
    // ------------------------------------------------------------------

    /// Records a savepoint: batch length, counters, snapshot, and the keys
    /// tracked from here on.
    pub fn set_savepoint(&mut self) {
        self.write_batch.set_save_point();
        self.save_points.push(SavePoint {
            snapshot: self.snapshot,
            num_puts: self.num_puts,
            num_deletes: self.num_deletes,
            new_keys: FxHashMap::default(),
        });
    }

    /// Rolls back to the most recent savepoint: restores the batch and
    /// counters, decrements per-key read/write counts tracked since the
    /// savepoint, and fully releases keys whose counts drop to zero.
    pub fn rollback_to_savepoint(&mut self) -> Result<()> {
        if self.state.load() != TxnState::Started {
            return Err(Error::invalid_argument(
                "transaction is beyond state for savepoint rollback",
            ));
        }
        let save_point = self.save_points.pop().ok_or(Error::NotFound)?;

        self.write_batch.rollback_to_save_point()?;
        self.snapshot = save_point.snapshot;
        self.num_puts = save_point.num_puts;
        self.num_deletes = save_point.num_deletes;

        let mut released: Vec<(CfId, Vec<u8>, TrackedKeyInfo)> = Vec::new();
        for (cf, keys) in save_point.new_keys {
            for (key, delta) in keys {
                let Some(cf_keys) = self.tracked_keys.get_mut(&cf) else {
                    continue;
                };
                let Some(info) = cf_keys.get_mut(&key) else {
                    continue;
                };
                info.num_reads = info.num_reads.saturating_sub(delta.num_reads);
                info.num_writes = info.num_writes.saturating_sub(delta.num_writes);

                if info.num_reads == 0 && info.num_writes == 0 {
                    let info = cf_keys.remove(&key).expect("tracked key present");
                    released.push((cf, key, info));
                }
            }
        }
        for (cf, key, info) in released {
            self.release_key(cf, &key, &info);
        }
        Ok(())
    }

    /// Releases one key's lock, dirty records, and state counters.
    fn release_key(&self, cf: CfId, key: &[u8], info: &TrackedKeyInfo) {
        if info.key_state & KEY_STATE_PESSIMISTIC != 0 {
            self.db.lock_manager().unlock(cf, key, self.id);
            self.db.access_list(cf).remove(key, self.id);
        }
        if info.key_state & (KEY_STATE_OCC_READ | KEY_STATE_OCC_WRITE) != 0 {
            self.db.dirty_buffer(cf).remove(key, self.id);
        }
        if self.track_state {
            self.decrement_state_counts(cf, key, info);
        }
    }

    fn decrement_state_counts(&self, cf: CfId, key: &[u8], info: &TrackedKeyInfo) {
        if info.counted == 0 {
            return;
        }
        let state = self.db.state_mgr().state(cf, key);
        if info.counted & COUNTED_OCC_READ != 0 {
            state.decrease_read(true);
        }
        if info.counted & COUNTED_OCC_WRITE != 0 {
            state.decrease_write(true);
        }
        if info.counted & COUNTED_PESSIMISTIC_READ != 0 {
            state.decrease_read(false);
        }
        if info.counted & COUNTED_PESSIMISTIC_WRITE != 0 {
            state.decrease_write(false);
        }
    }

    // ------------------------------------------------------------------
    // Dependency waiting
    // ------------------------------------------------------------------

    /// Waits for every captured dependency to reach a terminal state.
    ///
    /// An aborted dependent cascades only when this transaction consumed
    /// its dirty data; ordering-only dependencies treat the abort as
    /// termination. The wait is capped at 15 seconds.
    pub fn wait_for_dependencies(&mut self) -> Result<()> {
        self.depend_txn_ids.sort_unstable();

        for &dep_id in self.depend_txn_ids.iter() {
            let Some(dep) = self.db.registry().get(dep_id) else {
                // Retired entries are only reclaimed after termination.
                continue;
            };
            let start = now_micros();
            loop {
                match check_transaction_state(&dep, now_micros() - start, WAIT_FOR_TERMINATION) {
                    Ok(()) => break,
                    Err(Error::Incomplete) => std::hint::spin_loop(),
                    Err(Error::Aborted) if !self.data_dep_ids.contains(&dep_id) => break,
                    Err(err) => {
                        debug!(txn_id = self.id, dep = dep_id, ?err, "dependency wait failed");
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    /// Piece-level wait: for each dependency, consults the conflict table
    /// at `(txn_type, piece_idx, dep_type)` and waits until the dependent
    /// has progressed far enough.
    ///
    /// Dependencies satisfied by full termination are dropped from the
    /// set; piece-released dependencies are kept, since a later piece may
    /// conflict again.
    pub fn wait_for_piece(&mut self, txn_type: u32, piece_idx: u32) -> Result<()> {
        self.depend_txn_ids.sort_unstable();

        let mut idx = 0;
        while idx < self.depend_txn_ids.len() {
            let dep_id = self.depend_txn_ids[idx];
            let Some(dep) = self.db.registry().get(dep_id) else {
                idx += 1;
                continue;
            };
            let conflict_piece =
                self.db
                    .conflict_table()
                    .conflict_piece(txn_type, piece_idx, dep.txn_type());

            let start = now_micros();
            loop {
                match check_transaction_state(&dep, now_micros() - start, conflict_piece) {
                    Ok(()) => {
                        if conflict_piece == WAIT_FOR_TERMINATION {
                            self.depend_txn_ids.remove(idx);
                        } else {
                            idx += 1;
                        }
                        break;
                    }
                    Err(Error::Incomplete) => std::hint::spin_loop(),
                    Err(Error::Aborted) if !self.data_dep_ids.contains(&dep_id) => {
                        // Ordering-only dependency: the abort terminated
                        // it for good, so it can never matter again.
                        self.depend_txn_ids.remove(idx);
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Prepare / commit / rollback
    // ------------------------------------------------------------------

    /// Two-phase prepare. Requires a name; clears the expiration deadline,
    /// after which locks can no longer be stolen.
    pub fn prepare(&mut self) -> Result<()> {
        if self.name.is_none() {
            return Err(Error::invalid_argument(
                "cannot prepare a transaction that has not been named",
            ));
        }
        if self.is_expired() {
            return Err(Error::Expired);
        }

        let can_prepare = if self.expiration_time > 0 {
            // Locks could be stolen out from under us; the CAS decides.
            self.state
                .compare_exchange(TxnState::Started, TxnState::AwaitingPrepare)
        } else if self.state.load() == TxnState::Started {
            self.state.store(TxnState::AwaitingPrepare);
            true
        } else {
            false
        };

        if can_prepare {
            self.expiration_time = 0;
            self.db.expirable().remove(self.id);
            self.state.store(TxnState::Prepared);
            return Ok(());
        }

        match self.state.load() {
            TxnState::LocksStolen => Err(Error::Expired),
            TxnState::Prepared => Err(Error::invalid_argument(
                "transaction has already been prepared",
            )),
            TxnState::Committed => Err(Error::invalid_argument(
                "transaction has already been committed",
            )),
            TxnState::RolledBack => Err(Error::invalid_argument(
                "transaction has already been rolled back",
            )),
            _ => Err(Error::invalid_argument("transaction is not in state for prepare")),
        }
    }

    /// Commits the transaction.
    ///
    /// On any failure the transaction ends ROLLED_BACK with all locks and
    /// dirty entries released, and the error is returned.
    pub fn commit(&mut self) -> Result<()> {
        if self.is_expired() {
            return Err(Error::Expired);
        }

        let can_commit = if self.expiration_time > 0 {
            self.state
                .compare_exchange(TxnState::Started, TxnState::AwaitingCommit)
        } else {
            match self.state.load() {
                TxnState::Started | TxnState::Prepared => {
                    self.state.store(TxnState::AwaitingCommit);
                    true
                }
                _ => false,
            }
        };

        if !can_commit {
            return match self.state.load() {
                TxnState::LocksStolen => Err(Error::Expired),
                TxnState::Committed => Err(Error::invalid_argument(
                    "transaction has already been committed",
                )),
                TxnState::RolledBack => Err(Error::invalid_argument(
                    "transaction has already been rolled back",
                )),
                _ => Err(Error::invalid_argument("transaction is not in state for commit")),
            };
        }

        let result = self.commit_internal();

        if let Some(name) = self.name.take() {
            self.db.unregister_name(&name);
        }

        // Release order: locks, then dirty entries, then local state, and
        // the registry flip strictly last.
        self.release_locks_and_state();
        self.release_dirty();

        match result {
            Ok(commit_seq) => {
                self.state.store(TxnState::Committed);
                self.metadata.set_commit_seq(commit_seq);
                self.clear();
                self.metadata.set_state(SimpleState::Committed);
                self.db.expirable().remove(self.id);
                debug!(txn_id = self.id, commit_seq, "transaction committed");
                Ok(())
            }
            Err(err) => {
                self.clear();
                self.state.store(TxnState::RolledBack);
                self.metadata.set_state(SimpleState::Aborted);
                self.db.expirable().remove(self.id);
                debug!(txn_id = self.id, ?err, "commit failed, transaction rolled back");
                Err(err)
            }
        }
    }

    fn commit_internal(&mut self) -> Result<SequenceNumber> {
        self.wait_for_dependencies()?;
        self.lock_all_optimistic_writes()?;

        let mut validator = CommitValidator {
            db: self.db.as_ref(),
            tracked_keys: &self.tracked_keys,
        };
        let base = self.db.storage().write(&self.write_batch, &mut validator)?;
        let commit_seq = base.saturating_sub(1) + self.write_batch.count() as u64;

        // Publish committed sequences before any lock is released: each
        // written key at its assigned sequence, in batch order so the
        // latest op per key wins.
        for (offset, op) in self.write_batch.ops().iter().enumerate() {
            self.db
                .validation_map(op.cf())
                .put(op.key(), base + offset as u64);
        }

        // Structural neighbors touched by inserts: bump storage's nearby
        // sequence and publish, so concurrent scans that tracked the
        // neighbor fail validation.
        for (&cf, keys) in &self.tracked_keys {
            for (key, info) in keys {
                if info.is_nearby_key {
                    self.db
                        .storage()
                        .update_nearby_seq(cf, key, info.is_head_node)?;
                    self.db.validation_map(cf).put(key, commit_seq);
                }
            }
        }

        Ok(commit_seq)
    }

    /// Upgrades every optimistic write to an exclusive pessimistic lock.
    /// Keys already pessimistically locked are skipped. Uses the waiting
    /// acquisition path: dependency resolution has already run, so no
    /// lock cycle can form.
    fn lock_all_optimistic_writes(&mut self) -> Result<()> {
        let to_lock: Vec<(CfId, Vec<u8>)> = self
            .tracked_keys
            .iter()
            .flat_map(|(&cf, keys)| {
                keys.iter()
                    .filter(|(_, info)| {
                        info.key_state & KEY_STATE_OCC_WRITE != 0
                            && info.key_state & KEY_STATE_PESSIMISTIC == 0
                    })
                    .map(move |(key, _)| (cf, key.clone()))
            })
            .collect();

        for (cf, key) in to_lock {
            self.pessimistic_lock(cf, &key, false, true, false)?;
        }
        Ok(())
    }

    /// Rolls back the transaction, releasing every lock and dirty entry.
    pub fn rollback(&mut self) -> Result<()> {
        match self.state.load() {
            TxnState::Started | TxnState::Prepared | TxnState::LocksStolen => {
                self.state.store(TxnState::AwaitingRollback);
                if let Some(name) = self.name.take() {
                    self.db.unregister_name(&name);
                }
                self.release_locks_and_state();
                self.release_dirty();
                self.clear();
                self.state.store(TxnState::RolledBack);
                self.metadata.set_state(SimpleState::Aborted);
                self.db.expirable().remove(self.id);
                debug!(txn_id = self.id, "transaction rolled back");
                Ok(())
            }
            TxnState::Committed => Err(Error::invalid_argument(
                "transaction has already been committed",
            )),
            TxnState::RolledBack => Err(Error::invalid_argument(
                "transaction has already been rolled back",
            )),
            _ => Err(Error::invalid_argument(
                "transaction is not in state for rollback",
            )),
        }
    }

    /// Locks and writes through a caller-supplied batch, outside the
    /// transaction's own tracked set. Keys are locked in sorted order, so
    /// the batch cannot deadlock with itself.
    pub fn commit_batch(&mut self, batch: &WriteBatch) -> Result<()> {
        let mut sorted: BTreeMap<CfId, std::collections::BTreeSet<Vec<u8>>> = BTreeMap::new();
        for op in batch.ops() {
            sorted.entry(op.cf()).or_default().insert(op.key().to_vec());
        }

        let mut locked: Vec<(CfId, Vec<u8>)> = Vec::new();
        let mut lock_result = Ok(());
        'acquire: for (&cf, keys) in &sorted {
            for key in keys {
                match self.db.lock_manager().acquire(
                    cf,
                    key,
                    self.id,
                    true,
                    self.expiration_time,
                    self.lock_timeout,
                    false,
                ) {
                    Ok(()) => locked.push((cf, key.clone())),
                    Err(err) => {
                        lock_result = Err(err);
                        break 'acquire;
                    }
                }
            }
        }

        let result = lock_result.and_then(|()| {
            if self.is_expired() {
                return Err(Error::Expired);
            }
            let can_commit = if self.expiration_time > 0 {
                self.state
                    .compare_exchange(TxnState::Started, TxnState::AwaitingCommit)
            } else if self.state.load() == TxnState::Started {
                self.state.store(TxnState::AwaitingCommit);
                true
            } else {
                false
            };
            if !can_commit {
                return match self.state.load() {
                    TxnState::LocksStolen => Err(Error::Expired),
                    _ => Err(Error::invalid_argument(
                        "transaction is not in state for commit",
                    )),
                };
            }

            let base = self
                .db
                .storage()
                .write(batch, &mut crate::storage::NoopCommitCallback)?;
            let commit_seq = base.saturating_sub(1) + batch.count() as u64;
            for (offset, op) in batch.ops().iter().enumerate() {
                self.db
                    .validation_map(op.cf())
                    .put(op.key(), base + offset as u64);
            }
            self.state.store(TxnState::Committed);
            self.metadata.set_commit_seq(commit_seq);
            self.metadata.set_state(SimpleState::Committed);
            self.db.expirable().remove(self.id);
            Ok(())
        });

        for (cf, key) in locked {
            self.db.lock_manager().unlock(cf, &key, self.id);
        }
        result
    }

    // ------------------------------------------------------------------
    // Release paths
    // ------------------------------------------------------------------

    fn release_locks_and_state(&self) {
        for (&cf, keys) in &self.tracked_keys {
            for (key, info) in keys {
                if info.key_state & KEY_STATE_PESSIMISTIC != 0 {
                    self.db.lock_manager().unlock(cf, key, self.id);
                    self.db.access_list(cf).remove(key, self.id);
                }
                if self.track_state {
                    self.decrement_state_counts(cf, key, info);
                }
            }
        }
    }

    fn release_dirty(&self) {
        for &cf in &self.scan_cf_ids {
            self.db.dirty_buffer(cf).remove_scan_info(self.id);
        }
        for (&cf, keys) in &self.tracked_keys {
            let buffer = self.db.dirty_buffer(cf);
            for key in keys.keys() {
                buffer.remove(key, self.id);
            }
        }
    }

    fn clear(&mut self) {
        self.write_batch.clear();
        self.tracked_keys.clear();
        self.depend_txn_ids.clear();
        self.data_dep_ids.clear();
        self.scan_cf_ids.clear();
        self.save_points.clear();
        self.num_puts = 0;
        self.num_deletes = 0;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // A transaction dropped mid-flight must leave no residue: locks,
        // dirty entries, and counters are reclaimed and dependents observe
        // an abort.
        if !self.state.load().is_terminal() {
            if let Some(name) = self.name.take() {
                self.db.unregister_name(&name);
            }
            self.release_locks_and_state();
            self.release_dirty();
            self.metadata.set_state(SimpleState::Aborted);
            self.state.store(TxnState::RolledBack);
        }
        self.db.expirable().remove(self.id);
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state.load())
            .field("num_keys", &self.num_keys())
            .field("deps", &self.depend_txn_ids.len())
            .finish()
    }
}

/// Commit-time validator run inside the storage write, before publication.
struct CommitValidator<'a> {
    db: &'a TransactionDb,
    tracked_keys: &'a TrackedKeys,
}

impl CommitCallback for CommitValidator<'_> {
    fn before_publish(&mut self, _base_seq: SequenceNumber) -> Result<()> {
        for (&cf, keys) in self.tracked_keys {
            let validation_map = self.db.validation_map(cf);
            for (key, info) in keys {
                if info.key_state & KEY_STATE_OCC_READ == 0 {
                    continue;
                }
                if info.is_dirty_read {
                    // The read is valid only if the observed writer's
                    // commit supplies the committed value.
                    if info.dependent_txn == 0 {
                        return Err(Error::Aborted);
                    }
                    if let Some(dep) = self.db.registry().get(info.dependent_txn) {
                        if dep.state() == SimpleState::Aborted {
                            return Err(Error::Aborted);
                        }
                    }
                } else {
                    let last_committed = validation_map.latest_sequence_number(key);
                    if last_committed != MAX_SEQUENCE_NUMBER && last_committed > info.seq {
                        trace!(
                            cf,
                            last_committed,
                            tracked = info.seq,
                            "optimistic read validation failed"
                        );
                        return Err(Error::Aborted);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Scan overlay: first record seen per key wins (newest within a bucket).
#[derive(Default)]
struct ScanOverlay {
    entries: ByteMap<Option<Vec<u8>>>,
}

impl DirtyScanCallback for ScanOverlay {
    fn invoke(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries
            .entry(key.to_vec())
            .or_insert_with(|| Some(value.to_vec()));
        Ok(())
    }

    fn invoke_deletion(&mut self, key: &[u8]) -> Result<()> {
        self.entries.entry(key.to_vec()).or_insert(None);
        Ok(())
    }
}
