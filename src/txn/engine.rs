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

//! Transactional engine handle
//!
//! [`TransactionDb`] owns every process-scoped structure of the
//! concurrency core — lock manager, dirty buffers, validation maps, access
//! lists, state manager, and the transaction registries — and begins
//! transactions against a [`Storage`] implementation. All shared state
//! hangs off this handle; there are no ambient globals.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::common::{new_concurrent_cf_map, ConcurrentCfMap};
use crate::core::{CfId, Error, Result, TxnId};
use crate::storage::{BytewiseComparator, Comparator, EngineConfig, Storage, TransactionOptions};
use crate::txn::access_list::AccessList;
use crate::txn::conflict::ConflictTable;
use crate::txn::dirty_buffer::DirtyBuffer;
use crate::txn::lock_manager::LockManager;
use crate::txn::registry::{ExpirableRegistry, TxnRegistry};
use crate::txn::state_mgr::TxnStateMgr;
use crate::txn::transaction::Transaction;
use crate::txn::validation_map::ValidationMap;

/// Engine handle owning the shared concurrency-control state.
pub struct TransactionDb {
    storage: Arc<dyn Storage>,
    config: EngineConfig,
    comparator: Arc<dyn Comparator>,
    conflict_table: ConflictTable,
    lock_manager: LockManager,
    dirty_buffers: ConcurrentCfMap<Arc<DirtyBuffer>>,
    validation_maps: ConcurrentCfMap<Arc<ValidationMap>>,
    access_lists: ConcurrentCfMap<Arc<AccessList>>,
    state_mgr: TxnStateMgr,
    registry: TxnRegistry,
    expirable: Arc<ExpirableRegistry>,
    names: DashMap<String, TxnId>,
}

impl TransactionDb {
    /// Creates an engine over `storage` with the default comparator and
    /// reference conflict table.
    pub fn new(storage: Arc<dyn Storage>, config: EngineConfig) -> Arc<Self> {
        Self::with_parts(
            storage,
            config,
            Arc::new(BytewiseComparator),
            ConflictTable::reference(),
        )
    }

    /// Creates an engine with an explicit comparator and conflict table.
    pub fn with_parts(
        storage: Arc<dyn Storage>,
        config: EngineConfig,
        comparator: Arc<dyn Comparator>,
        conflict_table: ConflictTable,
    ) -> Arc<Self> {
        let expirable = Arc::new(ExpirableRegistry::new());
        Arc::new(Self {
            lock_manager: LockManager::new(config.lock_map_num_stripes, Arc::clone(&expirable)),
            state_mgr: TxnStateMgr::new(config.state_map_num_stripes),
            dirty_buffers: new_concurrent_cf_map(),
            validation_maps: new_concurrent_cf_map(),
            access_lists: new_concurrent_cf_map(),
            registry: TxnRegistry::new(),
            names: DashMap::new(),
            expirable,
            comparator,
            conflict_table,
            config,
            storage,
        })
    }

    /// Begins a new transaction.
    pub fn begin(self: &Arc<Self>, options: TransactionOptions) -> Transaction {
        let txn = Transaction::new(Arc::clone(self), options);
        debug!(txn_id = txn.id(), "transaction started");
        txn
    }

    #[inline]
    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn comparator(&self) -> &dyn Comparator {
        self.comparator.as_ref()
    }

    #[inline]
    pub fn conflict_table(&self) -> &ConflictTable {
        &self.conflict_table
    }

    #[inline]
    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    #[inline]
    pub fn state_mgr(&self) -> &TxnStateMgr {
        &self.state_mgr
    }

    #[inline]
    pub fn registry(&self) -> &TxnRegistry {
        &self.registry
    }

    #[inline]
    pub fn expirable(&self) -> &Arc<ExpirableRegistry> {
        &self.expirable
    }

    /// Dirty buffer for a column family, created on first use.
    pub fn dirty_buffer(&self, cf: CfId) -> Arc<DirtyBuffer> {
        if let Some(buffer) = self.dirty_buffers.get(&cf) {
            return Arc::clone(&buffer);
        }
        Arc::clone(
            &self
                .dirty_buffers
                .entry(cf)
                .or_insert_with(|| Arc::new(DirtyBuffer::new(cf, self.config.dirty_buffer_size))),
        )
    }

    /// Validation map for a column family, created on first use.
    pub fn validation_map(&self, cf: CfId) -> Arc<ValidationMap> {
        if let Some(map) = self.validation_maps.get(&cf) {
            return Arc::clone(&map);
        }
        Arc::clone(
            &self
                .validation_maps
                .entry(cf)
                .or_insert_with(|| Arc::new(ValidationMap::new())),
        )
    }

    /// Access list for a column family, created on first use.
    pub fn access_list(&self, cf: CfId) -> Arc<AccessList> {
        if let Some(list) = self.access_lists.get(&cf) {
            return Arc::clone(&list);
        }
        Arc::clone(
            &self
                .access_lists
                .entry(cf)
                .or_insert_with(|| Arc::new(AccessList::new(self.config.access_list_num_stripes))),
        )
    }

    /// Registers a transaction name; names must be unique among live
    /// transactions.
    pub fn register_name(&self, name: &str, txn_id: TxnId) -> Result<()> {
        match self.names.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::invalid_argument(
                "transaction name must be unique",
            )),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(txn_id);
                Ok(())
            }
        }
    }

    /// Removes a transaction's name registration.
    pub fn unregister_name(&self, name: &str) {
        self.names.remove(name);
    }

    /// Looks up a live transaction id by name.
    pub fn txn_id_by_name(&self, name: &str) -> Option<TxnId> {
        self.names.get(name).map(|entry| *entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;

    fn engine() -> Arc<TransactionDb> {
        TransactionDb::new(Arc::new(MemStorage::new()), EngineConfig::default())
    }

    #[test]
    fn test_begin_assigns_unique_ids() {
        let db = engine();
        let t1 = db.begin(TransactionOptions::default());
        let t2 = db.begin(TransactionOptions::default());
        assert_ne!(t1.id(), t2.id());
        assert!(db.registry().get(t1.id()).is_some());
    }

    #[test]
    fn test_per_cf_structures_are_cached() {
        let db = engine();
        let a = db.dirty_buffer(3);
        let b = db.dirty_buffer(3);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &db.dirty_buffer(4)));

        let v1 = db.validation_map(1);
        let v2 = db.validation_map(1);
        assert!(Arc::ptr_eq(&v1, &v2));
    }

    #[test]
    fn test_name_registry_uniqueness() {
        let db = engine();
        db.register_name("txn-a", 1).unwrap();
        assert!(db.register_name("txn-a", 2).is_err());
        assert_eq!(db.txn_id_by_name("txn-a"), Some(1));

        db.unregister_name("txn-a");
        assert_eq!(db.txn_id_by_name("txn-a"), None);
        db.register_name("txn-a", 2).unwrap();
    }
}
