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

//! Striped pessimistic lock manager
//!
//! Maps `(cf, key)` to a [`LockList`] through per-column-family stripe
//! arrays. Each stripe owns its keys behind one mutex; grants, waiter
//! removal, and the grant-signal re-check all happen under that mutex, so a
//! timed-out waiter and a concurrent grant cannot both win.
//!
//! # Concurrency
//!
//! Acquisitions on different stripes never contend. A blocked acquisition
//! parks on its [`GrantSignal`] outside the stripe mutex.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::common::clock::now_micros;
use crate::common::{hash_bytes, new_concurrent_cf_map, ByteMap, ConcurrentCfMap};
use crate::core::{CfId, Error, Result, TxnId};
use crate::txn::lock_list::{GrabOutcome, GrantSignal, LockList};
use crate::txn::registry::ExpirableRegistry;

struct LockMapStripe {
    keys: Mutex<ByteMap<LockList>>,
}

impl LockMapStripe {
    fn new() -> Self {
        Self {
            keys: Mutex::new(ByteMap::new()),
        }
    }
}

/// Per-column-family stripe array.
struct LockMap {
    stripes: Vec<LockMapStripe>,
}

impl LockMap {
    fn new(num_stripes: usize) -> Self {
        Self {
            stripes: (0..num_stripes).map(|_| LockMapStripe::new()).collect(),
        }
    }

    #[inline]
    fn stripe(&self, key: &[u8]) -> &LockMapStripe {
        let idx = (hash_bytes(key) % self.stripes.len() as u64) as usize;
        &self.stripes[idx]
    }
}

/// Engine-wide lock manager.
pub struct LockManager {
    maps: ConcurrentCfMap<Arc<LockMap>>,
    num_stripes: usize,
    expirable: Arc<ExpirableRegistry>,
}

impl LockManager {
    pub fn new(num_stripes: usize, expirable: Arc<ExpirableRegistry>) -> Self {
        Self {
            maps: new_concurrent_cf_map(),
            num_stripes,
            expirable,
        }
    }

    fn lock_map(&self, cf: CfId) -> Arc<LockMap> {
        if let Some(map) = self.maps.get(&cf) {
            return Arc::clone(&map);
        }
        Arc::clone(
            &self
                .maps
                .entry(cf)
                .or_insert_with(|| Arc::new(LockMap::new(self.num_stripes))),
        )
    }

    /// Acquires the lock on `(cf, key)` for `txn_id`.
    ///
    /// `expiration_time` is the transaction's deadline in microseconds
    /// (0 = not expirable), recorded so blocked waiters can steal from the
    /// holder once it lapses. With `fail_fast` the call never blocks and
    /// contention returns `Busy`; otherwise the caller waits up to
    /// `timeout` for a grant and gets `TimedOut` on expiry. A rejected
    /// shared-to-exclusive upgrade returns `Busy` in both modes.
    pub fn acquire(
        &self,
        cf: CfId,
        key: &[u8],
        txn_id: TxnId,
        exclusive: bool,
        expiration_time: u64,
        timeout: Duration,
        fail_fast: bool,
    ) -> Result<()> {
        let map = self.lock_map(cf);
        let stripe = map.stripe(key);
        let signal = Arc::new(GrantSignal::new());

        let outcome = {
            let mut keys = stripe.keys.lock();
            let list = keys.entry(key.to_vec()).or_default();
            list.grab(txn_id, exclusive, expiration_time, Arc::clone(&signal))
        };

        match outcome {
            GrabOutcome::Acquired => Ok(()),
            GrabOutcome::UpgradeConflict => {
                debug!(txn_id, "shared->exclusive upgrade rejected: other owners present");
                Err(Error::Busy)
            }
            GrabOutcome::Waiting if fail_fast || timeout.is_zero() => {
                let mut keys = stripe.keys.lock();
                if let Some(list) = keys.get_mut(key) {
                    // A release may have granted us between the two stripe
                    // critical sections.
                    if signal.is_signaled() {
                        return Ok(());
                    }
                    list.remove_waiter(txn_id);
                    if list.is_idle() {
                        keys.remove(key);
                    }
                }
                Err(Error::Busy)
            }
            GrabOutcome::Waiting => {
                if signal.wait_for(timeout) {
                    return Ok(());
                }
                self.finish_timed_out_wait(stripe, key, txn_id, &signal)
            }
        }
    }

    /// Timeout path: under the stripe mutex, settle whether the waiter was
    /// granted after all, can steal from an expired holder, or backs out.
    fn finish_timed_out_wait(
        &self,
        stripe: &LockMapStripe,
        key: &[u8],
        txn_id: TxnId,
        signal: &GrantSignal,
    ) -> Result<()> {
        let mut keys = stripe.keys.lock();
        if signal.is_signaled() {
            return Ok(());
        }
        let Some(list) = keys.get_mut(key) else {
            // List vanished, so our entry is gone too; treat as timeout.
            return Err(Error::TimedOut);
        };

        // The holders may have expired while we waited.
        if list.expiration_time() > 0 && now_micros() >= list.expiration_time() {
            for owner in list.owner_ids() {
                if owner != txn_id && self.expirable.try_steal(owner) {
                    list.drop_lock(owner);
                }
            }
            if signal.is_signaled() {
                trace!(txn_id, "lock acquired by stealing from expired holder");
                return Ok(());
            }
        }

        list.remove_waiter(txn_id);
        if list.is_idle() {
            keys.remove(key);
        }
        Err(Error::TimedOut)
    }

    /// Releases `txn_id`'s hold on `(cf, key)`, granting waiters. Idle
    /// lists are dropped rather than pooled.
    pub fn unlock(&self, cf: CfId, key: &[u8], txn_id: TxnId) {
        let Some(map) = self.maps.get(&cf).map(|m| Arc::clone(&m)) else {
            return;
        };
        let stripe = map.stripe(key);
        let mut keys = stripe.keys.lock();
        if let Some(list) = keys.get_mut(key) {
            list.drop_lock(txn_id);
            if list.is_idle() {
                keys.remove(key);
            }
        }
    }

    /// True when `txn_id` currently owns `(cf, key)`. Test/debug helper.
    pub fn is_locked_by(&self, cf: CfId, key: &[u8], txn_id: TxnId) -> bool {
        let Some(map) = self.maps.get(&cf).map(|m| Arc::clone(&m)) else {
            return false;
        };
        let stripe = map.stripe(key);
        let keys = stripe.keys.lock();
        keys.get(key).is_some_and(|list| list.is_owner(txn_id))
    }

    /// Total number of live (non-idle) lock lists. Test/debug helper.
    pub fn live_lock_count(&self) -> usize {
        let mut count = 0;
        for entry in self.maps.iter() {
            for stripe in &entry.value().stripes {
                count += stripe.keys.lock().len();
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AtomicTxnState, TxnState};
    use std::thread;

    fn manager() -> LockManager {
        LockManager::new(16, Arc::new(ExpirableRegistry::new()))
    }

    const NO_WAIT: Duration = Duration::ZERO;
    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(5);

    #[test]
    fn test_acquire_and_unlock() {
        let mgr = manager();
        mgr.acquire(0, b"k", 1, true, 0, LONG, false).unwrap();
        assert!(mgr.is_locked_by(0, b"k", 1));
        mgr.unlock(0, b"k", 1);
        assert!(!mgr.is_locked_by(0, b"k", 1));
        assert_eq!(mgr.live_lock_count(), 0);
    }

    #[test]
    fn test_shared_acquisitions_coexist() {
        let mgr = manager();
        mgr.acquire(0, b"k", 1, false, 0, LONG, false).unwrap();
        mgr.acquire(0, b"k", 2, false, 0, LONG, false).unwrap();
        assert!(mgr.is_locked_by(0, b"k", 1));
        assert!(mgr.is_locked_by(0, b"k", 2));
    }

    #[test]
    fn test_fail_fast_on_contention() {
        let mgr = manager();
        mgr.acquire(0, b"k", 1, true, 0, LONG, false).unwrap();
        assert_eq!(
            mgr.acquire(0, b"k", 2, true, 0, LONG, true).unwrap_err(),
            Error::Busy
        );
        // The failed acquisition must not linger as a waiter.
        mgr.unlock(0, b"k", 1);
        assert!(!mgr.is_locked_by(0, b"k", 2));
    }

    #[test]
    fn test_timeout_removes_waiter() {
        let mgr = manager();
        mgr.acquire(0, b"k", 1, true, 0, LONG, false).unwrap();
        assert_eq!(
            mgr.acquire(0, b"k", 2, true, 0, SHORT, false).unwrap_err(),
            Error::TimedOut
        );
        mgr.unlock(0, b"k", 1);
        assert!(!mgr.is_locked_by(0, b"k", 2));
        assert_eq!(mgr.live_lock_count(), 0);
    }

    #[test]
    fn test_blocked_acquire_granted_on_release() {
        let mgr = Arc::new(manager());
        mgr.acquire(0, b"k", 1, true, 0, LONG, false).unwrap();

        let waiter = {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || mgr.acquire(0, b"k", 2, true, 0, LONG, false))
        };
        thread::sleep(Duration::from_millis(30));
        mgr.unlock(0, b"k", 1);
        waiter.join().unwrap().unwrap();
        assert!(mgr.is_locked_by(0, b"k", 2));
    }

    #[test]
    fn test_zero_timeout_behaves_fail_fast() {
        let mgr = manager();
        mgr.acquire(0, b"k", 1, true, 0, LONG, false).unwrap();
        assert_eq!(
            mgr.acquire(0, b"k", 2, false, 0, NO_WAIT, false).unwrap_err(),
            Error::Busy
        );
    }

    #[test]
    fn test_upgrade_conflict_maps_to_busy() {
        let mgr = manager();
        mgr.acquire(0, b"k", 1, false, 0, LONG, false).unwrap();
        mgr.acquire(0, b"k", 2, false, 0, LONG, false).unwrap();
        assert_eq!(
            mgr.acquire(0, b"k", 1, true, 0, LONG, false).unwrap_err(),
            Error::Busy
        );
        // Shared holds survive.
        assert!(mgr.is_locked_by(0, b"k", 1));
        assert!(mgr.is_locked_by(0, b"k", 2));
    }

    #[test]
    fn test_different_keys_no_contention() {
        let mgr = manager();
        mgr.acquire(0, b"a", 1, true, 0, LONG, false).unwrap();
        mgr.acquire(0, b"b", 2, true, 0, LONG, false).unwrap();
        assert!(mgr.is_locked_by(0, b"a", 1));
        assert!(mgr.is_locked_by(0, b"b", 2));
    }

    #[test]
    fn test_cf_isolation() {
        let mgr = manager();
        mgr.acquire(0, b"k", 1, true, 0, LONG, false).unwrap();
        mgr.acquire(1, b"k", 2, true, 0, LONG, false).unwrap();
        assert!(mgr.is_locked_by(0, b"k", 1));
        assert!(mgr.is_locked_by(1, b"k", 2));
    }

    #[test]
    fn test_steal_from_expired_holder() {
        let expirable = Arc::new(ExpirableRegistry::new());
        let mgr = LockManager::new(16, Arc::clone(&expirable));

        // Owner holds the lock with an already-lapsed deadline.
        let owner_state = Arc::new(AtomicTxnState::new(TxnState::Started));
        let deadline = now_micros() + 20_000;
        expirable.insert(1, Arc::clone(&owner_state), deadline);
        mgr.acquire(0, b"k", 1, true, deadline, LONG, false).unwrap();

        // The waiter times out, notices the lapsed deadline, steals.
        mgr.acquire(0, b"k", 2, true, 0, Duration::from_millis(60), false)
            .unwrap();
        assert!(mgr.is_locked_by(0, b"k", 2));
        assert_eq!(owner_state.load(), TxnState::LocksStolen);
    }
}
