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

//! Per-key shared/exclusive lock queue
//!
//! A [`LockList`] tracks the owners of one key and the FIFO queue of
//! waiters behind them. Waiters are granted on release strictly in order,
//! except that a run of shared entries at the head is granted as one batch.
//!
//! The queues are container-owned: entries live inside the list and are
//! destroyed the moment they are unlinked, so there is no shared ownership
//! between siblings. Callers serialize access through the stripe mutex in
//! the lock manager.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::core::TxnId;

/// Requested or held lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Aggregate holder state of a lock list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HolderState {
    #[default]
    NotHeld,
    Shared,
    Exclusive,
}

/// Single-use grant signal handed to a queued waiter.
///
/// Signaled under the stripe mutex when the waiter becomes an owner. The
/// woken thread must re-check ownership under the stripe mutex: a timeout
/// and a grant can race, and the stripe mutex is the arbiter.
#[derive(Debug, Default)]
pub struct GrantSignal {
    granted: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl GrantSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the signal granted and wakes the waiter.
    pub fn signal(&self) {
        let _guard = self.mutex.lock();
        self.granted.store(true, Ordering::Release);
        self.condvar.notify_one();
    }

    /// True once `signal` has run.
    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.granted.load(Ordering::Acquire)
    }

    /// Blocks until signaled or until `timeout` elapses. Returns whether
    /// the signal fired.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut guard = self.mutex.lock();
        if self.granted.load(Ordering::Acquire) {
            return true;
        }
        let deadline = std::time::Instant::now() + timeout;
        while !self.granted.load(Ordering::Acquire) {
            if self.condvar.wait_until(&mut guard, deadline).timed_out() {
                return self.granted.load(Ordering::Acquire);
            }
        }
        true
    }
}

/// One owner or waiter entry.
#[derive(Debug)]
struct LockEntry {
    txn_id: TxnId,
    mode: LockMode,
    expiration_time: u64,
    signal: Arc<GrantSignal>,
}

/// Outcome of [`LockList::grab`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabOutcome {
    /// The caller holds the lock now.
    Acquired,
    /// The caller was appended to (or already sits in) the waiter queue.
    Waiting,
    /// Shared-to-exclusive upgrade with other owners present. Re-queueing
    /// the request would mean giving up the shared hold mid-transaction,
    /// so the request is rejected instead.
    UpgradeConflict,
}

/// Owners/waiters queue for one key.
#[derive(Debug, Default)]
pub struct LockList {
    holder: HolderState,
    owners: Vec<LockEntry>,
    waiters: VecDeque<LockEntry>,
    /// Latest expiration deadline among current owners; 0 = none.
    expiration_time: u64,
}

impl LockList {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn holder(&self) -> HolderState {
        self.holder
    }

    #[inline]
    pub fn expiration_time(&self) -> u64 {
        self.expiration_time
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.owners.is_empty() && self.waiters.is_empty()
    }

    /// True when `txn_id` is a current owner.
    pub fn is_owner(&self, txn_id: TxnId) -> bool {
        self.owners.iter().any(|entry| entry.txn_id == txn_id)
    }

    /// Ids of all current owners, head first.
    pub fn owner_ids(&self) -> Vec<TxnId> {
        self.owners.iter().map(|entry| entry.txn_id).collect()
    }

    /// Requests the lock for `txn_id`.
    ///
    /// Re-entrant: an existing owner asking for a mode its hold already
    /// covers gets `Acquired` with the expiration extended. The sole shared
    /// owner may upgrade in place; an upgrade with other owners present is
    /// rejected with `UpgradeConflict`. A transaction already queued must
    /// re-request with its queued mode.
    pub fn grab(
        &mut self,
        txn_id: TxnId,
        exclusive: bool,
        new_expiration: u64,
        signal: Arc<GrantSignal>,
    ) -> GrabOutcome {
        if let Some(pos) = self.owners.iter().position(|e| e.txn_id == txn_id) {
            // Holding exclusive covers any request; a shared request is
            // covered by any hold.
            if self.owners[pos].mode == LockMode::Exclusive || !exclusive {
                self.expiration_time = self.expiration_time.max(new_expiration);
                return GrabOutcome::Acquired;
            }

            if self.owners.len() == 1 {
                self.owners[pos].mode = LockMode::Exclusive;
                self.owners[pos].signal = signal;
                self.holder = HolderState::Exclusive;
                self.expiration_time = self.expiration_time.max(new_expiration);
                trace!(txn_id, "lock upgraded shared -> exclusive");
                return GrabOutcome::Acquired;
            }

            return GrabOutcome::UpgradeConflict;
        }

        if let Some(waiting) = self.waiters.iter().find(|e| e.txn_id == txn_id) {
            debug_assert_eq!(
                exclusive,
                waiting.mode == LockMode::Exclusive,
                "queued lock request re-issued with a different mode"
            );
            return GrabOutcome::Waiting;
        }

        let entry = LockEntry {
            txn_id,
            mode: if exclusive {
                LockMode::Exclusive
            } else {
                LockMode::Shared
            },
            expiration_time: new_expiration,
            signal,
        };

        match self.holder {
            HolderState::NotHeld => {
                self.holder = match entry.mode {
                    LockMode::Shared => HolderState::Shared,
                    LockMode::Exclusive => HolderState::Exclusive,
                };
                self.expiration_time = entry.expiration_time;
                trace!(txn_id, mode = ?entry.mode, "lock granted on idle list");
                self.owners.push(entry);
                GrabOutcome::Acquired
            }
            HolderState::Shared if !exclusive && self.waiters.is_empty() => {
                self.expiration_time = self.expiration_time.max(entry.expiration_time);
                trace!(txn_id, "shared lock joined owners");
                self.owners.push(entry);
                GrabOutcome::Acquired
            }
            _ => {
                trace!(txn_id, mode = ?entry.mode, "lock request queued");
                self.waiters.push_back(entry);
                GrabOutcome::Waiting
            }
        }
    }

    /// Releases `txn_id`'s hold and hands the lock to the next waiters.
    ///
    /// When the owner set drains, the head waiter is promoted and signaled;
    /// while both the promoted head and the next waiter are shared, the
    /// promotion repeats, granting the whole shared run as one batch.
    /// Returns false when `txn_id` held nothing.
    pub fn drop_lock(&mut self, txn_id: TxnId) -> bool {
        let Some(pos) = self.owners.iter().position(|e| e.txn_id == txn_id) else {
            return false;
        };
        self.owners.remove(pos);
        trace!(txn_id, "lock released");

        if self.owners.is_empty() && !self.waiters.is_empty() {
            while let Some(entry) = self.waiters.pop_front() {
                self.expiration_time = self.expiration_time.max(entry.expiration_time);
                self.holder = match entry.mode {
                    LockMode::Shared => HolderState::Shared,
                    LockMode::Exclusive => HolderState::Exclusive,
                };
                entry.signal.signal();
                trace!(granted = entry.txn_id, mode = ?entry.mode, "lock handed to waiter");
                self.owners.push(entry);

                let next_is_shared = self
                    .waiters
                    .front()
                    .is_some_and(|next| next.mode == LockMode::Shared);
                if !(next_is_shared && self.holder == HolderState::Shared) {
                    break;
                }
            }
        } else if self.owners.is_empty() {
            self.holder = HolderState::NotHeld;
        }

        true
    }

    /// Removes a queued (not yet granted) request, e.g. after a wait
    /// timeout. Returns whether an entry was removed.
    pub fn remove_waiter(&mut self, txn_id: TxnId) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|e| e.txn_id != txn_id);
        self.waiters.len() != before
    }

    /// Queue-integrity invariant, used by tests and debug assertions:
    /// exclusive holder implies a single owner, shared holder implies all
    /// owners shared, idle implies NotHeld.
    pub fn check_integrity(&self) -> bool {
        match self.holder {
            HolderState::NotHeld => self.owners.is_empty(),
            HolderState::Shared => {
                !self.owners.is_empty() && self.owners.iter().all(|e| e.mode == LockMode::Shared)
            }
            HolderState::Exclusive => {
                self.owners.len() == 1 && self.owners[0].mode == LockMode::Exclusive
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal() -> Arc<GrantSignal> {
        Arc::new(GrantSignal::new())
    }

    #[test]
    fn test_grab_idle_list() {
        let mut list = LockList::new();
        assert_eq!(list.grab(1, false, 0, signal()), GrabOutcome::Acquired);
        assert_eq!(list.holder(), HolderState::Shared);
        assert!(list.check_integrity());
    }

    #[test]
    fn test_shared_owners_accumulate() {
        let mut list = LockList::new();
        assert_eq!(list.grab(1, false, 0, signal()), GrabOutcome::Acquired);
        assert_eq!(list.grab(2, false, 0, signal()), GrabOutcome::Acquired);
        assert_eq!(list.owner_ids(), vec![1, 2]);
        assert!(list.check_integrity());
    }

    #[test]
    fn test_exclusive_blocks_followers() {
        let mut list = LockList::new();
        assert_eq!(list.grab(1, true, 0, signal()), GrabOutcome::Acquired);
        assert_eq!(list.grab(2, false, 0, signal()), GrabOutcome::Waiting);
        assert_eq!(list.grab(3, true, 0, signal()), GrabOutcome::Waiting);
        assert!(list.check_integrity());
    }

    #[test]
    fn test_shared_behind_waiter_queues() {
        // A shared request must queue once any waiter exists, even though
        // the holder is shared, to keep FIFO fairness.
        let mut list = LockList::new();
        assert_eq!(list.grab(1, false, 0, signal()), GrabOutcome::Acquired);
        assert_eq!(list.grab(2, true, 0, signal()), GrabOutcome::Waiting);
        assert_eq!(list.grab(3, false, 0, signal()), GrabOutcome::Waiting);
    }

    #[test]
    fn test_reentrant_grab_extends_expiration() {
        let mut list = LockList::new();
        assert_eq!(list.grab(1, true, 100, signal()), GrabOutcome::Acquired);
        assert_eq!(list.grab(1, false, 500, signal()), GrabOutcome::Acquired);
        assert_eq!(list.expiration_time(), 500);
        assert_eq!(list.owner_ids(), vec![1]);
    }

    #[test]
    fn test_upgrade_sole_owner() {
        // S4: sole shared owner upgrades in place.
        let mut list = LockList::new();
        assert_eq!(list.grab(1, false, 0, signal()), GrabOutcome::Acquired);
        assert_eq!(list.grab(1, true, 0, signal()), GrabOutcome::Acquired);
        assert_eq!(list.holder(), HolderState::Exclusive);
        assert!(list.check_integrity());
    }

    #[test]
    fn test_upgrade_with_peers_rejected() {
        let mut list = LockList::new();
        assert_eq!(list.grab(1, false, 0, signal()), GrabOutcome::Acquired);
        assert_eq!(list.grab(2, false, 0, signal()), GrabOutcome::Acquired);
        assert_eq!(list.grab(1, true, 0, signal()), GrabOutcome::UpgradeConflict);
        // Both shared holds survive the rejected upgrade.
        assert_eq!(list.owner_ids(), vec![1, 2]);
        assert_eq!(list.holder(), HolderState::Shared);
        assert!(list.check_integrity());
    }

    #[test]
    fn test_drop_grants_single_exclusive() {
        let mut list = LockList::new();
        let sig2 = signal();
        let sig3 = signal();
        list.grab(1, false, 0, signal());
        list.grab(2, true, 0, sig2.clone());
        list.grab(3, false, 0, sig3.clone());

        assert!(list.drop_lock(1));
        assert!(sig2.is_signaled());
        assert!(!sig3.is_signaled());
        assert_eq!(list.holder(), HolderState::Exclusive);
        assert_eq!(list.owner_ids(), vec![2]);
        assert!(list.check_integrity());

        assert!(list.drop_lock(2));
        assert!(sig3.is_signaled());
        assert_eq!(list.holder(), HolderState::Shared);
    }

    #[test]
    fn test_drop_grants_shared_batch() {
        // Property 5: one maximal shared prefix is granted atomically.
        let mut list = LockList::new();
        let signals: Vec<_> = (0..4).map(|_| signal()).collect();
        list.grab(1, true, 0, signal());
        list.grab(2, false, 0, signals[0].clone());
        list.grab(3, false, 0, signals[1].clone());
        list.grab(4, true, 0, signals[2].clone());
        list.grab(5, false, 0, signals[3].clone());

        assert!(list.drop_lock(1));
        // The shared run {2, 3} is granted; 4 (exclusive) blocks the rest.
        assert!(signals[0].is_signaled());
        assert!(signals[1].is_signaled());
        assert!(!signals[2].is_signaled());
        assert!(!signals[3].is_signaled());
        assert_eq!(list.owner_ids(), vec![2, 3]);
        assert_eq!(list.holder(), HolderState::Shared);
        assert!(list.check_integrity());
    }

    #[test]
    fn test_drop_last_owner_idles_list() {
        let mut list = LockList::new();
        list.grab(1, true, 0, signal());
        assert!(list.drop_lock(1));
        assert_eq!(list.holder(), HolderState::NotHeld);
        assert!(list.is_idle());
        assert!(list.check_integrity());
    }

    #[test]
    fn test_drop_non_owner_is_noop() {
        let mut list = LockList::new();
        list.grab(1, true, 0, signal());
        assert!(!list.drop_lock(42));
        assert_eq!(list.owner_ids(), vec![1]);
    }

    #[test]
    fn test_remove_waiter() {
        let mut list = LockList::new();
        let sig = signal();
        list.grab(1, true, 0, signal());
        list.grab(2, false, 0, sig.clone());

        assert!(list.remove_waiter(2));
        assert!(!list.remove_waiter(2));
        list.drop_lock(1);
        // The removed waiter must not have been granted.
        assert!(!sig.is_signaled());
        assert!(list.is_idle());
    }

    #[test]
    fn test_queued_rerequest_stays_waiting() {
        let mut list = LockList::new();
        list.grab(1, true, 0, signal());
        assert_eq!(list.grab(2, false, 0, signal()), GrabOutcome::Waiting);
        assert_eq!(list.grab(2, false, 0, signal()), GrabOutcome::Waiting);
    }

    #[test]
    fn test_grant_signal_wait() {
        let sig = signal();
        let waiter = {
            let sig = sig.clone();
            std::thread::spawn(move || sig.wait_for(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        sig.signal();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_grant_signal_timeout() {
        let sig = signal();
        assert!(!sig.wait_for(Duration::from_millis(10)));
    }
}
