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

//! Engine and per-transaction configuration
//!

/// Engine-wide configuration for the concurrency core.
///
/// Stripe and bucket counts trade memory for contention; the defaults suit a
/// few dozen concurrent transactions. All counts must be non-zero.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default lock acquisition timeout in milliseconds, used by
    /// transactions whose own `lock_timeout` is negative.
    /// Default: 1000
    pub txn_lock_timeout_ms: i64,

    /// Number of stripes per column family in the lock manager.
    /// Default: 16
    pub lock_map_num_stripes: usize,

    /// Number of hash buckets per column family in the dirty buffer.
    /// Default: 1024
    pub dirty_buffer_size: usize,

    /// Number of stripes per column family in the access-state map.
    /// Default: 16
    pub state_map_num_stripes: usize,

    /// Number of stripes per column family in the access list.
    /// Default: 16
    pub access_list_num_stripes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            txn_lock_timeout_ms: 1000,
            lock_map_num_stripes: 16,
            dirty_buffer_size: 1024,
            state_map_num_stripes: 16,
            access_list_num_stripes: 16,
        }
    }
}

impl EngineConfig {
    /// Creates a new EngineConfig with default values
    pub fn new() -> Self {
        Self::default()
    }
}

/// Per-transaction options, supplied to [`TransactionDb::begin`].
///
/// [`TransactionDb::begin`]: crate::txn::TransactionDb::begin
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    /// Advisory flag; the mixed commit protocol orders its waits and lock
    /// upgrades so that no cycle can form, so no detector runs.
    pub deadlock_detect: bool,

    /// Advisory companion to `deadlock_detect`.
    pub deadlock_detect_depth: u32,

    /// Lock acquisition timeout in milliseconds. Negative means "use the
    /// engine default"; zero means fail-fast on contention.
    pub lock_timeout_ms: i64,

    /// Transaction expiration in milliseconds from begin. Values <= 0
    /// disable expiration; an expired transaction's locks may be stolen.
    pub expiration_ms: i64,

    /// Pin a snapshot sequence at begin time.
    pub set_snapshot: bool,

    /// Byte ceiling for the transaction's write batch. Zero = unlimited.
    pub max_write_batch_size: usize,

    /// Maintain the per-key access-class counters in the state map.
    pub track_state: bool,

    /// Recovery hint carried through to the storage layer.
    pub use_only_the_last_commit_time_batch_for_recovery: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            deadlock_detect: false,
            deadlock_detect_depth: 50,
            lock_timeout_ms: -1,
            expiration_ms: -1,
            set_snapshot: false,
            max_write_batch_size: 0,
            track_state: false,
            use_only_the_last_commit_time_batch_for_recovery: false,
        }
    }
}

impl TransactionOptions {
    /// Creates options with default values
    pub fn new() -> Self {
        Self::default()
    }
}
