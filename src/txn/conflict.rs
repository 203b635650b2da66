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

//! Piece-level conflict table and dependency polling
//!
//! Transactions of a workload type progress through numbered pieces. The
//! conflict table answers, for a waiter at `(self_type, piece_idx)` with a
//! dependency of `dep_type`: up to which piece must the dependent have
//! progressed before the waiter may continue?
//!
//! - `0`: no conflict at this piece, do not wait
//! - [`WAIT_FOR_TERMINATION`]: wait for the dependent's commit or abort
//! - anything else `c`: proceed once the dependent's `current_piece_idx`
//!   reaches `c`

use rustc_hash::FxHashMap;

use crate::core::{Error, Result, SimpleState};
use crate::txn::registry::TxnMetadata;

/// Conflict piece meaning "wait for the dependent's full termination".
pub const WAIT_FOR_TERMINATION: u32 = u32::MAX;

/// Hard cap on any dependency wait, in microseconds.
pub const DEPENDENCY_WAIT_CAP_MICROS: u64 = 15_000_000;

/// Reference entries: `(self_type, dep_type, conflict piece per piece_idx
/// starting at 1)`. Types 0 have eight pieces, types 1 and 2 four.
const REFERENCE_ENTRIES: &[(u32, u32, &[u32])] = &[
    (0, 0, &[0, 2, 0, 4, 5, 6, 7, 0]),
    (0, 1, &[1, 2, 0, 3, 3, 3, 3, 3]),
    (0, 2, &[4, 4, 0, 4, 1, 2, 3, 4]),
    (1, 0, &[1, 2, 8, 0]),
    (1, 1, &[1, 2, 3, 0]),
    (1, 2, &[4, 4, 4, 0]),
    (2, 0, &[5, 6, 7, 8]),
    (2, 1, &[3, 3, 3, 3]),
    (2, 2, &[1, 2, 3, 4]),
];

/// Closed lookup `(self_type, piece_idx, dep_type) -> conflict piece`.
///
/// Tuples outside the table map to [`WAIT_FOR_TERMINATION`]: an unknown
/// workload shape always waits for full termination.
#[derive(Debug, Clone)]
pub struct ConflictTable {
    entries: FxHashMap<(u32, u32, u32), u32>,
}

impl ConflictTable {
    /// The built-in reference table, covering types {0, 1, 2}.
    pub fn reference() -> Self {
        let mut entries = FxHashMap::default();
        for &(self_type, dep_type, pieces) in REFERENCE_ENTRIES {
            for (idx, &conflict) in pieces.iter().enumerate() {
                entries.insert((self_type, idx as u32 + 1, dep_type), conflict);
            }
        }
        Self { entries }
    }

    /// A custom table from explicit `((self_type, piece_idx, dep_type),
    /// conflict_piece)` tuples.
    pub fn from_entries(entries: impl IntoIterator<Item = ((u32, u32, u32), u32)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Conflict piece for the given tuple.
    #[inline]
    pub fn conflict_piece(&self, self_type: u32, piece_idx: u32, dep_type: u32) -> u32 {
        self.entries
            .get(&(self_type, piece_idx, dep_type))
            .copied()
            .unwrap_or(WAIT_FOR_TERMINATION)
    }
}

impl Default for ConflictTable {
    fn default() -> Self {
        Self::reference()
    }
}

/// Polls a dependent's published state once.
///
/// `Ok` releases the waiter; `Incomplete` asks it to spin again;
/// `Aborted` cascades; `TimedOut` fires once `used_micros` passes the
/// 15-second cap.
pub fn check_transaction_state(
    metadata: &TxnMetadata,
    used_micros: u64,
    conflict_piece: u32,
) -> Result<()> {
    if conflict_piece == 0 {
        return Ok(());
    }
    match metadata.state() {
        SimpleState::Committed => Ok(()),
        SimpleState::Aborted => Err(Error::Aborted),
        SimpleState::Started => {
            if conflict_piece != WAIT_FOR_TERMINATION
                && metadata.current_piece_idx() >= conflict_piece
            {
                Ok(())
            } else if used_micros > DEPENDENCY_WAIT_CAP_MICROS {
                Err(Error::TimedOut)
            } else {
                Err(Error::Incomplete)
            }
        }
    }
}
