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

//! Indexed write batch
//!
//! A transaction's pending writes, in application order, with a per-key
//! index so the transaction can read its own uncommitted writes before
//! consulting the dirty buffer or storage. Savepoints truncate the batch
//! back to a recorded length.

use rustc_hash::FxHashMap;

use crate::core::{CfId, Error, Result};

/// A single batched operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put {
        cf: CfId,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: CfId,
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// Column family this operation targets.
    #[inline]
    pub fn cf(&self) -> CfId {
        match self {
            BatchOp::Put { cf, .. } | BatchOp::Delete { cf, .. } => *cf,
        }
    }

    /// Key this operation targets.
    #[inline]
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key, .. } => key,
        }
    }

    fn byte_size(&self) -> usize {
        match self {
            BatchOp::Put { key, value, .. } => key.len() + value.len(),
            BatchOp::Delete { key, .. } => key.len(),
        }
    }
}

/// Outcome of probing the batch for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchGet<'a> {
    /// The batch holds a pending value for the key.
    Value(&'a [u8]),
    /// The batch holds a pending deletion for the key.
    Deleted,
    /// The batch has no operation for the key.
    Missing,
}

/// Write batch with a latest-op index per (cf, key).
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
    /// (cf, key) -> index of the most recent op for that key
    index: FxHashMap<(CfId, Vec<u8>), usize>,
    size_bytes: usize,
    /// 0 = unlimited
    max_bytes: usize,
    save_points: Vec<usize>,
}

impl WriteBatch {
    /// Creates an empty batch with no size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty batch that rejects growth past `max_bytes` (0 =
    /// unlimited).
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }

    fn check_size(&self, add: usize) -> Result<()> {
        if self.max_bytes > 0 && self.size_bytes + add > self.max_bytes {
            return Err(Error::WriteBatchTooLarge {
                max: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Appends a put.
    pub fn put(&mut self, cf: CfId, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_size(key.len() + value.len())?;
        let op = BatchOp::Put {
            cf,
            key: key.to_vec(),
            value: value.to_vec(),
        };
        self.size_bytes += op.byte_size();
        self.index.insert((cf, key.to_vec()), self.ops.len());
        self.ops.push(op);
        Ok(())
    }

    /// Appends a deletion.
    pub fn delete(&mut self, cf: CfId, key: &[u8]) -> Result<()> {
        self.check_size(key.len())?;
        let op = BatchOp::Delete {
            cf,
            key: key.to_vec(),
        };
        self.size_bytes += op.byte_size();
        self.index.insert((cf, key.to_vec()), self.ops.len());
        self.ops.push(op);
        Ok(())
    }

    /// Looks up the most recent batched op for a key.
    pub fn get(&self, cf: CfId, key: &[u8]) -> BatchGet<'_> {
        // Index keys are owned; probing allocates only on the map's hash of
        // the borrowed pair, which FxHashMap does not support, so build the
        // probe key once.
        match self.index.get(&(cf, key.to_vec())) {
            Some(&idx) => match &self.ops[idx] {
                BatchOp::Put { value, .. } => BatchGet::Value(value),
                BatchOp::Delete { .. } => BatchGet::Deleted,
            },
            None => BatchGet::Missing,
        }
    }

    /// Number of operations in the batch.
    #[inline]
    pub fn count(&self) -> usize {
        self.ops.len()
    }

    /// True when the batch holds no operations.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Total payload bytes currently batched.
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Operations in application order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Records a savepoint at the current batch length.
    pub fn set_save_point(&mut self) {
        self.save_points.push(self.ops.len());
    }

    /// Truncates the batch back to the most recent savepoint.
    ///
    /// Returns `NotFound` when no savepoint is set.
    pub fn rollback_to_save_point(&mut self) -> Result<()> {
        let mark = self.save_points.pop().ok_or(Error::NotFound)?;
        for op in self.ops.drain(mark..) {
            self.size_bytes -= op.byte_size();
        }
        // Rebuild the latest-op index from the surviving prefix.
        self.index.clear();
        for (idx, op) in self.ops.iter().enumerate() {
            self.index.insert((op.cf(), op.key().to_vec()), idx);
        }
        Ok(())
    }

    /// Drops all operations and savepoints.
    pub fn clear(&mut self) {
        self.ops.clear();
        self.index.clear();
        self.save_points.clear();
        self.size_bytes = 0;
    }
}
