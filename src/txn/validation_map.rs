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

//! Per-column-family last-committed-sequence map
//!
//! Committers publish the sequence assigned to each written key here,
//! after write-through and before releasing locks. Optimistic validation
//! compares a read's tracked sequence against this map; a key that was
//! never published returns [`MAX_SEQUENCE_NUMBER`], meaning "not recently
//! written", which validation treats as a pass.

use parking_lot::RwLock;

use crate::common::ByteMap;
use crate::core::{SequenceNumber, MAX_SEQUENCE_NUMBER};

/// Map of key -> last committed sequence for one column family.
#[derive(Debug, Default)]
pub struct ValidationMap {
    map: RwLock<ByteMap<SequenceNumber>>,
}

impl ValidationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the latest committed sequence for `key`.
    pub fn put(&self, key: &[u8], seq: SequenceNumber) {
        let mut map = self.map.write();
        map.insert(key.to_vec(), seq);
    }

    /// The last committed sequence for `key`, or [`MAX_SEQUENCE_NUMBER`]
    /// when the key has not been published recently.
    pub fn latest_sequence_number(&self, key: &[u8]) -> SequenceNumber {
        let map = self.map.read();
        map.get(key).copied().unwrap_or(MAX_SEQUENCE_NUMBER)
    }
}
