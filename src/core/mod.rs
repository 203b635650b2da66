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

//! Core types: errors, identifiers, transaction states

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    AtomicSimpleState, AtomicTxnState, CfId, SequenceNumber, SimpleState, TxnId, TxnState,
    KEY_STATE_OCC_READ, KEY_STATE_OCC_WRITE, KEY_STATE_PESSIMISTIC, MAX_SEQUENCE_NUMBER,
};
