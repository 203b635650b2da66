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

//! Storage seam, write batch, and configuration

pub mod config;
pub mod mem;
pub mod traits;
pub mod write_batch;

pub use config::{EngineConfig, TransactionOptions};
pub use mem::MemStorage;
pub use traits::{
    BytewiseComparator, CommitCallback, Comparator, NearbyInfo, NoopCommitCallback, ScannedRow,
    Storage,
};
pub use write_batch::{BatchGet, BatchOp, WriteBatch};
