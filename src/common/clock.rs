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

//! Monotonic microsecond clock
//!
//! Transaction deadlines (lock timeouts, expiration times, dependency-wait
//! caps) are all expressed in microseconds since this clock's epoch. The
//! value is monotonic even if the system clock steps backwards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Last timestamp handed out, used to enforce monotonicity.
static LAST_MICROS: AtomicU64 = AtomicU64::new(0);

/// Returns the current time in microseconds since the Unix epoch.
///
/// Guaranteed to never go backwards: if the system clock steps back, callers
/// keep receiving the last observed value until real time catches up. Unlike
/// a sequence generator, two concurrent callers may observe the same value.
pub fn now_micros() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(1);

    let mut last = LAST_MICROS.load(Ordering::Acquire);
    loop {
        if now <= last {
            return last;
        }
        match LAST_MICROS.compare_exchange_weak(last, now, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return now,
            Err(observed) => last = observed,
        }
    }
}
