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

//! Error types for Interlock
//!
//! This module defines all error kinds used throughout the concurrency core.
//! Aborts are always propagated as values, never by unwinding across thread
//! boundaries.

use thiserror::Error;

/// Result type alias for Interlock operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for concurrency-control operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Lock contention under a fail-fast acquisition
    #[error("resource busy")]
    Busy,

    /// Lock or dependency wait exceeded its deadline
    #[error("operation timed out")]
    TimedOut,

    /// Transaction passed its expiration deadline (or had its locks stolen)
    #[error("transaction expired")]
    Expired,

    /// Transaction aborted, either by validation failure or cascaded from a
    /// dependent transaction
    #[error("transaction aborted")]
    Aborted,

    /// API misuse: committing twice, naming after a state transition, etc.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Key not present (dirty buffer miss, deleted value, missing accessor)
    #[error("not found")]
    NotFound,

    /// Internal wait continuation; never surfaced to callers
    #[error("incomplete")]
    Incomplete,

    /// Write batch grew past the configured byte limit
    #[error("write batch exceeds maximum size of {max} bytes")]
    WriteBatchTooLarge { max: usize },
}

impl Error {
    /// Create a new InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Returns true for NotFound
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    /// Returns true for TimedOut
    #[inline]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Error::TimedOut)
    }

    /// Returns true for Aborted
    #[inline]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted)
    }

    /// Returns true for Busy
    #[inline]
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::Busy.to_string(), "resource busy");
        assert_eq!(
            Error::invalid_argument("bad name").to_string(),
            "invalid argument: bad name"
        );
        assert_eq!(
            Error::WriteBatchTooLarge { max: 64 }.to_string(),
            "write batch exceeds maximum size of 64 bytes"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(Error::NotFound.is_not_found());
        assert!(Error::TimedOut.is_timed_out());
        assert!(Error::Aborted.is_aborted());
        assert!(Error::Busy.is_busy());
        assert!(!Error::Incomplete.is_aborted());
    }
}
