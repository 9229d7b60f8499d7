// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Record Store Port
//!
//! The contract the paged source needs from a backing database. Anything
//! that can return rows ordered by an integer identifier, starting strictly
//! after a given identifier, can feed an export: Oracle, a test double, or a
//! future adapter for another engine.

use crate::domain::entities::Record;
use crate::domain::errors::Result;

/// `RecordStore` is shared across the stage worker thread, hence `Send + Sync`.
pub trait RecordStore: Send + Sync {
    /// Returns at most `limit` records whose identifier is strictly greater
    /// than `after` (all records when `after` is `None`), ascending by
    /// identifier.
    fn query(&self, after: Option<i64>, limit: usize) -> Result<Vec<Record>>;

    /// Total number of records, if the store can count cheaply.
    ///
    /// Only used for count-based termination; `None` disables it.
    fn count(&self) -> Result<Option<u64>> {
        Ok(None)
    }
}
