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

//! # Usage Port
//!
//! How the runner samples process memory while an export is in progress.

use crate::domain::entities::MemorySnapshot;

pub trait UsageReporter: Send + Sync {
    fn snapshot(&self) -> MemorySnapshot;
}

/// Reports zeros. Handy when memory figures are not wanted.
pub struct NoopUsageReporter;

impl UsageReporter for NoopUsageReporter {
    fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot::default()
    }
}
