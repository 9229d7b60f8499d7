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

use crate::domain::entities::MemorySnapshot;
use crate::ports::usage_port::UsageReporter;
use log::warn;
use std::sync::Mutex;
use sysinfo::{Pid, System};

/// Samples this process's memory through `sysinfo`.
pub struct SysinfoUsageReporter {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl SysinfoUsageReporter {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Cannot determine own pid, memory will read as zero: {}", e);
                None
            }
        };
        Self {
            pid,
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoUsageReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageReporter for SysinfoUsageReporter {
    fn snapshot(&self) -> MemorySnapshot {
        let Some(pid) = self.pid else {
            return MemorySnapshot::default();
        };
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_process(pid);
        match system.process(pid) {
            Some(process) => MemorySnapshot {
                resident_bytes: process.memory(),
                virtual_bytes: process.virtual_memory(),
            },
            None => MemorySnapshot::default(),
        }
    }
}
