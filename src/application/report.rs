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

//! JSON summary of a finished run, for operators and schedulers.

use crate::application::pipeline::PipelineState;
use crate::domain::entities::RunStats;
use crate::domain::errors::{ExportError, PipelineError, Result, Stage};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub status: PipelineState,
    pub stage: Option<Stage>,
    pub error: Option<String>,
    pub stats: Option<RunStats>,
    pub finished_at: String,
}

impl RunReport {
    pub fn from_outcome(outcome: &std::result::Result<RunStats, PipelineError>) -> Self {
        let finished_at = chrono::Local::now().to_rfc3339();
        match outcome {
            Ok(stats) => Self {
                status: PipelineState::Succeeded,
                stage: None,
                error: None,
                stats: Some(stats.clone()),
                finished_at,
            },
            Err(e) => Self {
                status: if e.is_cancelled() {
                    PipelineState::Cancelled
                } else {
                    PipelineState::Failed
                },
                stage: e.stage(),
                error: Some(e.to_string()),
                stats: None,
                finished_at,
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ExportError::IoError(e.into()))
    }

    /// `<output>.report.json`.
    pub fn path_beside(output: &Path) -> PathBuf {
        let mut name = output.as_os_str().to_owned();
        name.push(".report.json");
        PathBuf::from(name)
    }

    /// Writes the report next to `output` and returns the report's path.
    pub fn write_beside(&self, output: &Path) -> Result<PathBuf> {
        let path = Self::path_beside(output);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, self.to_json()?)?;
        Ok(path)
    }
}
