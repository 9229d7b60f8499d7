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

//! Core error definitions for the paged exporter.
//!
//! Every stage reports failures as an `ExportError`. The pipeline runner
//! wraps them into a `PipelineError` tagged with the stage that failed, so
//! callers always learn *where* a run broke as well as *why*.

use std::fmt;
use thiserror::Error;

/// Error types raised inside a single stage or adapter.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Source query failed: {0}")]
    SourceError(String),

    #[error("Encoding failed: {0}")]
    EncodeError(String),

    #[error("Compression failed: {0}")]
    CompressionError(String),

    #[error("Sink failed: {0}")]
    SinkError(String),

    #[error("Object store error: {0}")]
    ObjectStoreError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Oracle error: {0}")]
    OracleError(String),
}

impl From<oracle::Error> for ExportError {
    fn from(e: oracle::Error) -> Self {
        ExportError::OracleError(e.to_string())
    }
}

/// A specialized Result type for stage and adapter code.
pub type Result<T> = std::result::Result<T, ExportError>;

/// The stages of an export pipeline, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Source,
    Encode,
    Compress,
    Sink,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Source => write!(f, "source"),
            Stage::Encode => write!(f, "encode"),
            Stage::Compress => write!(f, "compress"),
            Stage::Sink => write!(f, "sink"),
        }
    }
}

/// The error a caller receives when a run does not succeed.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("source stage failed: {0}")]
    Source(#[source] ExportError),

    #[error("encode stage failed: {0}")]
    Encode(#[source] ExportError),

    #[error("compress stage failed: {0}")]
    Compression(#[source] ExportError),

    #[error("sink stage failed: {0}")]
    Sink(#[source] ExportError),

    #[error("run cancelled during {0} stage")]
    Cancelled(Stage),

    #[error("invalid run configuration: {0}")]
    InvalidConfig(#[source] ExportError),
}

impl PipelineError {
    /// Wraps a stage-local error with the identity of the stage that raised it.
    pub fn at(stage: Stage, cause: ExportError) -> Self {
        match stage {
            Stage::Source => PipelineError::Source(cause),
            Stage::Encode => PipelineError::Encode(cause),
            Stage::Compress => PipelineError::Compression(cause),
            Stage::Sink => PipelineError::Sink(cause),
        }
    }

    /// The stage the failure originated in, if any stage was running.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Source(_) => Some(Stage::Source),
            PipelineError::Encode(_) => Some(Stage::Encode),
            PipelineError::Compression(_) => Some(Stage::Compress),
            PipelineError::Sink(_) => Some(Stage::Sink),
            PipelineError::Cancelled(stage) => Some(*stage),
            PipelineError::InvalidConfig(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled(_))
    }
}
