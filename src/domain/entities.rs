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

//! # Domain Entities
//!
//! The "nouns" of an export run: field values, records, the batches a source
//! pulls, the cursor that tracks progress, the encoded chunks that flow
//! towards the sink, and the statistics a finished run reports.

use crate::domain::errors::{ExportError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Multipart protocols commonly refuse parts smaller than this (except the last one).
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Upper bound on part numbers in a multipart upload.
pub const MAX_PART_NUMBER: u32 = 10_000;

/// A single scalar field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact numeric kept as text so no precision is lost on the way out.
    Decimal(String),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Rough heap + inline footprint, used for in-flight memory accounting.
    pub fn approx_bytes(&self) -> usize {
        let heap = match self {
            Value::Decimal(s) | Value::Text(s) => s.len(),
            Value::Bytes(b) => b.len(),
            _ => 0,
        };
        std::mem::size_of::<Value>() + heap
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// An ordered mapping of field names to values.
///
/// Field order matters: the first record of a run fixes the column order of
/// the whole export.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Builder-style field append.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn approx_bytes(&self) -> usize {
        self.fields
            .iter()
            .map(|(n, v)| n.len() + v.approx_bytes())
            .sum()
    }
}

/// The records returned by one source pull, in ascending cursor order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    records: Vec<Record>,
}

impl Batch {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn approx_bytes(&self) -> usize {
        self.records.iter().map(Record::approx_bytes).sum()
    }
}

/// Position of the last record consumed from the source.
///
/// A cursor only moves forward; `advance` hands back a new value instead of
/// mutating shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    last_id: Option<i64>,
}

impl Cursor {
    /// A cursor positioned before the first record.
    pub fn start() -> Self {
        Self { last_id: None }
    }

    pub fn last_id(&self) -> Option<i64> {
        self.last_id
    }

    /// True if `id` lies strictly past this cursor.
    pub fn admits(&self, id: i64) -> bool {
        self.last_id.map_or(true, |last| id > last)
    }

    pub fn advance(self, id: i64) -> Result<Cursor> {
        if !self.admits(id) {
            return Err(ExportError::SourceError(format!(
                "cursor went backwards: {} is not past {:?}",
                id, self.last_id
            )));
        }
        Ok(Cursor { last_id: Some(id) })
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last_id {
            Some(id) => write!(f, "{}", id),
            None => write!(f, "<start>"),
        }
    }
}

/// Serialized rows ready for compression. The first chunk of a run also
/// carries the header line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncodedChunk {
    bytes: Vec<u8>,
    rows: usize,
    has_header: bool,
}

impl EncodedChunk {
    pub fn new(bytes: Vec<u8>, rows: usize, has_header: bool) -> Self {
        Self {
            bytes,
            rows,
            has_header,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn has_header(&self) -> bool {
        self.has_header
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Identifies one uploaded part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// What a sink hands back once the destination holds the complete output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkReceipt {
    /// Final path or `bucket/key`.
    pub location: String,
    pub bytes_written: u64,
    /// Number of parts for multipart uploads.
    pub parts: Option<u32>,
}

/// Process memory at a point in time, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemorySnapshot {
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
}

impl MemorySnapshot {
    /// Element-wise maximum, used to track high-water marks.
    pub fn max(self, other: MemorySnapshot) -> MemorySnapshot {
        MemorySnapshot {
            resident_bytes: self.resident_bytes.max(other.resident_bytes),
            virtual_bytes: self.virtual_bytes.max(other.virtual_bytes),
        }
    }
}

/// Memory usage around a run, by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemoryUsage {
    pub before: MemorySnapshot,
    pub peak: MemorySnapshot,
    pub after: MemorySnapshot,
}

/// The "report card" of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStats {
    pub records: u64,
    pub batches: u64,
    /// Bytes of delimited text produced by the encoder.
    pub encoded_bytes: u64,
    /// Bytes handed to the sink (after compression).
    pub sink_bytes: u64,
    /// Wall time in seconds.
    pub duration: f64,
    /// Largest amount of data held by the pipeline at once.
    pub peak_buffered_bytes: u64,
    pub memory: MemoryUsage,
    pub location: String,
}

/// Where the exported bytes end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    File { path: PathBuf },
    Remote { bucket: String, key: String },
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::File { path } => write!(f, "{}", path.display()),
            Destination::Remote { bucket, key } => write!(f, "{}/{}", bucket, key),
        }
    }
}

/// How the source decides the dataset is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationMode {
    /// Stop on the first empty page.
    #[default]
    EmptyPage,
    /// Stop after `ceil(count / page_size)` pages, or earlier on an empty page.
    Count,
}

/// Tuning knobs of a run. Every field has a sensible default.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub id_column: String,
    /// Fixed header; when absent the first record decides the columns.
    pub columns: Option<Vec<String>>,
    pub termination: TerminationMode,
    pub delimiter: u8,
    pub compression_level: u32,
    pub file_block_size: usize,
    pub part_size: usize,
    pub max_concurrent_parts: usize,
    pub max_source_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            id_column: "id".to_string(),
            columns: None,
            termination: TerminationMode::EmptyPage,
            delimiter: b',',
            compression_level: 6,
            file_block_size: 4 * 1024 * 1024,
            part_size: MIN_PART_SIZE,
            max_concurrent_parts: std::cmp::min(4, num_cpus::get()).max(1),
            max_source_retries: 0,
            retry_backoff_ms: 500,
        }
    }
}

/// Everything `run_export` needs to know about one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub page_size: usize,
    pub destination: Destination,
    pub compress: bool,
    pub options: PipelineOptions,
}

impl RunConfig {
    pub fn new(page_size: usize, destination: Destination, compress: bool) -> Self {
        Self {
            page_size,
            destination,
            compress,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Checks the run settings. `min_part_size` comes from the object store
    /// for remote destinations.
    pub fn validate(&self, min_part_size: usize) -> Result<()> {
        let opts = &self.options;
        if self.page_size == 0 {
            return Err(ExportError::ConfigError("page_size must be at least 1".into()));
        }
        if opts.id_column.trim().is_empty() {
            return Err(ExportError::ConfigError("id_column must not be empty".into()));
        }
        if matches!(opts.delimiter, b'"' | b'\n' | b'\r') || !opts.delimiter.is_ascii() {
            return Err(ExportError::ConfigError(format!(
                "delimiter {:?} cannot be used as a field separator",
                opts.delimiter as char
            )));
        }
        if opts.compression_level > 9 {
            return Err(ExportError::ConfigError(format!(
                "compression_level must be 0-9, got {}",
                opts.compression_level
            )));
        }
        if let Some(cols) = &opts.columns {
            if cols.is_empty() {
                return Err(ExportError::ConfigError("columns must not be empty when set".into()));
            }
            if !cols.iter().any(|c| c == &opts.id_column) {
                return Err(ExportError::ConfigError(format!(
                    "columns must include the id column '{}'",
                    opts.id_column
                )));
            }
        }
        match &self.destination {
            Destination::File { path } => {
                if path.as_os_str().is_empty() {
                    return Err(ExportError::ConfigError("file destination needs a path".into()));
                }
                if opts.file_block_size == 0 {
                    return Err(ExportError::ConfigError("file_block_size must be positive".into()));
                }
            }
            Destination::Remote { bucket, key } => {
                if bucket.is_empty() || key.is_empty() {
                    return Err(ExportError::ConfigError(
                        "remote destination needs both bucket and key".into(),
                    ));
                }
                if opts.part_size < min_part_size {
                    return Err(ExportError::ConfigError(format!(
                        "part_size {} is below the store minimum of {}",
                        opts.part_size, min_part_size
                    )));
                }
                if opts.max_concurrent_parts == 0 {
                    return Err(ExportError::ConfigError(
                        "max_concurrent_parts must be at least 1".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}
