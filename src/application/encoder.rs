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

//! # Record Encoder
//!
//! Turns batches of records into delimited text: one header line for the
//! run, then one line per record. Quoting follows RFC 4180 through the `csv`
//! crate, so values containing the delimiter, quotes or line breaks survive
//! the round trip.

use crate::domain::entities::{Batch, EncodedChunk, Record, Value};
use crate::domain::errors::{ExportError, Result};
use base64::{engine::general_purpose, Engine as _};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use std::borrow::Cow;

/// Stateless across batches except for the run's header.
pub struct RecordEncoder {
    delimiter: u8,
    fixed_columns: Option<Vec<String>>,
    header: Option<Vec<String>>,
}

impl RecordEncoder {
    /// An encoder that takes its columns from the first record it sees.
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            fixed_columns: None,
            header: None,
        }
    }

    /// An encoder with a predetermined header. Empty datasets still get the
    /// header line.
    pub fn with_columns(delimiter: u8, columns: Vec<String>) -> Self {
        Self {
            delimiter,
            fixed_columns: Some(columns),
            header: None,
        }
    }

    /// Forgets the header so the next batch starts a new run.
    pub fn reset(&mut self) {
        self.header = None;
    }

    /// The header of the current run, once it has been written.
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Encodes one batch. The first non-empty batch of a run also carries the header.
    pub fn encode(&mut self, batch: &Batch) -> Result<EncodedChunk> {
        let Some(first) = batch.records().first() else {
            return Ok(EncodedChunk::default());
        };

        let mut wtr = self.writer(batch.approx_bytes());

        let wrote_header = self.header.is_none();
        if wrote_header {
            let header = match &self.fixed_columns {
                Some(cols) => cols.clone(),
                None => first.field_names().map(str::to_string).collect(),
            };
            check_unique(&header)?;
            wtr.write_record(&header).map_err(encode_err)?;
            self.header = Some(header);
        }

        let header = self.header.as_deref().unwrap_or_default();
        for record in batch.records() {
            let values = align(header, record)?;
            let fields: Vec<Cow<'_, str>> = values.into_iter().map(render).collect();
            wtr.write_record(fields.iter().map(|f| f.as_bytes()))
                .map_err(encode_err)?;
        }

        let bytes = wtr.into_inner().map_err(|e| encode_err(e.into_error()))?;
        Ok(EncodedChunk::new(bytes, batch.len(), wrote_header))
    }

    /// Called once the source is exhausted. Emits the header for an empty
    /// run when the columns are known up front, and nothing otherwise.
    pub fn finish(&mut self) -> Result<EncodedChunk> {
        match (&self.header, &self.fixed_columns) {
            (None, Some(cols)) => {
                let cols = cols.clone();
                check_unique(&cols)?;
                let mut wtr = self.writer(64);
                wtr.write_record(&cols).map_err(encode_err)?;
                let bytes = wtr.into_inner().map_err(|e| encode_err(e.into_error()))?;
                self.header = Some(cols);
                Ok(EncodedChunk::new(bytes, 0, true))
            }
            _ => Ok(EncodedChunk::default()),
        }
    }

    fn writer(&self, capacity: usize) -> csv::Writer<Vec<u8>> {
        WriterBuilder::new()
            .delimiter(self.delimiter)
            .quote_style(QuoteStyle::Necessary)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::with_capacity(capacity))
    }
}

/// Renders a value the way it appears in the output.
pub fn render(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
        Value::Int(i) => Cow::Owned(i.to_string()),
        Value::Float(f) => Cow::Owned(f.to_string()),
        Value::Decimal(s) | Value::Text(s) => Cow::Borrowed(s.as_str()),
        Value::Date(d) => Cow::Owned(d.format("%Y-%m-%d").to_string()),
        Value::Timestamp(ts) => Cow::Owned(ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
        Value::Bytes(b) => Cow::Owned(general_purpose::STANDARD.encode(b)),
    }
}

/// Returns the record's values in header order, or fails if the field sets differ.
fn align<'a>(header: &[String], record: &'a Record) -> Result<Vec<&'a Value>> {
    if record.len() == header.len() && record.field_names().eq(header.iter().map(String::as_str)) {
        return Ok(record.values().collect());
    }

    let mismatch = || {
        ExportError::EncodeError(format!(
            "column mismatch: expected [{}], got [{}]",
            header.join(", "),
            record.field_names().collect::<Vec<_>>().join(", ")
        ))
    };

    if record.len() != header.len() {
        return Err(mismatch());
    }
    header
        .iter()
        .map(|name| record.get(name).ok_or_else(mismatch))
        .collect()
}

fn check_unique(header: &[String]) -> Result<()> {
    for (i, name) in header.iter().enumerate() {
        if header[..i].contains(name) {
            return Err(ExportError::EncodeError(format!("duplicate column '{}'", name)));
        }
    }
    Ok(())
}

fn encode_err(e: impl std::fmt::Display) -> ExportError {
    ExportError::EncodeError(e.to_string())
}
