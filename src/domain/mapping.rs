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

//! # Type Mapping Logic
//!
//! Decides how each Oracle column type is read into a `Value`. Exact numbers
//! that fit in 64 bits become integers; every other NUMBER keeps its decimal
//! text so no precision is lost on the way to the output. The cursor column
//! is the exception: it is always read as an `i64`.

use crate::domain::errors::{ExportError, Result};
use oracle::sql_type::OracleType;

/// The `Value` variant a column is read into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Decimal,
    Float,
    Bool,
    Text,
    /// DATE and TIMESTAMP (Oracle DATE carries a time of day).
    Timestamp,
    /// Zoned timestamps, normalized to UTC.
    TimestampUtc,
    Bytes,
}

/// Picks the `ValueKind` for a column.
pub fn value_kind(oracle_type: &OracleType) -> ValueKind {
    match oracle_type {
        OracleType::Number(prec, scale) => number_kind(*prec, *scale),
        OracleType::Int64 => ValueKind::Int,
        OracleType::Float(_) | OracleType::BinaryFloat | OracleType::BinaryDouble => {
            ValueKind::Float
        }
        OracleType::Boolean => ValueKind::Bool,
        OracleType::Date | OracleType::Timestamp(_) => ValueKind::Timestamp,
        OracleType::TimestampTZ(_) | OracleType::TimestampLTZ(_) => ValueKind::TimestampUtc,
        OracleType::Raw(_) | OracleType::BLOB | OracleType::LongRaw => ValueKind::Bytes,
        _ => ValueKind::Text,
    }
}

/// Parses the text of a cursor column value. Any NUMBER precision is
/// accepted as long as the value is a whole number within `i64`.
pub fn cursor_id(column: &str, text: &str) -> Result<i64> {
    let trimmed = text.trim();
    trimmed.parse::<i64>().map_err(|_| {
        ExportError::SourceError(format!(
            "cursor column '{}' value {} is not an integer that fits in 64 bits",
            column, trimmed
        ))
    })
}

fn number_kind(prec: u8, scale: i8) -> ValueKind {
    match (prec, scale) {
        // Bare NUMBER: arbitrary precision.
        (0, -127) => ValueKind::Decimal,
        // FLOAT(p) is reported as NUMBER(p, -127).
        (_, -127) => ValueKind::Float,
        (1..=18, 0) => ValueKind::Int,
        _ => ValueKind::Decimal,
    }
}
