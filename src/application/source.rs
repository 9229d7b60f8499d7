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

//! # Paged Source
//!
//! Pulls a table one bounded page at a time using keyset pagination: every
//! query asks for rows whose identifier is strictly greater than the last
//! identifier seen. Unlike OFFSET paging this stays correct (and cheap) when
//! rows are inserted while the export runs.

use crate::domain::entities::{Batch, Cursor, Record, TerminationMode, Value};
use crate::domain::errors::{ExportError, Result};
use crate::ports::record_store::RecordStore;
use log::{debug, info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Open,
    Exhausted,
    Closed,
}

/// A cursor-driven reader over a `RecordStore`.
///
/// Holds no rows itself: each `next()` returns the freshly pulled batch and
/// keeps only the advanced cursor.
pub struct PagedSource {
    store: Arc<dyn RecordStore>,
    page_size: usize,
    id_column: String,
    cursor: Cursor,
    pages_read: u64,
    /// Page budget derived from `count()` in count termination mode.
    page_limit: Option<u64>,
    state: SourceState,
}

impl PagedSource {
    /// Opens a source. In `Count` mode this samples the row count once.
    pub fn open(
        store: Arc<dyn RecordStore>,
        page_size: usize,
        id_column: &str,
        termination: TerminationMode,
    ) -> Result<Self> {
        if page_size == 0 {
            return Err(ExportError::ConfigError("page_size must be at least 1".into()));
        }

        let page_limit = match termination {
            TerminationMode::EmptyPage => None,
            TerminationMode::Count => match store.count()? {
                Some(total) => {
                    let pages = total.div_ceil(page_size as u64);
                    info!(
                        "Source holds {} records, expecting {} pages of {}",
                        total, pages, page_size
                    );
                    Some(pages)
                }
                None => {
                    warn!("Record store cannot count rows; falling back to empty-page termination");
                    None
                }
            },
        };

        Ok(Self {
            store,
            page_size,
            id_column: id_column.to_string(),
            cursor: Cursor::start(),
            pages_read: 0,
            page_limit,
            state: SourceState::Open,
        })
    }

    /// Pulls the next page. `Ok(None)` marks the end of the stream.
    ///
    /// A failed pull leaves the cursor where it was, so the same page can be
    /// requested again.
    pub fn next(&mut self) -> Result<Option<Batch>> {
        if self.state != SourceState::Open {
            return Ok(None);
        }

        if let Some(limit) = self.page_limit {
            if self.pages_read >= limit {
                debug!("Page budget of {} reached", limit);
                self.state = SourceState::Exhausted;
                return Ok(None);
            }
        }

        let records = self.store.query(self.cursor.last_id(), self.page_size)?;

        if records.is_empty() {
            debug!(
                "Empty page after cursor {} ({} pages read)",
                self.cursor, self.pages_read
            );
            self.state = SourceState::Exhausted;
            return Ok(None);
        }

        if records.len() > self.page_size {
            return Err(ExportError::SourceError(format!(
                "store returned {} records for a page of {}",
                records.len(),
                self.page_size
            )));
        }

        let mut cursor = self.cursor;
        for record in &records {
            cursor = cursor.advance(self.record_id(record)?)?;
        }

        self.cursor = cursor;
        self.pages_read += 1;
        debug!(
            "Read page {} ({} records, cursor now {})",
            self.pages_read,
            records.len(),
            self.cursor
        );

        Ok(Some(Batch::new(records)))
    }

    /// Stops the stream. Later calls to `next()` return `Ok(None)`.
    pub fn close(&mut self) {
        if self.state != SourceState::Closed {
            debug!("Closing source at cursor {}", self.cursor);
            self.state = SourceState::Closed;
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn pages_read(&self) -> u64 {
        self.pages_read
    }

    fn record_id(&self, record: &Record) -> Result<i64> {
        match record.get(&self.id_column) {
            Some(Value::Int(id)) => Ok(*id),
            Some(other) => Err(ExportError::SourceError(format!(
                "cursor column '{}' must hold integers, found {:?}",
                self.id_column, other
            ))),
            None => Err(ExportError::SourceError(format!(
                "record is missing cursor column '{}'",
                self.id_column
            ))),
        }
    }
}
