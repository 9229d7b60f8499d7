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

//! # Oracle Record Store
//!
//! Serves keyset-paginated pages from one Oracle table. Each page is a
//! single bounded query on a pooled connection, so no cursor or session
//! state lives between pulls and a failed page can simply be asked for
//! again.

use crate::domain::entities::{Record, Value};
use crate::domain::errors::{ExportError, Result};
use crate::domain::mapping::{self, ValueKind};
use crate::infrastructure::oracle::connection_manager::OracleConnectionManager;
use crate::infrastructure::oracle::sql_utils;
use crate::ports::record_store::RecordStore;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::debug;
use oracle::sql_type::{Timestamp, ToSql};
use oracle::{Connection, Row};
use r2d2::Pool;
use std::sync::Arc;

/// Which table to read and how.
#[derive(Debug, Clone)]
pub struct TableSource {
    pub schema: String,
    pub table: String,
    pub id_column: String,
    pub columns: Option<Vec<String>>,
    pub prefetch_rows: u32,
}

pub struct OracleRecordStore {
    pool: Arc<Pool<OracleConnectionManager>>,
    first_page_sql: String,
    next_page_sql: String,
    count_sql: String,
    id_column: String,
    prefetch_rows: u32,
}

impl OracleRecordStore {
    pub fn new(pool: Arc<Pool<OracleConnectionManager>>, source: &TableSource) -> Result<Self> {
        let table = sql_utils::qualified_table(&source.schema, &source.table)?;
        let columns = sql_utils::select_list(source.columns.as_deref())?;
        let id = sql_utils::quote_ident(&source.id_column)?;

        Ok(Self {
            pool,
            first_page_sql: sql_utils::first_page_sql(&table, &columns, &id),
            next_page_sql: sql_utils::next_page_sql(&table, &columns, &id),
            count_sql: sql_utils::count_sql(&table),
            id_column: source.id_column.to_lowercase(),
            prefetch_rows: source.prefetch_rows,
        })
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<OracleConnectionManager>> {
        self.pool.get().map_err(|e| {
            ExportError::SourceError(format!("Failed to get connection from pool: {}", e))
        })
    }

    fn fetch(&self, conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Record>> {
        let mut stmt = conn
            .statement(sql)
            .prefetch_rows(self.prefetch_rows)
            .build()?;
        let rows = stmt.query(params)?;

        // Column names come back upper case; records use lower case.
        let columns: Vec<(String, ValueKind)> = rows
            .column_info()
            .iter()
            .map(|c| (c.name().to_lowercase(), mapping::value_kind(c.oracle_type())))
            .collect();

        let mut records = Vec::new();
        for row in rows {
            let row = row?;
            let mut record = Record::new();
            for (i, (name, kind)) in columns.iter().enumerate() {
                let value = if *name == self.id_column {
                    read_id(&row, i, name)?
                } else {
                    read_value(&row, i, *kind)?
                };
                record.push(name.clone(), value);
            }
            records.push(record);
        }
        Ok(records)
    }
}

impl RecordStore for OracleRecordStore {
    fn query(&self, after: Option<i64>, limit: usize) -> Result<Vec<Record>> {
        let conn = self.get_conn()?;
        let limit = limit as i64;
        let records = match after {
            None => self.fetch(&conn, &self.first_page_sql, &[&limit])?,
            Some(id) => self.fetch(&conn, &self.next_page_sql, &[&id, &limit])?,
        };
        debug!("Fetched {} rows after {:?}", records.len(), after);
        Ok(records)
    }

    fn count(&self) -> Result<Option<u64>> {
        let conn = self.get_conn()?;
        let total = conn.query_row(&self.count_sql, &[])?.get::<usize, u64>(0)?;
        Ok(Some(total))
    }
}

/// Cursor ids are fetched as text so NUMBER columns of any precision work.
fn read_id(row: &Row, i: usize, column: &str) -> Result<Value> {
    match row.get::<usize, Option<String>>(i)? {
        Some(text) => Ok(Value::Int(mapping::cursor_id(column, &text)?)),
        None => Ok(Value::Null),
    }
}

fn read_value(row: &Row, i: usize, kind: ValueKind) -> Result<Value> {
    let value = match kind {
        ValueKind::Int => row.get::<usize, Option<i64>>(i)?.into(),
        ValueKind::Float => row.get::<usize, Option<f64>>(i)?.into(),
        ValueKind::Bool => row.get::<usize, Option<bool>>(i)?.into(),
        ValueKind::Decimal => match row.get::<usize, Option<String>>(i)? {
            Some(s) => Value::Decimal(s),
            None => Value::Null,
        },
        ValueKind::Text => row.get::<usize, Option<String>>(i)?.into(),
        ValueKind::Bytes => row.get::<usize, Option<Vec<u8>>>(i)?.into(),
        ValueKind::Timestamp => match row.get::<usize, Option<Timestamp>>(i)? {
            Some(ts) => Value::Timestamp(naive_datetime(&ts)?),
            None => Value::Null,
        },
        ValueKind::TimestampUtc => match row.get::<usize, Option<Timestamp>>(i)? {
            Some(ts) => Value::Timestamp(
                naive_datetime(&ts)? - Duration::seconds(i64::from(ts.tz_offset())),
            ),
            None => Value::Null,
        },
    };
    Ok(value)
}

/// Wall-clock fields of an Oracle timestamp, to microsecond precision.
fn naive_datetime(ts: &Timestamp) -> Result<NaiveDateTime> {
    NaiveDate::from_ymd_opt(ts.year(), ts.month(), ts.day())
        .and_then(|d| d.and_hms_micro_opt(ts.hour(), ts.minute(), ts.second(), ts.nanosecond() / 1000))
        .ok_or_else(|| ExportError::SourceError(format!("timestamp out of range: {}", ts)))
}
