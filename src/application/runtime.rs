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

//! # Runtime Context
//!
//! Sets up the resources that live for the whole process: the Oracle
//! connection pool the record store draws from.

use crate::config::AppConfig;
use crate::domain::errors::{ExportError, Result};
use crate::infrastructure::oracle::connection_manager::OracleConnectionManager;
use log::info;
use r2d2::Pool;
use std::sync::Arc;
use std::time::Duration;

/// One page query runs at a time; the spare connection serves the count
/// query and replaces a session the server dropped.
const DEFAULT_POOL_SIZE: u32 = 2;

pub struct RuntimeContext {
    pub pool: Arc<Pool<OracleConnectionManager>>,
}

impl RuntimeContext {
    /// Builds the connection pool. Fails fast if the database is unreachable.
    pub fn init(config: &AppConfig) -> Result<Self> {
        let conn_str = config.database.get_connection_string();
        let password = config.database.resolve_password();
        let pool_size = config.database.pool_size.unwrap_or(DEFAULT_POOL_SIZE);

        info!(
            "Initializing connection pool for {} ({} connections)...",
            conn_str, pool_size
        );

        let manager = OracleConnectionManager::new(&config.database.username, &password, &conn_str);
        let pool = Pool::builder()
            .max_size(pool_size)
            .min_idle(Some(1))
            .connection_timeout(Duration::from_secs(30))
            .test_on_check_out(false)
            .build(manager)
            .map_err(|e| {
                ExportError::OracleError(format!("Failed to create connection pool: {}", e))
            })?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}
