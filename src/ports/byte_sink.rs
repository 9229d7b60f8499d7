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

//! # Byte Sink Port
//!
//! The final stage of the pipeline. A sink accepts bytes until it is either
//! closed (the destination now holds the complete output) or aborted (the
//! destination shows no trace of the run).

use crate::domain::entities::SinkReceipt;
use crate::domain::errors::Result;

/// Implemented by `FileSink` and `RemoteUploadSink`.
///
/// `write` returns only once the sink has accepted the bytes; a slow sink
/// therefore stalls every stage upstream of it.
pub trait ByteSink: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Flushes everything and finalizes the destination.
    fn close(self: Box<Self>) -> Result<SinkReceipt>;

    /// Discards everything written so far.
    fn abort(self: Box<Self>) -> Result<()>;

    /// Bytes currently held in memory by the sink.
    fn buffered_bytes(&self) -> usize;
}
