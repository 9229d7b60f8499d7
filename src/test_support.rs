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

//! In-memory port implementations shared by the unit tests.

use crate::application::cancellation::CancellationToken;
use crate::domain::entities::{CompletedPart, Record, SinkReceipt, Value};
use crate::domain::errors::{ExportError, Result};
use crate::ports::byte_sink::ByteSink;
use crate::ports::object_store::ObjectStore;
use crate::ports::record_store::RecordStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// A table held in a `Vec`, paged by its `id` column.
pub struct MemoryRecordStore {
    records: Vec<Record>,
    count: Option<u64>,
    queries: Mutex<Vec<(Option<i64>, usize)>>,
    fail_next: AtomicUsize,
    fail_from: Option<usize>,
    cancel_on: Option<(usize, CancellationToken)>,
}

impl MemoryRecordStore {
    pub fn from_records(records: Vec<Record>) -> Self {
        Self {
            count: Some(records.len() as u64),
            records,
            queries: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
            fail_from: None,
            cancel_on: None,
        }
    }

    /// One `id,title` record per id.
    pub fn with_ids(ids: impl IntoIterator<Item = i64>) -> Self {
        Self::from_records(
            ids.into_iter()
                .map(|id| Record::new().with("id", id).with("title", format!("Book {}", id)))
                .collect(),
        )
    }

    pub fn reporting_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn without_count(mut self) -> Self {
        self.count = None;
        self
    }

    /// Every query from the `n`th (1-based) onwards fails.
    pub fn failing_from_query(mut self, n: usize) -> Self {
        self.fail_from = Some(n);
        self
    }

    /// Cancels `token` while serving the `n`th query.
    pub fn cancelling_on_query(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_on = Some((n, token));
        self
    }

    pub fn fail_next_queries(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn queries(&self) -> Vec<(Option<i64>, usize)> {
        self.queries.lock().unwrap().clone()
    }
}

impl RecordStore for MemoryRecordStore {
    fn query(&self, after: Option<i64>, limit: usize) -> Result<Vec<Record>> {
        let served = {
            let mut queries = self.queries.lock().unwrap();
            queries.push((after, limit));
            queries.len()
        };
        if let Some((n, token)) = &self.cancel_on {
            if served == *n {
                token.cancel();
            }
        }
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(ExportError::SourceError("connection reset".into()));
        }
        if self.fail_from.is_some_and(|n| served >= n) {
            return Err(ExportError::SourceError("connection reset".into()));
        }

        Ok(self
            .records
            .iter()
            .filter(|r| match (after, r.get("id")) {
                (Some(after), Some(Value::Int(id))) => *id > after,
                _ => true,
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn count(&self) -> Result<Option<u64>> {
        Ok(self.count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectCall {
    Initiate(String),
    UploadPart(u32, usize),
    Complete(Vec<u32>),
    Abort(String),
}

#[derive(Default)]
struct Upload {
    bucket: String,
    key: String,
    parts: BTreeMap<u32, Vec<u8>>,
}

/// An object store that keeps everything in memory and logs each call.
pub struct RecordingObjectStore {
    min_part_size: usize,
    part_delay: Option<Duration>,
    failing_part: Mutex<Option<u32>>,
    failing_complete: AtomicBool,
    uploads: Mutex<HashMap<String, Upload>>,
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    calls: Mutex<Vec<ObjectCall>>,
    next_id: AtomicUsize,
}

impl RecordingObjectStore {
    pub fn new(min_part_size: usize) -> Self {
        Self {
            min_part_size,
            part_delay: None,
            failing_part: Mutex::new(None),
            failing_complete: AtomicBool::new(false),
            uploads: Mutex::new(HashMap::new()),
            objects: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = Some(delay);
        self
    }

    pub fn fail_part(&self, part_number: u32) {
        *self.failing_part.lock().unwrap() = Some(part_number);
    }

    pub fn fail_complete(&self) {
        self.failing_complete.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ObjectCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Part numbers and sizes in the order uploads were received.
    pub fn part_sizes(&self) -> Vec<(u32, usize)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ObjectCall::UploadPart(n, size) => Some((n, size)),
                _ => None,
            })
            .collect()
    }

    pub fn completed_part_numbers(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .find_map(|c| match c {
                ObjectCall::Complete(parts) => Some(parts),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn was_aborted(&self) -> bool {
        self.calls().iter().any(|c| matches!(c, ObjectCall::Abort(_)))
    }

    /// Uploads that were initiated but neither completed nor aborted.
    pub fn open_uploads(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    fn record(&self, call: ObjectCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ObjectStore for RecordingObjectStore {
    fn initiate_multipart_upload(&self, bucket: &str, key: &str) -> Result<String> {
        let id = format!("upload-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.uploads.lock().unwrap().insert(
            id.clone(),
            Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                ..Upload::default()
            },
        );
        self.record(ObjectCall::Initiate(id.clone()));
        Ok(id)
    }

    fn upload_part(&self, upload_id: &str, part_number: u32, bytes: &[u8]) -> Result<String> {
        if let Some(delay) = self.part_delay {
            thread::sleep(delay);
        }
        self.record(ObjectCall::UploadPart(part_number, bytes.len()));
        if *self.failing_part.lock().unwrap() == Some(part_number) {
            return Err(ExportError::ObjectStoreError(format!("part {} rejected", part_number)));
        }
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| ExportError::ObjectStoreError(format!("no upload {}", upload_id)))?;
        upload.parts.insert(part_number, bytes.to_vec());
        Ok(format!("etag-{}", part_number))
    }

    fn complete_multipart_upload(&self, upload_id: &str, parts: &[CompletedPart]) -> Result<()> {
        self.record(ObjectCall::Complete(parts.iter().map(|p| p.part_number).collect()));
        if self.failing_complete.load(Ordering::SeqCst) {
            return Err(ExportError::ObjectStoreError("complete rejected".into()));
        }
        let upload = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| ExportError::ObjectStoreError(format!("no upload {}", upload_id)))?;
        let mut body = Vec::new();
        for part in parts {
            let bytes = upload.parts.get(&part.part_number).ok_or_else(|| {
                ExportError::ObjectStoreError(format!("part {} missing", part.part_number))
            })?;
            body.extend_from_slice(bytes);
        }
        self.objects
            .lock()
            .unwrap()
            .insert((upload.bucket, upload.key), body);
        Ok(())
    }

    fn abort_multipart_upload(&self, upload_id: &str) -> Result<()> {
        self.record(ObjectCall::Abort(upload_id.to_string()));
        self.uploads.lock().unwrap().remove(upload_id);
        Ok(())
    }

    fn min_part_size(&self) -> usize {
        self.min_part_size
    }
}

/// A sink that keeps bytes in a shared buffer and can be told to fail.
pub struct MemorySink {
    shared: Arc<MemorySinkState>,
}

#[derive(Default)]
pub struct MemorySinkState {
    pub bytes: Mutex<Vec<u8>>,
    pub closed: AtomicBool,
    pub aborted: AtomicBool,
    fail_on_write: Mutex<Option<usize>>,
    writes: AtomicUsize,
    write_delay: Mutex<Option<Duration>>,
}

impl MemorySinkState {
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl MemorySink {
    pub fn new() -> (Self, Arc<MemorySinkState>) {
        let shared = Arc::new(MemorySinkState::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            shared,
        )
    }

    /// The `n`th write (1-based) and every later one fails.
    pub fn failing_on_write(self, n: usize) -> Self {
        *self.shared.fail_on_write.lock().unwrap() = Some(n);
        self
    }

    pub fn with_write_delay(self, delay: Duration) -> Self {
        *self.shared.write_delay.lock().unwrap() = Some(delay);
        self
    }
}

impl ByteSink for MemorySink {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let n = self.shared.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = *self.shared.write_delay.lock().unwrap() {
            thread::sleep(delay);
        }
        if self.shared.fail_on_write.lock().unwrap().is_some_and(|f| n >= f) {
            return Err(ExportError::SinkError("disk full".into()));
        }
        self.shared.bytes.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<SinkReceipt> {
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(SinkReceipt {
            location: "memory".to_string(),
            bytes_written: self.shared.bytes.lock().unwrap().len() as u64,
            parts: None,
        })
    }

    fn abort(self: Box<Self>) -> Result<()> {
        self.shared.aborted.store(true, Ordering::SeqCst);
        self.shared.bytes.lock().unwrap().clear();
        Ok(())
    }

    fn buffered_bytes(&self) -> usize {
        0
    }
}
