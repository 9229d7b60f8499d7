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

//! Infrastructure adapter that streams the export into a multipart upload.
//!
//! Incoming bytes are cut into parts of exactly `part_size` bytes. Each full
//! part is handed to a small pool of uploader threads over a rendezvous
//! channel: when every uploader is busy the hand-off blocks, and that stall
//! is what pushes back on the compressor, the encoder and the source.

use crate::domain::entities::{CompletedPart, SinkReceipt, MAX_PART_NUMBER};
use crate::domain::errors::{ExportError, Result};
use crate::ports::byte_sink::ByteSink;
use crate::ports::object_store::ObjectStore;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct PartJob {
    part_number: u32,
    bytes: Vec<u8>,
}

type PartOutcome = (u32, Result<String>);

/// A fixed pool of threads uploading parts of one upload.
struct PartUploader {
    jobs: Option<Sender<PartJob>>,
    outcomes: Receiver<PartOutcome>,
    workers: Vec<JoinHandle<()>>,
    completed: Vec<CompletedPart>,
    in_flight: usize,
    failure: Option<ExportError>,
}

impl PartUploader {
    fn spawn(store: Arc<dyn ObjectStore>, upload_id: &str, workers: usize) -> Result<Self> {
        let (job_tx, job_rx) = bounded::<PartJob>(0);
        let (outcome_tx, outcome_rx) = unbounded::<PartOutcome>();

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let jobs = job_rx.clone();
            let outcomes = outcome_tx.clone();
            let store = Arc::clone(&store);
            let upload_id = upload_id.to_string();
            let handle = thread::Builder::new()
                .name(format!("part-upload-{}", i))
                .spawn(move || {
                    for job in jobs {
                        let res = store.upload_part(&upload_id, job.part_number, &job.bytes);
                        if outcomes.send((job.part_number, res)).is_err() {
                            break;
                        }
                    }
                })?;
            handles.push(handle);
        }

        Ok(Self {
            jobs: Some(job_tx),
            outcomes: outcome_rx,
            workers: handles,
            completed: Vec::new(),
            in_flight: 0,
            failure: None,
        })
    }

    /// Blocks until an uploader picks the part up.
    fn submit(&mut self, part_number: u32, bytes: Vec<u8>) -> Result<()> {
        self.collect();
        if let Some(e) = self.failure.take() {
            return Err(e);
        }
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| ExportError::SinkError("uploader already shut down".into()))?;
        jobs.send(PartJob { part_number, bytes })
            .map_err(|_| ExportError::SinkError("all part uploaders have stopped".into()))?;
        self.in_flight += 1;
        Ok(())
    }

    /// Folds finished uploads into `completed`, keeping the first failure.
    fn collect(&mut self) {
        for (part_number, res) in self.outcomes.try_iter() {
            self.in_flight = self.in_flight.saturating_sub(1);
            match res {
                Ok(etag) => {
                    debug!("Part {} stored (etag {})", part_number, etag);
                    self.completed.push(CompletedPart { part_number, etag });
                }
                Err(e) => {
                    error!("Part {} failed: {}", part_number, e);
                    if self.failure.is_none() {
                        self.failure = Some(ExportError::SinkError(format!(
                            "upload of part {} failed: {}",
                            part_number, e
                        )));
                    }
                }
            }
        }
    }

    /// Stops accepting parts and waits for those in flight.
    fn shutdown(&mut self) -> Result<Vec<CompletedPart>> {
        self.jobs.take();
        let mut panicked = false;
        for handle in self.workers.drain(..) {
            panicked |= handle.join().is_err();
        }
        self.collect();
        if let Some(e) = self.failure.take() {
            return Err(e);
        }
        if panicked {
            return Err(ExportError::SinkError("a part uploader panicked".into()));
        }
        let mut parts = std::mem::take(&mut self.completed);
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }
}

/// Concrete implementation of `ByteSink` for multipart object storage.
pub struct RemoteUploadSink {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    upload_id: String,
    part_size: usize,
    buffer: Vec<u8>,
    next_part: u32,
    bytes_written: u64,
    uploader: PartUploader,
    /// Set once the upload was completed or aborted.
    settled: bool,
}

impl RemoteUploadSink {
    /// Initiates the multipart upload of `bucket/key`.
    pub fn open(
        store: Arc<dyn ObjectStore>,
        bucket: &str,
        key: &str,
        part_size: usize,
        max_concurrent_parts: usize,
    ) -> Result<Self> {
        if part_size < store.min_part_size() {
            return Err(ExportError::ConfigError(format!(
                "part_size {} is below the store minimum of {}",
                part_size,
                store.min_part_size()
            )));
        }

        let upload_id = store.initiate_multipart_upload(bucket, key)?;
        info!(
            "Started multipart upload {} for {}/{} ({} byte parts, {} in flight)",
            upload_id, bucket, key, part_size, max_concurrent_parts
        );

        let uploader = match PartUploader::spawn(
            Arc::clone(&store),
            &upload_id,
            max_concurrent_parts.max(1),
        ) {
            Ok(u) => u,
            Err(e) => {
                if let Err(abort_err) = store.abort_multipart_upload(&upload_id) {
                    warn!("Abort of {} failed: {}", upload_id, abort_err);
                }
                return Err(e);
            }
        };

        Ok(Self {
            store,
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
            part_size,
            buffer: Vec::with_capacity(part_size),
            next_part: 1,
            bytes_written: 0,
            uploader,
            settled: false,
        })
    }

    fn send_part(&mut self, bytes: Vec<u8>) -> Result<()> {
        if self.next_part > MAX_PART_NUMBER {
            return Err(ExportError::SinkError(format!(
                "upload needs more than {} parts; raise part_size",
                MAX_PART_NUMBER
            )));
        }
        let part_number = self.next_part;
        self.next_part += 1;
        debug!("Submitting part {} ({} bytes)", part_number, bytes.len());
        self.uploader.submit(part_number, bytes)
    }

    fn complete(&mut self) -> Result<SinkReceipt> {
        // An empty export still needs one (empty) part.
        if !self.buffer.is_empty() || self.next_part == 1 {
            let last = std::mem::take(&mut self.buffer);
            self.send_part(last)?;
        }

        let parts = self.uploader.shutdown()?;
        let expected = (self.next_part - 1) as usize;
        if parts.len() != expected {
            return Err(ExportError::SinkError(format!(
                "expected {} uploaded parts, found {}",
                expected,
                parts.len()
            )));
        }

        self.store
            .complete_multipart_upload(&self.upload_id, &parts)
            .map_err(|e| ExportError::SinkError(format!("complete failed: {}", e)))?;
        self.settled = true;

        info!(
            "Completed upload {} to {}/{} ({} parts, {} bytes)",
            self.upload_id,
            self.bucket,
            self.key,
            parts.len(),
            self.bytes_written
        );
        Ok(SinkReceipt {
            location: format!("{}/{}", self.bucket, self.key),
            bytes_written: self.bytes_written,
            parts: Some(parts.len() as u32),
        })
    }

    fn abort_upload(&mut self) -> Result<()> {
        if self.settled {
            return Ok(());
        }
        self.settled = true;
        // Parts still in flight must land before the abort, or they would
        // outlive it.
        if let Err(e) = self.uploader.shutdown() {
            debug!("Ignoring uploader error during abort: {}", e);
        }
        warn!("Aborting multipart upload {}", self.upload_id);
        self.store
            .abort_multipart_upload(&self.upload_id)
            .map_err(|e| ExportError::SinkError(format!("abort failed: {}", e)))
    }
}

impl ByteSink for RemoteUploadSink {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.settled {
            return Err(ExportError::SinkError("write to finished upload".into()));
        }
        self.buffer.extend_from_slice(bytes);
        self.bytes_written += bytes.len() as u64;

        while self.buffer.len() >= self.part_size {
            let part: Vec<u8> = self.buffer.drain(..self.part_size).collect();
            self.send_part(part)?;
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<SinkReceipt> {
        match self.complete() {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                if let Err(abort_err) = self.abort_upload() {
                    error!("{}", abort_err);
                }
                Err(e)
            }
        }
    }

    fn abort(mut self: Box<Self>) -> Result<()> {
        self.abort_upload()
    }

    fn buffered_bytes(&self) -> usize {
        self.buffer.len() + self.uploader.in_flight * self.part_size
    }
}

impl Drop for RemoteUploadSink {
    fn drop(&mut self) {
        if !self.settled {
            if let Err(e) = self.abort_upload() {
                error!("{}", e);
            }
        }
    }
}
