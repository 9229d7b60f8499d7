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

//! # Pipeline Runner
//!
//! Drives records from a `PagedSource` through the encoder and compressor
//! into a `ByteSink`, one page at a time.
//!
//! The source and the sink do blocking I/O, so each lives on its own
//! `StageWorker` thread. The runner itself never holds more than one page:
//! it asks for the next page only after the sink has accepted every byte
//! produced from the current one. A slow sink therefore stalls the source
//! instead of letting data pile up in between.
//!
//! Every run ends in exactly one terminal state, and only after each stage
//! that was opened has been finalized (success) or aborted (failure or
//! cancellation) in reverse order: sink, compressor, source.

use crate::application::cancellation::CancellationToken;
use crate::application::compression::CompressionStage;
use crate::application::encoder::RecordEncoder;
use crate::application::source::PagedSource;
use crate::application::stage_worker::{CallError, StageWorker};
use crate::domain::entities::{Batch, MemorySnapshot, MemoryUsage, RunStats, SinkReceipt};
use crate::domain::errors::{ExportError, PipelineError, Result, Stage};
use crate::ports::byte_sink::ByteSink;
use crate::ports::usage_port::{NoopUsageReporter, UsageReporter};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

enum SourceRequest {
    Next,
    Close,
}

enum SourceReply {
    Page(Result<Option<Batch>>),
    Closed,
}

enum SinkRequest {
    Write(Vec<u8>),
    Close,
    Abort,
}

enum SinkReply {
    /// Carries the bytes the sink still holds after the write.
    Written(Result<usize>),
    Closed(Result<SinkReceipt>),
    Aborted(Result<()>),
}

type SourceWorker = StageWorker<SourceRequest, SourceReply>;
type SinkWorker = StageWorker<SinkRequest, SinkReply>;

/// Lifecycle of a pipeline. The last three states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Default)]
struct Tally {
    records: u64,
    batches: u64,
    encoded_bytes: u64,
    sink_bytes: u64,
    peak_buffered: usize,
    peak_memory: MemorySnapshot,
}

/// A single-use chain of source, encoder, compressor and sink.
pub struct ExportPipeline {
    source: Option<PagedSource>,
    encoder: RecordEncoder,
    compressor: Option<CompressionStage>,
    sink: Option<Box<dyn ByteSink>>,
    reporter: Arc<dyn UsageReporter>,
    source_retries: u32,
    retry_backoff: Duration,
    state: PipelineState,
}

impl ExportPipeline {
    pub fn new(
        source: PagedSource,
        encoder: RecordEncoder,
        compressor: CompressionStage,
        sink: Box<dyn ByteSink>,
    ) -> Self {
        Self {
            source: Some(source),
            encoder,
            compressor: Some(compressor),
            sink: Some(sink),
            reporter: Arc::new(NoopUsageReporter),
            source_retries: 0,
            retry_backoff: Duration::from_millis(500),
            state: PipelineState::Idle,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn UsageReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Re-issues a failed page request up to `retries` times, waiting
    /// `backoff * attempt` in between. The cursor is unchanged by a failed
    /// pull, so a retry asks for the same page.
    pub fn with_source_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.source_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Runs the pipeline to completion, failure or cancellation.
    pub fn run(&mut self, cancel: &CancellationToken) -> std::result::Result<RunStats, PipelineError> {
        let (Some(source), Some(compressor), Some(sink)) =
            (self.source.take(), self.compressor.take(), self.sink.take())
        else {
            return Err(PipelineError::InvalidConfig(ExportError::ConfigError(
                "pipeline has already run".into(),
            )));
        };

        self.state = PipelineState::Running;
        let started = Instant::now();
        let before = self.reporter.snapshot();
        let mut tally = Tally {
            peak_memory: before,
            ..Tally::default()
        };
        self.encoder.reset();
        info!("Starting export pipeline...");

        let source_worker = match spawn_source(source) {
            Ok(worker) => worker,
            Err(e) => {
                if let Err(abort_err) = sink.abort() {
                    error!("Sink abort failed: {}", abort_err);
                }
                self.state = PipelineState::Failed;
                return Err(PipelineError::at(Stage::Source, e.into()));
            }
        };
        // A sink that never reached its thread is dropped here, and dropping
        // an unfinished sink discards its output.
        let sink_worker = match spawn_sink(sink) {
            Ok(worker) => worker,
            Err(e) => {
                close_source(source_worker);
                self.state = PipelineState::Failed;
                return Err(PipelineError::at(Stage::Sink, e.into()));
            }
        };

        let mut compressor = compressor;
        let outcome = match self.drive(&source_worker, &sink_worker, &mut compressor, cancel, &mut tally)
        {
            Ok(()) => close_sink(sink_worker),
            Err(e) => {
                abort_sink(sink_worker);
                Err(e)
            }
        };
        drop(compressor);
        close_source(source_worker);

        let after = self.reporter.snapshot();
        let duration = started.elapsed().as_secs_f64();

        match outcome {
            Ok(receipt) => {
                self.state = PipelineState::Succeeded;
                let stats = RunStats {
                    records: tally.records,
                    batches: tally.batches,
                    encoded_bytes: tally.encoded_bytes,
                    sink_bytes: tally.sink_bytes,
                    duration,
                    peak_buffered_bytes: tally.peak_buffered as u64,
                    memory: MemoryUsage {
                        before,
                        peak: tally.peak_memory.max(after),
                        after,
                    },
                    location: receipt.location,
                };
                info!(
                    "Export finished: {} records in {} batches, {} bytes to {} in {:.2}s",
                    stats.records, stats.batches, stats.sink_bytes, stats.location, duration
                );
                Ok(stats)
            }
            Err(e) => {
                if e.is_cancelled() {
                    self.state = PipelineState::Cancelled;
                    warn!("Export cancelled after {} records: {}", tally.records, e);
                } else {
                    self.state = PipelineState::Failed;
                    error!("Export failed after {} records: {}", tally.records, e);
                }
                Err(e)
            }
        }
    }

    fn drive(
        &mut self,
        source: &SourceWorker,
        sink: &SinkWorker,
        compressor: &mut CompressionStage,
        cancel: &CancellationToken,
        tally: &mut Tally,
    ) -> std::result::Result<(), PipelineError> {
        while let Some(batch) = self.pull(source, cancel)? {
            tally.batches += 1;
            tally.records += batch.len() as u64;
            let batch_bytes = batch.approx_bytes();

            let chunk = self
                .encoder
                .encode(&batch)
                .map_err(|e| PipelineError::at(Stage::Encode, e))?;
            drop(batch);
            let chunk_bytes = chunk.len();
            tally.encoded_bytes += chunk_bytes as u64;

            let out = compressor
                .write(chunk.into_bytes())
                .map_err(|e| PipelineError::at(Stage::Compress, e))?;
            let held = batch_bytes + chunk_bytes + out.len();
            let sink_held = push(sink, out, cancel, tally)?;

            tally.peak_buffered = tally.peak_buffered.max(held + sink_held);
            tally.peak_memory = tally.peak_memory.max(self.reporter.snapshot());
            debug!(
                "Batch {} done ({} records so far, {} bytes buffered)",
                tally.batches,
                tally.records,
                held + sink_held
            );
        }

        let tail = self
            .encoder
            .finish()
            .map_err(|e| PipelineError::at(Stage::Encode, e))?;
        tally.encoded_bytes += tail.len() as u64;
        let mut out = compressor
            .write(tail.into_bytes())
            .map_err(|e| PipelineError::at(Stage::Compress, e))?;
        out.extend(
            compressor
                .finish()
                .map_err(|e| PipelineError::at(Stage::Compress, e))?,
        );
        push(sink, out, cancel, tally)?;
        Ok(())
    }

    fn pull(
        &self,
        source: &SourceWorker,
        cancel: &CancellationToken,
    ) -> std::result::Result<Option<Batch>, PipelineError> {
        let mut attempt = 0;
        loop {
            match source.call(SourceRequest::Next, cancel) {
                Ok(SourceReply::Page(Ok(page))) => return Ok(page),
                Ok(SourceReply::Page(Err(e))) if attempt < self.source_retries => {
                    attempt += 1;
                    let wait = self.retry_backoff * attempt;
                    warn!(
                        "Source pull failed ({}), retry {}/{} in {:?}",
                        e, attempt, self.source_retries, wait
                    );
                    if cancel.wait_timeout(wait) {
                        return Err(PipelineError::Cancelled(Stage::Source));
                    }
                }
                Ok(SourceReply::Page(Err(e))) => return Err(PipelineError::at(Stage::Source, e)),
                Ok(SourceReply::Closed) => {
                    return Err(PipelineError::at(
                        Stage::Source,
                        ExportError::SourceError("source closed mid-run".into()),
                    ))
                }
                Err(CallError::Cancelled) => return Err(PipelineError::Cancelled(Stage::Source)),
                Err(CallError::Disconnected) => {
                    return Err(PipelineError::at(
                        Stage::Source,
                        ExportError::SourceError("source worker stopped".into()),
                    ))
                }
            }
        }
    }
}

/// Hands `bytes` to the sink and waits until it has taken them.
fn push(
    sink: &SinkWorker,
    bytes: Vec<u8>,
    cancel: &CancellationToken,
    tally: &mut Tally,
) -> std::result::Result<usize, PipelineError> {
    if bytes.is_empty() {
        return Ok(0);
    }
    let len = bytes.len() as u64;
    match sink.call(SinkRequest::Write(bytes), cancel) {
        Ok(SinkReply::Written(Ok(buffered))) => {
            tally.sink_bytes += len;
            Ok(buffered)
        }
        Ok(SinkReply::Written(Err(e))) => Err(PipelineError::at(Stage::Sink, e)),
        Ok(_) => Err(PipelineError::at(
            Stage::Sink,
            ExportError::SinkError("unexpected reply to write".into()),
        )),
        Err(CallError::Cancelled) => Err(PipelineError::Cancelled(Stage::Sink)),
        Err(CallError::Disconnected) => Err(PipelineError::at(
            Stage::Sink,
            ExportError::SinkError("sink worker stopped".into()),
        )),
    }
}

fn spawn_source(mut source: PagedSource) -> io::Result<SourceWorker> {
    StageWorker::spawn("export-source", move |req| match req {
        SourceRequest::Next => SourceReply::Page(source.next()),
        SourceRequest::Close => {
            source.close();
            SourceReply::Closed
        }
    })
}

fn spawn_sink(sink: Box<dyn ByteSink>) -> io::Result<SinkWorker> {
    let mut sink = Some(sink);
    StageWorker::spawn("export-sink", move |req| match req {
        SinkRequest::Write(bytes) => SinkReply::Written(match sink.as_mut() {
            Some(s) => s.write(&bytes).map(|()| s.buffered_bytes()),
            None => Err(ExportError::SinkError("write after sink was finalized".into())),
        }),
        SinkRequest::Close => SinkReply::Closed(match sink.take() {
            Some(s) => s.close(),
            None => Err(ExportError::SinkError("sink already finalized".into())),
        }),
        SinkRequest::Abort => SinkReply::Aborted(match sink.take() {
            Some(s) => s.abort(),
            None => Ok(()),
        }),
    })
}

fn close_sink(sink: SinkWorker) -> std::result::Result<SinkReceipt, PipelineError> {
    match sink.finish(SinkRequest::Close) {
        Ok(SinkReply::Closed(res)) => res.map_err(|e| PipelineError::at(Stage::Sink, e)),
        _ => Err(PipelineError::at(
            Stage::Sink,
            ExportError::SinkError("sink worker stopped before close".into()),
        )),
    }
}

/// The original failure is what the caller sees; a failed abort is logged.
fn abort_sink(sink: SinkWorker) {
    match sink.finish(SinkRequest::Abort) {
        Ok(SinkReply::Aborted(Ok(()))) => debug!("Sink aborted"),
        Ok(SinkReply::Aborted(Err(e))) => error!("Sink abort failed: {}", e),
        _ => error!("Sink worker stopped before abort"),
    }
}

fn close_source(source: SourceWorker) {
    if source.finish(SourceRequest::Close).is_err() {
        warn!("Source worker stopped before close");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Record, TerminationMode};
    use crate::infrastructure::local_storage::file_sink::FileSink;
    use crate::infrastructure::object_storage::multipart_sink::RemoteUploadSink;
    use crate::test_support::{MemoryRecordStore, MemorySink, RecordingObjectStore};
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;
    use tempfile::tempdir;

    fn three_books() -> Arc<MemoryRecordStore> {
        Arc::new(MemoryRecordStore::from_records(vec![
            Record::new().with("id", 1).with("title", "A"),
            Record::new().with("id", 2).with("title", "B"),
            Record::new().with("id", 3).with("title", "C"),
        ]))
    }

    fn source(store: Arc<MemoryRecordStore>, page_size: usize) -> PagedSource {
        PagedSource::open(store, page_size, "id", TerminationMode::EmptyPage).unwrap()
    }

    fn pipeline(
        store: Arc<MemoryRecordStore>,
        page_size: usize,
        compress: bool,
        sink: Box<dyn ByteSink>,
    ) -> ExportPipeline {
        ExportPipeline::new(
            source(store, page_size),
            RecordEncoder::new(b','),
            CompressionStage::from_flag(compress, 6),
            sink,
        )
    }

    fn file_sink(path: &Path) -> Box<dyn ByteSink> {
        Box::new(FileSink::create(path, 64).unwrap())
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_three_records_to_file() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("books.csv");
        let mut p = pipeline(three_books(), 2, false, file_sink(&out));
        assert_eq!(p.state(), PipelineState::Idle);

        let stats = p.run(&CancellationToken::new()).unwrap();

        assert_eq!(p.state(), PipelineState::Succeeded);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "id,title\n1,A\n2,B\n3,C\n");
        assert_eq!(stats.records, 3);
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.encoded_bytes, 21);
        assert_eq!(stats.sink_bytes, 21);
        assert_eq!(stats.location, out.display().to_string());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_output_independent_of_page_size() {
        let expected: String = std::iter::once("id,title\n".to_string())
            .chain((1..=5).map(|i| format!("{},Book {}\n", i, i)))
            .collect();

        for page_size in [1, 5, 6] {
            let store = Arc::new(MemoryRecordStore::with_ids(1..=5));
            let (sink, shared) = MemorySink::new();
            let stats = pipeline(store.clone(), page_size, false, Box::new(sink))
                .run(&CancellationToken::new())
                .unwrap();

            assert_eq!(String::from_utf8(shared.contents()).unwrap(), expected);
            assert_eq!(stats.records, 5);
            assert_eq!(stats.batches as usize, 5usize.div_ceil(page_size));
            // One extra query sees the empty page.
            assert_eq!(store.queries().len(), stats.batches as usize + 1);
        }
    }

    #[test]
    fn test_empty_dataset() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("empty.csv");
        let store = Arc::new(MemoryRecordStore::from_records(vec![]));
        let stats = pipeline(store, 10, false, file_sink(&out))
            .run(&CancellationToken::new())
            .unwrap();
        assert_eq!(stats.records, 0);
        assert_eq!(stats.batches, 0);
        assert_eq!(std::fs::read(&out).unwrap(), b"");
    }

    #[test]
    fn test_empty_dataset_with_fixed_columns_writes_header() {
        let store = Arc::new(MemoryRecordStore::from_records(vec![]));
        let (sink, shared) = MemorySink::new();
        ExportPipeline::new(
            source(store, 10),
            RecordEncoder::with_columns(b',', vec!["id".into(), "title".into()]),
            CompressionStage::identity(),
            Box::new(sink),
        )
        .run(&CancellationToken::new())
        .unwrap();
        assert_eq!(shared.contents(), b"id,title\n");
        assert!(shared.is_closed());
    }

    #[test]
    fn test_gzip_output_decompresses_to_csv() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("books.csv.gz");
        let store = Arc::new(MemoryRecordStore::with_ids(1..=250));
        let stats = pipeline(store, 40, true, file_sink(&out))
            .run(&CancellationToken::new())
            .unwrap();

        let compressed = std::fs::read(&out).unwrap();
        assert_eq!(stats.sink_bytes, compressed.len() as u64);
        let mut text = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut text).unwrap();
        assert_eq!(text.lines().count(), 251);
        assert_eq!(text.lines().nth(250), Some("250,Book 250"));
        assert_eq!(stats.encoded_bytes, text.len() as u64);
    }

    #[test]
    fn test_peak_buffer_does_not_grow_with_dataset() {
        let peak = |n: i64| {
            let store = Arc::new(MemoryRecordStore::with_ids(1..=n));
            let (sink, _shared) = MemorySink::new();
            let stats = pipeline(store, 100, false, Box::new(sink))
                .run(&CancellationToken::new())
                .unwrap();
            (stats.peak_buffered_bytes, stats.encoded_bytes)
        };

        let (small, _) = peak(1_000);
        let (large, total) = peak(50_000);
        assert!(large <= small * 2, "peak grew from {} to {}", small, large);
        assert!(large * 20 < total);
    }

    #[test]
    fn test_source_failure_leaves_no_output() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("books.csv");
        let store = Arc::new(MemoryRecordStore::with_ids(1..=10).failing_from_query(3));
        let mut p = pipeline(store, 2, false, file_sink(&out));

        let err = p.run(&CancellationToken::new()).unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Source));
        assert!(matches!(err, PipelineError::Source(ExportError::SourceError(_))));
        assert_eq!(p.state(), PipelineState::Failed);
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn test_source_retries_recover_transient_failure() {
        let store = Arc::new(MemoryRecordStore::with_ids(1..=4));
        store.fail_next_queries(2);
        let (sink, shared) = MemorySink::new();
        let stats = pipeline(store.clone(), 2, false, Box::new(sink))
            .with_source_retries(2, Duration::from_millis(1))
            .run(&CancellationToken::new())
            .unwrap();
        assert_eq!(stats.records, 4);
        assert!(String::from_utf8(shared.contents()).unwrap().ends_with("4,Book 4\n"));
        // Both retries asked for the first page again.
        assert_eq!(store.queries()[..3], [(None, 2), (None, 2), (None, 2)]);
    }

    #[test]
    fn test_encode_failure_is_tagged() {
        let store = Arc::new(MemoryRecordStore::from_records(vec![
            Record::new().with("id", 1).with("title", "A"),
            Record::new().with("id", 2).with("author", "B"),
        ]));
        let (sink, shared) = MemorySink::new();
        let mut p = pipeline(store, 10, false, Box::new(sink));
        let err = p.run(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Encode(ExportError::EncodeError(_))));
        assert!(shared.is_aborted());
        assert!(!shared.is_closed());
    }

    #[test]
    fn test_compression_failure_is_tagged() {
        let mut finished = CompressionStage::gzip(6);
        finished.finish().unwrap();
        let (sink, shared) = MemorySink::new();
        let err = ExportPipeline::new(
            source(three_books(), 2),
            RecordEncoder::new(b','),
            finished,
            Box::new(sink),
        )
        .run(&CancellationToken::new())
        .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Compress));
        assert!(shared.is_aborted());
    }

    #[test]
    fn test_sink_failure_aborts_sink() {
        let (sink, shared) = MemorySink::new();
        let store = Arc::new(MemoryRecordStore::with_ids(1..=10));
        let mut p = pipeline(store.clone(), 2, false, Box::new(sink.failing_on_write(2)));
        let err = p.run(&CancellationToken::new()).unwrap_err();

        assert!(matches!(err, PipelineError::Sink(ExportError::SinkError(_))));
        assert!(shared.is_aborted());
        assert!(shared.contents().is_empty());
        // The source stopped at the page whose bytes were refused.
        assert_eq!(store.queries().len(), 2);
    }

    #[test]
    fn test_failed_part_upload_aborts_remote_upload() {
        let objects = Arc::new(RecordingObjectStore::new(1));
        objects.fail_part(2);
        let sink = RemoteUploadSink::open(objects.clone(), "exports", "books.csv", 8, 1).unwrap();
        let store = Arc::new(MemoryRecordStore::with_ids(1..=50));
        let mut p = pipeline(store, 5, false, Box::new(sink));

        let err = p.run(&CancellationToken::new()).unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Sink));
        assert!(objects.was_aborted());
        assert_eq!(objects.open_uploads(), 0);
        assert!(objects.object("exports", "books.csv").is_none());
    }

    #[test]
    fn test_source_failure_aborts_remote_upload() {
        let objects = Arc::new(RecordingObjectStore::new(1));
        let sink = RemoteUploadSink::open(objects.clone(), "exports", "books.csv", 8, 2).unwrap();
        let store = Arc::new(MemoryRecordStore::with_ids(1..=20).failing_from_query(3));
        let mut p = pipeline(store, 4, false, Box::new(sink));

        let err = p.run(&CancellationToken::new()).unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Source));
        assert!(objects.was_aborted());
        assert_eq!(objects.open_uploads(), 0);
        assert!(objects.object("exports", "books.csv").is_none());
    }

    #[test]
    fn test_encode_failure_aborts_remote_upload() {
        let objects = Arc::new(RecordingObjectStore::new(1));
        let sink = RemoteUploadSink::open(objects.clone(), "exports", "books.csv", 8, 2).unwrap();
        let store = Arc::new(MemoryRecordStore::from_records(vec![
            Record::new().with("id", 1).with("title", "A"),
            Record::new().with("id", 2).with("title", "B"),
            Record::new().with("id", 3).with("author", "C"),
        ]));
        let mut p = pipeline(store, 2, false, Box::new(sink));

        let err = p.run(&CancellationToken::new()).unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Encode));
        assert!(objects.was_aborted());
        assert_eq!(objects.open_uploads(), 0);
        assert!(objects.object("exports", "books.csv").is_none());
    }

    #[test]
    fn test_remote_upload_round_trip() {
        let objects = Arc::new(RecordingObjectStore::new(1));
        let sink = RemoteUploadSink::open(objects.clone(), "exports", "books.csv", 16, 2).unwrap();
        let stats = pipeline(three_books(), 1, false, Box::new(sink))
            .run(&CancellationToken::new())
            .unwrap();
        assert_eq!(stats.location, "exports/books.csv");
        assert_eq!(
            objects.object("exports", "books.csv").unwrap(),
            b"id,title\n1,A\n2,B\n3,C\n"
        );
        assert_eq!(objects.completed_part_numbers(), vec![1, 2]);
    }

    #[test]
    fn test_cancel_mid_stream_aborts_upload() {
        let cancel = CancellationToken::new();
        let store = Arc::new(
            MemoryRecordStore::with_ids(1..=100).cancelling_on_query(3, cancel.clone()),
        );
        let objects = Arc::new(RecordingObjectStore::new(1));
        let sink = RemoteUploadSink::open(objects.clone(), "exports", "books.csv", 8, 2).unwrap();
        let mut p = pipeline(store.clone(), 10, true, Box::new(sink));

        let err = p.run(&cancel).unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(p.state(), PipelineState::Cancelled);
        assert!(objects.was_aborted());
        assert_eq!(objects.open_uploads(), 0);
        assert!(objects.object("exports", "books.csv").is_none());
        assert!(store.queries().len() <= 3);
    }

    #[test]
    fn test_cancel_interrupts_slow_sink_write() {
        let (sink, shared) = MemorySink::new();
        let sink = sink.with_write_delay(Duration::from_millis(100));
        let store = Arc::new(MemoryRecordStore::with_ids(1..=1_000));
        let mut p = pipeline(store, 1, false, Box::new(sink));

        let cancel = CancellationToken::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            remote.cancel();
        });

        let started = Instant::now();
        let err = p.run(&cancel).unwrap_err();
        canceller.join().unwrap();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(shared.is_aborted());
        assert!(shared.writes() < 1_000);
    }

    #[test]
    fn test_cancel_before_start_leaves_no_file() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("books.csv");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut p = pipeline(three_books(), 2, false, file_sink(&out));

        let err = p.run(&cancel).unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled(Stage::Source)));
        assert_eq!(p.state(), PipelineState::Cancelled);
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn test_pipeline_runs_once() {
        let (sink, _shared) = MemorySink::new();
        let mut p = pipeline(three_books(), 2, false, Box::new(sink));
        p.run(&CancellationToken::new()).unwrap();
        let err = p.run(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        assert_eq!(p.state(), PipelineState::Succeeded);
    }

    struct RisingReporter {
        calls: AtomicU64,
    }

    impl UsageReporter for RisingReporter {
        fn snapshot(&self) -> MemorySnapshot {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            MemorySnapshot {
                resident_bytes: n * 1024,
                virtual_bytes: n * 4096,
            }
        }
    }

    #[test]
    fn test_memory_sampled_around_run() {
        let reporter = Arc::new(RisingReporter {
            calls: AtomicU64::new(0),
        });
        let (sink, _shared) = MemorySink::new();
        let stats = pipeline(three_books(), 1, false, Box::new(sink))
            .with_reporter(reporter.clone())
            .run(&CancellationToken::new())
            .unwrap();

        // Once before, once per batch, once after.
        assert_eq!(reporter.calls.load(Ordering::SeqCst), 5);
        assert_eq!(stats.memory.before.resident_bytes, 1024);
        assert_eq!(stats.memory.after.resident_bytes, 5 * 1024);
        assert_eq!(stats.memory.peak, stats.memory.after);
    }
}
