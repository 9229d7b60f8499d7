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

use crate::application::cancellation::CancellationToken;
use crate::application::compression::CompressionStage;
use crate::application::encoder::RecordEncoder;
use crate::application::pipeline::ExportPipeline;
use crate::application::source::PagedSource;
use crate::domain::entities::{Destination, RunConfig, RunStats, MIN_PART_SIZE};
use crate::domain::errors::{ExportError, PipelineError, Stage};
use crate::infrastructure::local_storage::file_sink::FileSink;
use crate::infrastructure::object_storage::multipart_sink::RemoteUploadSink;
use crate::ports::byte_sink::ByteSink;
use crate::ports::object_store::ObjectStore;
use crate::ports::record_store::RecordStore;
use crate::ports::usage_port::UsageReporter;
use log::info;
use std::sync::Arc;
use std::time::Duration;

/// Wires the ports into a pipeline for each run.
pub struct ExportOrchestrator {
    record_store: Arc<dyn RecordStore>,
    object_store: Option<Arc<dyn ObjectStore>>,
    usage: Arc<dyn UsageReporter>,
}

impl ExportOrchestrator {
    /// `object_store` is only needed for remote destinations.
    pub fn new(
        record_store: Arc<dyn RecordStore>,
        object_store: Option<Arc<dyn ObjectStore>>,
        usage: Arc<dyn UsageReporter>,
    ) -> Self {
        Self {
            record_store,
            object_store,
            usage,
        }
    }

    /// Validates `config`, opens every stage and runs the pipeline.
    ///
    /// The source is opened before the sink, so a failing count query never
    /// leaves an upload behind.
    pub fn run(
        &self,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> Result<RunStats, PipelineError> {
        let min_part_size = self
            .object_store
            .as_ref()
            .map_or(MIN_PART_SIZE, |s| s.min_part_size());
        config
            .validate(min_part_size)
            .map_err(PipelineError::InvalidConfig)?;
        if matches!(config.destination, Destination::Remote { .. }) && self.object_store.is_none() {
            return Err(PipelineError::InvalidConfig(ExportError::ConfigError(
                "remote destination needs an object store".into(),
            )));
        }

        let opts = &config.options;
        info!(
            "Exporting to {} (page size {}, compress {})",
            config.destination, config.page_size, config.compress
        );

        let source = PagedSource::open(
            Arc::clone(&self.record_store),
            config.page_size,
            &opts.id_column,
            opts.termination,
        )
        .map_err(|e| PipelineError::at(Stage::Source, e))?;

        let encoder = match &opts.columns {
            Some(cols) => RecordEncoder::with_columns(opts.delimiter, cols.clone()),
            None => RecordEncoder::new(opts.delimiter),
        };
        let compressor = CompressionStage::from_flag(config.compress, opts.compression_level);
        let sink = self
            .open_sink(config)
            .map_err(|e| PipelineError::at(Stage::Sink, e))?;

        ExportPipeline::new(source, encoder, compressor, sink)
            .with_reporter(Arc::clone(&self.usage))
            .with_source_retries(
                opts.max_source_retries,
                Duration::from_millis(opts.retry_backoff_ms),
            )
            .run(cancel)
    }

    fn open_sink(&self, config: &RunConfig) -> crate::domain::errors::Result<Box<dyn ByteSink>> {
        let opts = &config.options;
        match &config.destination {
            Destination::File { path } => {
                Ok(Box::new(FileSink::create(path.clone(), opts.file_block_size)?))
            }
            Destination::Remote { bucket, key } => {
                let store = self.object_store.as_ref().ok_or_else(|| {
                    ExportError::ConfigError("remote destination needs an object store".into())
                })?;
                Ok(Box::new(RemoteUploadSink::open(
                    Arc::clone(store),
                    bucket,
                    key,
                    opts.part_size,
                    opts.max_concurrent_parts,
                )?))
            }
        }
    }
}

/// Runs one export and returns its statistics or a stage-tagged error.
pub fn run_export(
    config: &RunConfig,
    record_store: Arc<dyn RecordStore>,
    object_store: Option<Arc<dyn ObjectStore>>,
    usage: Arc<dyn UsageReporter>,
    cancel: &CancellationToken,
) -> Result<RunStats, PipelineError> {
    ExportOrchestrator::new(record_store, object_store, usage).run(config, cancel)
}
