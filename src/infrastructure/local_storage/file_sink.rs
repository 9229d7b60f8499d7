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

//! Infrastructure adapter that streams the export into a local file.
//!
//! Bytes go to a `.partial` sibling of the target path through a
//! `BufWriter` sized to the configured block size. Only a successful `close`
//! renames it into place, so a reader never mistakes a failed run's output
//! for a complete export.

use crate::domain::entities::SinkReceipt;
use crate::domain::errors::{ExportError, Result};
use crate::ports::byte_sink::ByteSink;
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const PARTIAL_SUFFIX: &str = ".partial";

/// Concrete implementation of `ByteSink` for the local filesystem.
pub struct FileSink {
    final_path: PathBuf,
    temp_path: PathBuf,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
    /// Set once the temp file was renamed or removed.
    settled: bool,
}

impl FileSink {
    /// Creates (or truncates) the temporary file next to `path`.
    pub fn create(path: impl Into<PathBuf>, block_size: usize) -> Result<Self> {
        let final_path = path.into();
        let temp_path = partial_path(&final_path)?;

        if let Some(parent) = final_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| {
                ExportError::SinkError(format!("cannot create {}: {}", temp_path.display(), e))
            })?;

        debug!(
            "Opened {} with a {} byte write buffer",
            temp_path.display(),
            block_size
        );

        Ok(Self {
            final_path,
            temp_path,
            writer: Some(BufWriter::with_capacity(block_size.max(1), file)),
            bytes_written: 0,
            settled: false,
        })
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    fn finalize(&mut self) -> Result<SinkReceipt> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| ExportError::SinkError("file sink already closed".into()))?;

        let file = writer
            .into_inner()
            .map_err(|e| ExportError::SinkError(format!("flush failed: {}", e.error())))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp_path, &self.final_path).map_err(|e| {
            ExportError::SinkError(format!(
                "cannot move {} into place: {}",
                self.temp_path.display(),
                e
            ))
        })?;
        self.settled = true;

        info!(
            "Wrote {} bytes to {}",
            self.bytes_written,
            self.final_path.display()
        );
        Ok(SinkReceipt {
            location: self.final_path.display().to_string(),
            bytes_written: self.bytes_written,
            parts: None,
        })
    }

    fn discard(&mut self) -> Result<()> {
        self.writer.take();
        if self.settled {
            return Ok(());
        }
        self.settled = true;
        match fs::remove_file(&self.temp_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ExportError::SinkError(format!(
                "cannot remove {}: {}",
                self.temp_path.display(),
                e
            ))),
        }
    }
}

impl ByteSink for FileSink {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ExportError::SinkError("write to closed file sink".into()))?;
        writer
            .write_all(bytes)
            .map_err(|e| ExportError::SinkError(format!("write failed: {}", e)))?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<SinkReceipt> {
        // On failure `Drop` removes the temp file.
        self.finalize()
    }

    fn abort(mut self: Box<Self>) -> Result<()> {
        warn!("Discarding partial output {}", self.temp_path.display());
        self.discard()
    }

    fn buffered_bytes(&self) -> usize {
        self.writer.as_ref().map_or(0, |w| w.buffer().len())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if !self.settled {
            if let Err(e) = self.discard() {
                warn!("{}", e);
            }
        }
    }
}

fn partial_path(path: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        ExportError::ConfigError(format!("{} does not name a file", path.display()))
    })?;
    let mut partial = name.to_os_string();
    partial.push(PARTIAL_SUFFIX);
    Ok(path.with_file_name(partial))
}
