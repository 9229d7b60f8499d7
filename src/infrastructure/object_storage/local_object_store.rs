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

//! Filesystem-backed implementation of the multipart upload protocol.
//!
//! Buckets are directories under a root (for example a mounted bucket or a
//! shared volume). Parts are staged in `<root>/.multipart/<upload id>/`;
//! completion stitches them into `<root>/<bucket>/<key>` through a temporary
//! file and a rename, and abort removes the staging directory.

use crate::domain::entities::{CompletedPart, MAX_PART_NUMBER, MIN_PART_SIZE};
use crate::domain::errors::{ExportError, Result};
use crate::ports::object_store::ObjectStore;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

const STAGING_DIR: &str = ".multipart";

struct PendingUpload {
    bucket: String,
    key: String,
    staging: PathBuf,
}

pub struct LocalObjectStore {
    root: PathBuf,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    sequence: AtomicU64,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            uploads: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Where a completed object lives on disk.
    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }

    fn registry(&self) -> Result<MutexGuard<'_, HashMap<String, PendingUpload>>> {
        self.uploads
            .lock()
            .map_err(|_| ExportError::ObjectStoreError("upload registry poisoned".into()))
    }

    fn staging_of(&self, upload_id: &str) -> Result<PathBuf> {
        self.registry()?
            .get(upload_id)
            .map(|u| u.staging.clone())
            .ok_or_else(|| unknown_upload(upload_id))
    }

    fn assemble(&self, upload: &PendingUpload, upload_id: &str, parts: &[CompletedPart]) -> Result<u64> {
        let target = self.object_path(&upload.bucket, &upload.key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = target.with_file_name(format!(
            "{}.upload-{}",
            target.file_name().and_then(|n| n.to_str()).unwrap_or("object"),
            upload_id
        ));

        let result = (|| -> Result<u64> {
            let mut out = BufWriter::new(File::create(&temp)?);
            let mut total = 0u64;
            for (expected, part) in (1u32..).zip(parts) {
                if part.part_number != expected {
                    return Err(ExportError::ObjectStoreError(format!(
                        "part list is not contiguous: expected {}, found {}",
                        expected, part.part_number
                    )));
                }
                let bytes = fs::read(part_file(&upload.staging, part.part_number))?;
                if etag_of(&bytes) != part.etag {
                    return Err(ExportError::ObjectStoreError(format!(
                        "etag mismatch for part {}",
                        part.part_number
                    )));
                }
                out.write_all(&bytes)?;
                total += bytes.len() as u64;
            }
            out.into_inner().map_err(|e| ExportError::IoError(e.into_error()))?.sync_all()?;
            fs::rename(&temp, &target)?;
            Ok(total)
        })();

        if result.is_err() {
            if let Err(e) = fs::remove_file(&temp) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", temp.display(), e);
                }
            }
        }
        result
    }
}

impl ObjectStore for LocalObjectStore {
    fn initiate_multipart_upload(&self, bucket: &str, key: &str) -> Result<String> {
        check_segment(bucket)?;
        check_key(key)?;

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let seed = format!(
            "{}/{}/{}/{}",
            bucket,
            key,
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            seq
        );
        let upload_id: String = etag_of(seed.as_bytes()).chars().take(32).collect();

        let staging = self.root.join(STAGING_DIR).join(&upload_id);
        fs::create_dir_all(&staging)?;

        self.registry()?.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                staging,
            },
        );
        debug!("Initiated upload {} for {}/{}", upload_id, bucket, key);
        Ok(upload_id)
    }

    fn upload_part(&self, upload_id: &str, part_number: u32, bytes: &[u8]) -> Result<String> {
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(ExportError::ObjectStoreError(format!(
                "part number {} out of range",
                part_number
            )));
        }
        let staging = self.staging_of(upload_id)?;
        fs::write(part_file(&staging, part_number), bytes)?;
        Ok(etag_of(bytes))
    }

    fn complete_multipart_upload(&self, upload_id: &str, parts: &[CompletedPart]) -> Result<()> {
        if parts.is_empty() {
            return Err(ExportError::ObjectStoreError("cannot complete an upload without parts".into()));
        }

        let upload = self
            .registry()?
            .remove(upload_id)
            .ok_or_else(|| unknown_upload(upload_id))?;

        match self.assemble(&upload, upload_id, parts) {
            Ok(total) => {
                fs::remove_dir_all(&upload.staging)?;
                info!(
                    "Assembled {}/{} from {} parts ({} bytes)",
                    upload.bucket,
                    upload.key,
                    parts.len(),
                    total
                );
                Ok(())
            }
            Err(e) => {
                // Leave it registered so the caller can still abort.
                self.registry()?.insert(upload_id.to_string(), upload);
                Err(e)
            }
        }
    }

    fn abort_multipart_upload(&self, upload_id: &str) -> Result<()> {
        let upload = self
            .registry()?
            .remove(upload_id)
            .ok_or_else(|| unknown_upload(upload_id))?;
        match fs::remove_dir_all(&upload.staging) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn min_part_size(&self) -> usize {
        MIN_PART_SIZE
    }
}

fn part_file(staging: &Path, part_number: u32) -> PathBuf {
    staging.join(format!("part-{:05}", part_number))
}

fn etag_of(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn unknown_upload(upload_id: &str) -> ExportError {
    ExportError::ObjectStoreError(format!("unknown upload id {}", upload_id))
}

fn check_segment(bucket: &str) -> Result<()> {
    if bucket.is_empty() || bucket.starts_with('.') || bucket.contains(|c: char| c == '/' || c == '\\') {
        return Err(ExportError::ObjectStoreError(format!("invalid bucket name '{}'", bucket)));
    }
    Ok(())
}

fn check_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let clean = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !clean {
        return Err(ExportError::ObjectStoreError(format!("invalid object key '{}'", key)));
    }
    Ok(())
}
