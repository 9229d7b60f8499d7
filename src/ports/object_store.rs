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

//! # Object Store Port
//!
//! The four calls of a multipart upload protocol. Authentication and bucket
//! management belong to whoever constructs the implementation.

use crate::domain::entities::{CompletedPart, MIN_PART_SIZE};
use crate::domain::errors::Result;

pub trait ObjectStore: Send + Sync {
    /// Starts an upload of `bucket/key` and returns its upload id.
    fn initiate_multipart_upload(&self, bucket: &str, key: &str) -> Result<String>;

    /// Stores one part and returns its entity tag.
    fn upload_part(&self, upload_id: &str, part_number: u32, bytes: &[u8]) -> Result<String>;

    /// Assembles the object from `parts`, which are sorted by part number.
    fn complete_multipart_upload(&self, upload_id: &str, parts: &[CompletedPart]) -> Result<()>;

    /// Discards an upload and every part stored for it.
    fn abort_multipart_upload(&self, upload_id: &str) -> Result<()>;

    /// Smallest size accepted for any part but the last.
    fn min_part_size(&self) -> usize {
        MIN_PART_SIZE
    }
}
