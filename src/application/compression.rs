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

//! # Compression Stage
//!
//! Gzip-compresses the encoded byte stream on the fly. The encoder's output
//! buffer is drained after every write, so memory stays bounded by the
//! deflate window plus one chunk no matter how long the stream runs.

use crate::domain::errors::{ExportError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

enum Codec {
    Gzip(GzEncoder<Vec<u8>>),
    Identity,
}

/// A streaming compressor: `write` any number of times, then `finish` once.
pub struct CompressionStage {
    codec: Option<Codec>,
    bytes_in: u64,
    bytes_out: u64,
}

impl CompressionStage {
    /// Gzip at `level` (0-9).
    pub fn gzip(level: u32) -> Self {
        Self::with_codec(Codec::Gzip(GzEncoder::new(
            Vec::new(),
            Compression::new(level.min(9)),
        )))
    }

    /// Hands bytes through untouched, for uncompressed exports.
    pub fn identity() -> Self {
        Self::with_codec(Codec::Identity)
    }

    pub fn from_flag(compress: bool, level: u32) -> Self {
        if compress {
            Self::gzip(level)
        } else {
            Self::identity()
        }
    }

    fn with_codec(codec: Codec) -> Self {
        Self {
            codec: Some(codec),
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Feeds `chunk` to the compressor and returns whatever output it produced.
    /// The result may be empty while the compressor accumulates a block.
    pub fn write(&mut self, chunk: Vec<u8>) -> Result<Vec<u8>> {
        let codec = self.codec.as_mut().ok_or_else(|| {
            ExportError::CompressionError("write after finish".to_string())
        })?;
        self.bytes_in += chunk.len() as u64;

        let out = match codec {
            Codec::Identity => chunk,
            Codec::Gzip(enc) => {
                enc.write_all(&chunk)
                    .map_err(|e| ExportError::CompressionError(e.to_string()))?;
                std::mem::take(enc.get_mut())
            }
        };
        self.bytes_out += out.len() as u64;
        Ok(out)
    }

    /// Flushes buffered input and returns the remaining output including the
    /// gzip trailer. Must be called exactly once.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        let codec = self.codec.take().ok_or_else(|| {
            ExportError::CompressionError("finish called twice".to_string())
        })?;

        let out = match codec {
            Codec::Identity => Vec::new(),
            Codec::Gzip(enc) => enc
                .finish()
                .map_err(|e| ExportError::CompressionError(e.to_string()))?,
        };
        self.bytes_out += out.len() as u64;
        Ok(out)
    }

    pub fn is_finished(&self) -> bool {
        self.codec.is_none()
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn gunzip(bytes: &[u8]) -> String {
        let mut out = String::new();
        GzDecoder::new(bytes).read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_gzip_round_trip_across_writes() {
        let mut stage = CompressionStage::gzip(6);
        let mut out = Vec::new();
        for i in 0..1000 {
            out.extend(stage.write(format!("{},row {}\n", i, i).into_bytes()).unwrap());
        }
        out.extend(stage.finish().unwrap());

        let text = gunzip(&out);
        assert_eq!(text.lines().count(), 1000);
        assert!(text.starts_with("0,row 0\n"));
        assert_eq!(stage.bytes_out(), out.len() as u64);
        assert!(stage.bytes_out() < stage.bytes_in());
    }

    #[test]
    fn test_empty_stream_is_valid_gzip() {
        let mut stage = CompressionStage::gzip(6);
        let out = stage.finish().unwrap();
        assert!(!out.is_empty());
        assert_eq!(gunzip(&out), "");
    }

    #[test]
    fn test_identity_passes_bytes_through() {
        let mut stage = CompressionStage::from_flag(false, 6);
        assert_eq!(stage.write(b"id,title\n".to_vec()).unwrap(), b"id,title\n");
        assert!(stage.finish().unwrap().is_empty());
    }

    #[test]
    fn test_write_after_finish_fails() {
        let mut stage = CompressionStage::gzip(1);
        stage.finish().unwrap();
        assert!(stage.is_finished());
        assert!(matches!(
            stage.write(b"late".to_vec()),
            Err(ExportError::CompressionError(_))
        ));
        assert!(stage.finish().is_err());
    }

    #[test]
    fn test_output_is_drained_each_write() {
        let mut stage = CompressionStage::gzip(6);
        for _ in 0..100 {
            stage.write(vec![b'x'; 64 * 1024]).unwrap();
            match &stage.codec {
                Some(Codec::Gzip(enc)) => assert!(enc.get_ref().is_empty()),
                _ => panic!("expected a gzip codec"),
            }
        }
    }
}
