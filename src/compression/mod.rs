//! Per-record payload compression.
//!
//! Every stored record carries a one-byte compression tag and a signed level
//! byte in its header.  The level is advisory (only zstd uses it) and lets a
//! filtered record be re-compressed with the same preset it was read with.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default zstd level when none is given.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

const TAG_NONE: u8 = 0;
const TAG_LZ4:  u8 = 1;
const TAG_ZSTD: u8 = 2;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Checksum mismatch: header {expected:#010x}, payload {actual:#010x}")]
    Checksum { expected: u32, actual: u32 },
    #[error("Size mismatch: header declares {expected} bytes, got {actual}")]
    Size { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Lz4,
    Zstd { level: i32 },
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Zstd { level: DEFAULT_ZSTD_LEVEL }
    }
}

impl Compression {
    pub fn tag(self) -> u8 {
        match self {
            Compression::None    => TAG_NONE,
            Compression::Lz4     => TAG_LZ4,
            Compression::Zstd {..} => TAG_ZSTD,
        }
    }

    /// Level byte written next to the tag.
    pub fn level(self) -> i8 {
        match self {
            Compression::Zstd { level } => level.clamp(i8::MIN as i32, i8::MAX as i32) as i8,
            _                           => 0,
        }
    }

    pub fn from_tag(tag: u8, level: i8) -> Option<Self> {
        match tag {
            TAG_NONE => Some(Compression::None),
            TAG_LZ4  => Some(Compression::Lz4),
            TAG_ZSTD => Some(Compression::Zstd { level: level as i32 }),
            _        => None,
        }
    }

    /// Human-readable name (diagnostics only).
    pub fn name(self) -> &'static str {
        match self {
            Compression::None      => "none",
            Compression::Lz4       => "lz4",
            Compression::Zstd {..} => "zstd",
        }
    }

    /// Parse a CLI name; `level` only applies to zstd.
    pub fn from_name(s: &str, level: Option<i32>) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(Compression::None),
            "lz4"  => Some(Compression::Lz4),
            "zstd" => Some(Compression::Zstd { level: level.unwrap_or(DEFAULT_ZSTD_LEVEL) }),
            _      => None,
        }
    }

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Lz4  => Ok(lz4_flex::compress_prepend_size(data)),
            Compression::Zstd { level } => zstd::encode_all(data, level)
                .map_err(|e| CompressionError::Compression(e.to_string())),
        }
    }

    /// Decompress `data`, checking the result against the size the record
    /// header declares.
    pub fn decompress(self, data: &[u8], expected_size: usize) -> Result<Vec<u8>, CompressionError> {
        let out = match self {
            Compression::None => data.to_vec(),
            Compression::Lz4  => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| CompressionError::Decompression(e.to_string()))?,
            Compression::Zstd { .. } => zstd::decode_all(data)
                .map_err(|e| CompressionError::Decompression(e.to_string()))?,
        };
        if out.len() != expected_size {
            return Err(CompressionError::Size { expected: expected_size, actual: out.len() });
        }
        Ok(out)
    }
}
