//! Record formats: what each block of a record class contains.
//!
//! A [`RecordFormat`] is registered per (stream, kind, format version) in
//! the index.  Records whose signature has no registered format are opaque
//! and can only be copied verbatim.

use serde::{Deserialize, Serialize};

/// Closed set of content kinds the filter dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Image,
    Audio,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb8,
    Gray8,
}

impl PixelFormat {
    pub fn channels(self) -> u32 {
        match self {
            PixelFormat::Rgb8  => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    Jpeg,
    Png,
    /// Uncompressed pixels, row-major, no padding.
    Raw { pixel_format: PixelFormat },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub encoding: ImageEncoding,
    /// Required for raw pixels; informational (0 = unknown) otherwise.
    #[serde(default)]
    pub width:    u32,
    #[serde(default)]
    pub height:   u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    U8,
    S16Le,
    S32Le,
    F32Le,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8    => 1,
            SampleFormat::S16Le => 2,
            SampleFormat::S32Le => 4,
            SampleFormat::F32Le => 4,
        }
    }
}

/// Interleaved PCM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub sample_format: SampleFormat,
    pub channels:      u16,
    pub sample_rate:   u32,
}

impl AudioSpec {
    pub fn frame_size(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels as usize
    }
}

/// Descriptor of one block position within a record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentSpec {
    Image(ImageSpec),
    Audio(AudioSpec),
    /// Opaque bytes: telemetry structs, metadata, anything not filtered.
    Other {
        #[serde(default)]
        label: String,
    },
}

impl ContentSpec {
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentSpec::Image(_)  => ContentKind::Image,
            ContentSpec::Audio(_)  => ContentKind::Audio,
            ContentSpec::Other{..} => ContentKind::Other,
        }
    }

    pub fn other(label: impl Into<String>) -> Self {
        ContentSpec::Other { label: label.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordFormat {
    pub blocks: Vec<ContentSpec>,
}

impl RecordFormat {
    pub fn new(blocks: Vec<ContentSpec>) -> Self {
        Self { blocks }
    }

    pub fn blocks_of_kind(&self, kind: ContentKind) -> usize {
        self.blocks.iter().filter(|b| b.kind() == kind).count()
    }

    /// True when no block of this format can ever be transformed.
    pub fn is_unfilterable(&self) -> bool {
        self.blocks_of_kind(ContentKind::Image) == 0 && self.blocks_of_kind(ContentKind::Audio) == 0
    }
}
