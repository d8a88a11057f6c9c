//! Content blocks and the codec that turns their bytes into typed buffers.
//!
//! Only image blocks are ever converted: hooks work on an RGB8 pixel grid and
//! the result is re-encoded to the block's native encoding.  Audio blocks
//! are already uniform interleaved PCM, so the codec only validates framing
//! and the hook mutates the bytes directly.

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, GenericImage, GenericImageView, GrayImage, ImageFormat, Rgba, RgbImage};
use std::io::Cursor;
use thiserror::Error;

use crate::format::{AudioSpec, ContentKind, ContentSpec, ImageEncoding, ImageSpec, PixelFormat};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("Image decode failed: {0}")]
    ImageDecode(String),
    #[error("Image encode failed: {0}")]
    ImageEncode(String),
    #[error("Raw image needs {expected} bytes for its dimensions, block has {actual}")]
    RawSize { expected: usize, actual: usize },
    #[error("Pixel grid changed from {before:?} to {after:?}")]
    Reshaped { before: (u32, u32), after: (u32, u32) },
    #[error("Audio block of {len} bytes is not a whole number of {frame}-byte frames")]
    AudioFraming { len: usize, frame: usize },
    /// Returned by a hook that cannot process a block; the block keeps
    /// its original bytes.
    #[error("Transform failed: {0}")]
    Transform(String),
}

/// One block of a record: what it is, and its encoded bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentBlock {
    pub spec:  ContentSpec,
    pub bytes: Vec<u8>,
}

impl ContentBlock {
    pub fn new(spec: ContentSpec, bytes: Vec<u8>) -> Self {
        Self { spec, bytes }
    }

    pub fn kind(&self) -> ContentKind {
        self.spec.kind()
    }
}

// ── Pixel buffer ─────────────────────────────────────────────────────────────

/// Decoded image handed to image hooks.
///
/// Hooks always see an RGB8 grid.  Sources that RGB8 cannot represent
/// exactly (alpha, 16-bit, grey+alpha) keep their decoded original; on
/// encode only the pixels a hook changed are written back into it, so
/// untouched pixels and the alpha plane survive bit for bit.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub image:    RgbImage,
    source_color: ColorType,
    original:     Option<Original>,
}

#[derive(Debug, Clone, PartialEq)]
struct Original {
    decoded:  DynamicImage,
    /// `decoded` as RGB8, before any hook ran.
    baseline: RgbImage,
}

impl PixelBuffer {
    pub fn new(image: RgbImage) -> Self {
        Self { image, source_color: ColorType::Rgb8, original: None }
    }

    pub fn from_gray(image: &GrayImage) -> Self {
        Self {
            image:        DynamicImage::ImageLuma8(image.clone()).to_rgb8(),
            source_color: ColorType::L8,
            original:     None,
        }
    }

    pub fn from_dynamic(decoded: DynamicImage) -> Self {
        match decoded {
            DynamicImage::ImageRgb8(rgb)   => Self::new(rgb),
            DynamicImage::ImageLuma8(gray) => Self::from_gray(&gray),
            other => {
                let image = other.to_rgb8();
                Self {
                    source_color: other.color(),
                    original:     Some(Original { baseline: image.clone(), decoded: other }),
                    image,
                }
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u32 {
        PixelFormat::Rgb8.channels()
    }

    /// Colour type of the decoded source, restored on encode.
    pub fn source_color(&self) -> ColorType {
        self.source_color
    }

    fn to_dynamic(&self) -> DynamicImage {
        match &self.original {
            Some(original) => self.merge_into(original),
            None if self.source_color == ColorType::L8 => {
                DynamicImage::ImageLuma8(DynamicImage::ImageRgb8(self.image.clone()).to_luma8())
            }
            None => DynamicImage::ImageRgb8(self.image.clone()),
        }
    }

    fn merge_into(&self, original: &Original) -> DynamicImage {
        let mut out = original.decoded.clone();
        for (x, y, px) in self.image.enumerate_pixels() {
            if px != original.baseline.get_pixel(x, y) {
                let alpha = out.get_pixel(x, y)[3];
                out.put_pixel(x, y, Rgba([px[0], px[1], px[2], alpha]));
            }
        }
        out
    }
}

// ── Codec ────────────────────────────────────────────────────────────────────

pub trait ContentCodec: Send + Sync {
    fn decode_image(&self, bytes: &[u8], spec: &ImageSpec) -> Result<PixelBuffer, ContentError>;
    fn encode_image(&self, pixels: &PixelBuffer, spec: &ImageSpec) -> Result<Vec<u8>, ContentError>;
    fn check_audio(&self, bytes: &[u8], spec: &AudioSpec) -> Result<(), ContentError>;
}

/// JPEG/PNG through the `image` crate, raw pixels, and interleaved PCM.
#[derive(Debug, Clone, Copy)]
pub struct StandardCodec {
    pub jpeg_quality: u8,
}

impl Default for StandardCodec {
    fn default() -> Self {
        Self { jpeg_quality: DEFAULT_JPEG_QUALITY }
    }
}

impl StandardCodec {
    pub fn new(jpeg_quality: u8) -> Self {
        Self { jpeg_quality: jpeg_quality.clamp(1, 100) }
    }

    fn decode_compressed(bytes: &[u8], format: ImageFormat) -> Result<PixelBuffer, ContentError> {
        let img = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| ContentError::ImageDecode(e.to_string()))?;
        Ok(PixelBuffer::from_dynamic(img))
    }
}

impl ContentCodec for StandardCodec {
    fn decode_image(&self, bytes: &[u8], spec: &ImageSpec) -> Result<PixelBuffer, ContentError> {
        match spec.encoding {
            ImageEncoding::Jpeg => Self::decode_compressed(bytes, ImageFormat::Jpeg),
            ImageEncoding::Png  => Self::decode_compressed(bytes, ImageFormat::Png),
            ImageEncoding::Raw { pixel_format } => {
                let expected = spec.width as usize * spec.height as usize * pixel_format.channels() as usize;
                if bytes.len() != expected || expected == 0 {
                    return Err(ContentError::RawSize { expected, actual: bytes.len() });
                }
                let raw = bytes.to_vec();
                let size_err = || ContentError::RawSize { expected, actual: bytes.len() };
                match pixel_format {
                    PixelFormat::Rgb8 => RgbImage::from_raw(spec.width, spec.height, raw)
                        .map(PixelBuffer::new)
                        .ok_or_else(size_err),
                    PixelFormat::Gray8 => GrayImage::from_raw(spec.width, spec.height, raw)
                        .map(|g| PixelBuffer::from_gray(&g))
                        .ok_or_else(size_err),
                }
            }
        }
    }

    fn encode_image(&self, pixels: &PixelBuffer, spec: &ImageSpec) -> Result<Vec<u8>, ContentError> {
        let encode_err = |e: image::ImageError| ContentError::ImageEncode(e.to_string());
        match spec.encoding {
            ImageEncoding::Jpeg => {
                let mut out = Vec::new();
                {
                    let mut encoder = JpegEncoder::new_with_quality(&mut out, self.jpeg_quality);
                    // JPEG carries neither alpha nor 16-bit samples.
                    if pixels.source_color.has_color() {
                        encoder.encode_image(&pixels.image).map_err(encode_err)?
                    } else {
                        let gray = DynamicImage::ImageRgb8(pixels.image.clone()).to_luma8();
                        encoder.encode_image(&gray).map_err(encode_err)?
                    }
                }
                Ok(out)
            }
            ImageEncoding::Png => {
                let mut out = Cursor::new(Vec::new());
                pixels.to_dynamic()
                    .write_to(&mut out, ImageFormat::Png)
                    .map_err(encode_err)?;
                Ok(out.into_inner())
            }
            ImageEncoding::Raw { pixel_format } => Ok(match pixel_format {
                PixelFormat::Rgb8  => pixels.image.as_raw().clone(),
                PixelFormat::Gray8 => DynamicImage::ImageRgb8(pixels.image.clone()).to_luma8().into_raw(),
            }),
        }
    }

    fn check_audio(&self, bytes: &[u8], spec: &AudioSpec) -> Result<(), ContentError> {
        let frame = spec.frame_size();
        if frame == 0 || bytes.len() % frame != 0 {
            return Err(ContentError::AudioFraming { len: bytes.len(), frame });
        }
        Ok(())
    }
}
