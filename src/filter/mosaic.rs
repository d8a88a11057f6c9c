//! Region redaction for image blocks.
//!
//! [`MosaicImages`] asks an injected [`Detector`] for regions of interest,
//! clips each one to the image and paints over it.  The detector is opaque:
//! a face model, a fixed list of regions, or any closure.  Regions may lie
//! partly or entirely outside the image; they are clipped, never rejected.

use image::{imageops, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::trace;

use crate::content::{ContentError, PixelBuffer};
use crate::format::ImageSpec;
use crate::record::RecordInfo;

use super::ImageHook;

// ── Regions ──────────────────────────────────────────────────────────────────

/// An axis-aligned box in pixel coordinates, as a detector reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x:      i32,
    pub y:      i32,
    pub width:  i32,
    pub height: i32,
}

/// A region known to lie within `[0, width) x [0, height)` of its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampedRegion {
    pub x:      u32,
    pub y:      u32,
    pub width:  u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Intersect with an image of the given size.  `None` when nothing of
    /// the region is inside the image.
    pub fn clamp(&self, width: u32, height: u32) -> Option<ClampedRegion> {
        let x0 = (self.x as i64).max(0);
        let y0 = (self.y as i64).max(0);
        let x1 = (self.x as i64 + self.width as i64).min(width as i64);
        let y1 = (self.y as i64 + self.height as i64).min(height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(ClampedRegion {
            x:      x0 as u32,
            y:      y0 as u32,
            width:  (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

impl FromStr for Region {
    type Err = String;

    /// `x,y,width,height`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<i32> = s
            .split(',')
            .map(|p| p.trim().parse::<i32>().map_err(|e| format!("bad region {s:?}: {e}")))
            .collect::<Result<_, _>>()?;
        match parts[..] {
            [x, y, width, height] => Ok(Region { x, y, width, height }),
            _ => Err(format!("region must be x,y,width,height, got {s:?}")),
        }
    }
}

// ── Detection ────────────────────────────────────────────────────────────────

pub trait Detector {
    fn detect(&mut self, image: &RgbImage) -> Vec<Region>;
}

impl<F> Detector for F
where
    F: FnMut(&RgbImage) -> Vec<Region>,
{
    fn detect(&mut self, image: &RgbImage) -> Vec<Region> {
        self(image)
    }
}

/// Reports the same regions for every image.
#[derive(Debug, Clone, Default)]
pub struct StaticRegions {
    pub regions: Vec<Region>,
}

impl StaticRegions {
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }
}

impl Detector for StaticRegions {
    fn detect(&mut self, _image: &RgbImage) -> Vec<Region> {
        self.regions.clone()
    }
}

// ── Options ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MosaicStyle {
    /// Filled ellipse centred in the region, semi-axes a third of its size.
    Ellipse { fill: [u8; 3] },
    /// Each `cell`-sized tile of the region replaced by its mean colour.
    Pixelate { cell: u32 },
}

impl Default for MosaicStyle {
    fn default() -> Self {
        MosaicStyle::Ellipse { fill: [128, 128, 128] }
    }
}

/// Orientation the detector expects relative to the stored image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    Upright,
    /// Sensor mounted sideways: turn the image 90° clockwise for detection
    /// and drawing, then turn it back.
    Clockwise90,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicOptions {
    pub style:              MosaicStyle,
    pub detection_rotation: Rotation,
}

// ── Hook ─────────────────────────────────────────────────────────────────────

pub struct MosaicImages<D: Detector> {
    detector:        D,
    options:         MosaicOptions,
    regions_applied: u64,
}

impl<D: Detector> MosaicImages<D> {
    pub fn new(detector: D) -> Self {
        Self::with_options(detector, MosaicOptions::default())
    }

    pub fn with_options(detector: D, options: MosaicOptions) -> Self {
        Self { detector, options, regions_applied: 0 }
    }

    /// Regions painted so far, after clipping.
    pub fn regions_applied(&self) -> u64 {
        self.regions_applied
    }

    fn redact(&mut self, image: &mut RgbImage) -> usize {
        let (width, height) = image.dimensions();
        let mut applied = 0;
        for region in self.detector.detect(image) {
            let Some(area) = region.clamp(width, height) else { continue };
            match self.options.style {
                MosaicStyle::Ellipse { fill } => fill_ellipse(image, area, Rgb(fill)),
                MosaicStyle::Pixelate { cell } => pixelate(image, area, cell),
            }
            applied += 1;
        }
        applied
    }
}

impl<D: Detector> ImageHook for MosaicImages<D> {
    fn filter_image(
        &mut self,
        record:      &RecordInfo,
        block_index: usize,
        _spec:       &ImageSpec,
        pixels:      &mut PixelBuffer,
    ) -> Result<(), ContentError> {
        let applied = match self.options.detection_rotation {
            Rotation::Upright => self.redact(&mut pixels.image),
            Rotation::Clockwise90 => {
                let mut turned = imageops::rotate90(&pixels.image);
                let applied = self.redact(&mut turned);
                pixels.image = imageops::rotate270(&turned);
                applied
            }
        };
        self.regions_applied += applied as u64;
        trace!(stream = %record.stream_id, block = block_index, applied, "mosaic regions painted");
        Ok(())
    }
}

fn fill_ellipse(image: &mut RgbImage, area: ClampedRegion, color: Rgb<u8>) {
    let cx = area.x as f64 + area.width as f64 / 2.0;
    let cy = area.y as f64 + area.height as f64 / 2.0;
    let a  = (area.width as f64 / 3.0).max(0.5);
    let b  = (area.height as f64 / 3.0).max(0.5);
    for py in area.y..area.y + area.height {
        for px in area.x..area.x + area.width {
            let dx = (px as f64 + 0.5 - cx) / a;
            let dy = (py as f64 + 0.5 - cy) / b;
            if dx * dx + dy * dy <= 1.0 {
                image.put_pixel(px, py, color);
            }
        }
    }
}

fn pixelate(image: &mut RgbImage, area: ClampedRegion, cell: u32) {
    let cell = cell.max(1);
    let (x_end, y_end) = (area.x + area.width, area.y + area.height);
    let mut y = area.y;
    while y < y_end {
        let tile_h = cell.min(y_end - y);
        let mut x = area.x;
        while x < x_end {
            let tile_w = cell.min(x_end - x);
            let mut sum = [0u64; 3];
            for ty in y..y + tile_h {
                for tx in x..x + tile_w {
                    let p = image.get_pixel(tx, ty);
                    for c in 0..3 {
                        sum[c] += p[c] as u64;
                    }
                }
            }
            let n = (tile_w * tile_h) as u64;
            let mean = Rgb([(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8]);
            for ty in y..y + tile_h {
                for tx in x..x + tile_w {
                    image.put_pixel(tx, ty, mean);
                }
            }
            x += tile_w;
        }
        y += tile_h;
    }
}
