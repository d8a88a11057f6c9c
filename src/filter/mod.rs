//! Transform hooks and the per-kind hook table.
//!
//! A [`HookRegistry`] maps each filterable [`ContentKind`] to zero or one
//! hook.  It is built before a copy run and lent to the filter-copier for
//! the whole run; hooks can keep internal state (a detector model, counters)
//! because they are called through `&mut self`.
//!
//! # Thread safety
//! A registry belongs to one worker.  Parallel copies build one registry per
//! worker from a factory, so a stateful hook never sees concurrent calls.
//! [`SilenceAudio`] is stateless; [`MosaicImages`] is exactly as reentrant
//! as the detector it wraps.

pub mod audio;
pub mod mosaic;

pub use audio::SilenceAudio;
pub use mosaic::{ClampedRegion, Detector, MosaicImages, MosaicOptions, MosaicStyle, Region, Rotation, StaticRegions};

use crate::content::{ContentError, PixelBuffer};
use crate::format::{AudioSpec, ContentKind, ImageSpec};
use crate::record::RecordInfo;

pub trait ImageHook {
    /// Mutate `pixels` in place.  The pixel grid must keep its dimensions.
    fn filter_image(
        &mut self,
        record:      &RecordInfo,
        block_index: usize,
        spec:        &ImageSpec,
        pixels:      &mut PixelBuffer,
    ) -> Result<(), ContentError>;
}

pub trait AudioHook {
    /// Mutate interleaved PCM samples in place; the length is fixed.
    fn filter_audio(
        &mut self,
        record:      &RecordInfo,
        block_index: usize,
        spec:        &AudioSpec,
        samples:     &mut [u8],
    ) -> Result<(), ContentError>;
}

#[derive(Default)]
pub struct HookRegistry {
    image: Option<Box<dyn ImageHook>>,
    audio: Option<Box<dyn AudioHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image_hook(mut self, hook: impl ImageHook + 'static) -> Self {
        self.image = Some(Box::new(hook));
        self
    }

    pub fn with_audio_hook(mut self, hook: impl AudioHook + 'static) -> Self {
        self.audio = Some(Box::new(hook));
        self
    }

    pub fn handles(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::Image => self.image.is_some(),
            ContentKind::Audio => self.audio.is_some(),
            ContentKind::Other => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.audio.is_none()
    }

    pub fn image_hook(&mut self) -> Option<&mut (dyn ImageHook + 'static)> {
        self.image.as_deref_mut()
    }

    pub fn audio_hook(&mut self) -> Option<&mut (dyn AudioHook + 'static)> {
        self.audio.as_deref_mut()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("image", &self.image.is_some())
            .field("audio", &self.audio.is_some())
            .finish()
    }
}
