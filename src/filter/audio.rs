use crate::content::ContentError;
use crate::format::AudioSpec;
use crate::record::RecordInfo;

use super::AudioHook;

/// Replaces every sample with zero, keeping the buffer length.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilenceAudio;

impl AudioHook for SilenceAudio {
    fn filter_audio(
        &mut self,
        _record:      &RecordInfo,
        _block_index: usize,
        _spec:        &AudioSpec,
        samples:      &mut [u8],
    ) -> Result<(), ContentError> {
        samples.fill(0);
        Ok(())
    }
}
