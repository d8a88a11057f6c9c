//! The record filter-copier.
//!
//! For each record, [`RecordFilterCopier::copy_record`] decides once per
//! [`Signature`] whether records of that class can be forwarded verbatim.
//! Verbatim records reach the sink byte for byte.  Filtered records are
//! split into content blocks, each block is handed to the hook registered
//! for its kind, and the re-assembled block list is forwarded.
//!
//! A block that cannot be decoded, transformed or re-encoded keeps its
//! original bytes; the failure is logged and recorded as a [`BlockWarning`].
//! Only sink I/O errors and decision-cache conflicts abort a run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{DecisionConflict, DecisionStore, Signature};
use crate::compression::Compression;
use crate::content::{ContentBlock, ContentCodec, ContentError, StandardCodec, DEFAULT_JPEG_QUALITY};
use crate::filter::{AudioHook, HookRegistry, ImageHook};
use crate::format::{AudioSpec, ContentSpec, ImageSpec, RecordFormat};
use crate::record::{decode_payload, split_blocks, RawRecord, RecordInfo, RecordKind, StreamId};

// ── Seams ────────────────────────────────────────────────────────────────────

/// Source of record formats, keyed by signature.
pub trait FormatLookup {
    fn record_format(&self, signature: &Signature) -> Option<&RecordFormat>;
}

/// Destination of copied records, in submission order.
pub trait RecordSink {
    /// Forward a record exactly as it was stored in the source.
    fn write_verbatim(&mut self, record: &RawRecord) -> io::Result<()>;

    /// Frame, compress and forward a re-assembled block sequence.
    fn write_blocks(
        &mut self,
        info:        &RecordInfo,
        compression: Compression,
        blocks:      &[ContentBlock],
    ) -> io::Result<()>;
}

/// Default for [`CopyOptions::parallel_window`].
pub const DEFAULT_PARALLEL_WINDOW: usize = 1024;

// ── Options / results ────────────────────────────────────────────────────────

/// Which record kinds may take the zero-filterable-blocks fast path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerbatimPolicy {
    /// Only data records; configuration and state records with a known
    /// format are always decoded.
    #[default]
    DataRecordsOnly,
    /// Any record kind whose format has no image or audio block.
    AnyKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyOptions {
    pub verbatim_policy: VerbatimPolicy,
    /// Compression for filtered records; `None` keeps each record's own.
    pub compression:     Option<Compression>,
    pub jpeg_quality:    u8,
    /// Records read, filtered and written per round by the parallel driver.
    pub parallel_window: usize,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            verbatim_policy: VerbatimPolicy::default(),
            compression:     None,
            jpeg_quality:    DEFAULT_JPEG_QUALITY,
            parallel_window: DEFAULT_PARALLEL_WINDOW,
        }
    }
}

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Verbatim,
    Filtered,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub records:            u64,
    pub verbatim:           u64,
    pub filtered:           u64,
    /// Times the verbatim decision was computed rather than read from cache.
    pub decisions_computed: u64,
    pub blocks_transformed: u64,
    pub blocks_kept:        u64,
}

impl CopyStats {
    pub fn merge(&mut self, other: &CopyStats) {
        self.records            += other.records;
        self.verbatim           += other.verbatim;
        self.filtered           += other.filtered;
        self.decisions_computed += other.decisions_computed;
        self.blocks_transformed += other.blocks_transformed;
        self.blocks_kept        += other.blocks_kept;
    }
}

/// A block (or whole record) that was selected for filtering but left as is.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockWarning {
    pub stream_id:   StreamId,
    pub timestamp:   f64,
    /// `None` when the whole record fell back to a verbatim copy.
    pub block_index: Option<usize>,
    pub reason:      String,
}

impl fmt::Display for BlockWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block_index {
            Some(i) => write!(f, "{} @ {:.6} block #{}: {}", self.stream_id, self.timestamp, i, self.reason),
            None    => write!(f, "{} @ {:.6}: {}", self.stream_id, self.timestamp, self.reason),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CopyReport {
    pub stats:    CopyStats,
    pub warnings: Vec<BlockWarning>,
}

impl CopyReport {
    pub fn merge(&mut self, other: CopyReport) {
        self.stats.merge(&other.stats);
        self.warnings.extend(other.warnings);
    }
}

#[derive(Error, Debug)]
pub enum CopyError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    DecisionConflict(#[from] DecisionConflict),
}

// ── Copier ───────────────────────────────────────────────────────────────────

pub struct RecordFilterCopier<'a, F: FormatLookup + ?Sized, C: DecisionStore> {
    formats:  &'a F,
    cache:    C,
    hooks:    &'a mut HookRegistry,
    codec:    Box<dyn ContentCodec>,
    options:  CopyOptions,
    report:   CopyReport,
}

impl<'a, F: FormatLookup + ?Sized, C: DecisionStore> RecordFilterCopier<'a, F, C> {
    pub fn new(formats: &'a F, cache: C, hooks: &'a mut HookRegistry, options: CopyOptions) -> Self {
        let codec = Box::new(StandardCodec::new(options.jpeg_quality));
        Self { formats, cache, hooks, codec, options, report: CopyReport::default() }
    }

    pub fn with_codec(mut self, codec: Box<dyn ContentCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn stats(&self) -> &CopyStats {
        &self.report.stats
    }

    pub fn warnings(&self) -> &[BlockWarning] {
        &self.report.warnings
    }

    pub fn into_report(self) -> CopyReport {
        self.report
    }

    /// Cached verbatim decision for the record's signature, computed on first
    /// sight.
    pub fn should_copy_verbatim(&mut self, info: &RecordInfo) -> Result<bool, CopyError> {
        let signature = Signature::of(info);
        if let Some(verbatim) = self.cache.lookup(&signature) {
            return Ok(verbatim);
        }
        let verbatim = match self.formats.record_format(&signature) {
            None => true,
            Some(format) => {
                let fast_path_kind = match self.options.verbatim_policy {
                    VerbatimPolicy::DataRecordsOnly => info.kind == RecordKind::Data,
                    VerbatimPolicy::AnyKind         => true,
                };
                fast_path_kind && format.is_unfilterable()
            }
        };
        self.report.stats.decisions_computed += 1;
        debug!(%signature, verbatim, "copy decision");
        self.cache.store(signature, verbatim)?;
        Ok(verbatim)
    }

    pub fn copy_record<S: RecordSink + ?Sized>(
        &mut self,
        record: &RawRecord,
        sink:   &mut S,
    ) -> Result<Disposition, CopyError> {
        let info = *record.info();
        self.report.stats.records += 1;

        if self.should_copy_verbatim(&info)? {
            return self.forward_verbatim(record, sink);
        }

        let formats = self.formats;
        let Some(format) = formats.record_format(&Signature::of(&info)) else {
            return self.forward_verbatim(record, sink);
        };
        let mut blocks = match assemble_blocks(record, format) {
            Ok(blocks) => blocks,
            Err(reason) => {
                self.warn(&info, None, reason);
                return self.forward_verbatim(record, sink);
            }
        };

        for (index, block) in blocks.iter_mut().enumerate() {
            self.filter_block(&info, index, block);
        }

        let compression = self.options.compression.unwrap_or(record.header.compression);
        sink.write_blocks(&info, compression, &blocks)?;
        self.report.stats.filtered += 1;
        Ok(Disposition::Filtered)
    }

    fn forward_verbatim<S: RecordSink + ?Sized>(
        &mut self,
        record: &RawRecord,
        sink:   &mut S,
    ) -> Result<Disposition, CopyError> {
        sink.write_verbatim(record)?;
        self.report.stats.verbatim += 1;
        Ok(Disposition::Verbatim)
    }

    fn filter_block(&mut self, info: &RecordInfo, index: usize, block: &mut ContentBlock) {
        if block.bytes.is_empty() {
            return;
        }
        let codec = self.codec.as_ref();
        let mut framing = None;
        let outcome = match &block.spec {
            ContentSpec::Image(spec) => match self.hooks.image_hook() {
                Some(hook) => transform_image(codec, hook, info, index, spec, &block.bytes),
                None => return,
            },
            // A badly framed block is still handed to the hook: audio
            // redaction must not depend on the declared layout.
            ContentSpec::Audio(spec) => match self.hooks.audio_hook() {
                Some(hook) => {
                    framing = codec.check_audio(&block.bytes, spec).err();
                    transform_audio(hook, info, index, spec, &block.bytes)
                }
                None => return,
            },
            ContentSpec::Other { .. } => return,
        };
        if let Some(e) = framing {
            self.warn(info, Some(index), e.to_string());
        }
        match outcome {
            Ok(bytes) => {
                block.bytes = bytes;
                self.report.stats.blocks_transformed += 1;
            }
            Err(e) => {
                self.report.stats.blocks_kept += 1;
                self.warn(info, Some(index), e.to_string());
            }
        }
    }

    fn warn(&mut self, info: &RecordInfo, block_index: Option<usize>, reason: String) {
        warn!(
            stream = %info.stream_id,
            timestamp = info.timestamp,
            block = ?block_index,
            %reason,
            "keeping original bytes"
        );
        self.report.warnings.push(BlockWarning {
            stream_id: info.stream_id,
            timestamp: info.timestamp,
            block_index,
            reason,
        });
    }
}

/// Decompress a record and pair its blocks with the registered format.
fn assemble_blocks(record: &RawRecord, format: &RecordFormat) -> Result<Vec<ContentBlock>, String> {
    let payload = decode_payload(record).map_err(|e| e.to_string())?;
    let raw = split_blocks(&payload).map_err(|e| e.to_string())?;
    if raw.len() != format.blocks.len() {
        return Err(format!(
            "record has {} blocks, its format declares {}",
            raw.len(),
            format.blocks.len()
        ));
    }
    Ok(format.blocks.iter().cloned().zip(raw).map(|(spec, bytes)| ContentBlock::new(spec, bytes)).collect())
}

fn transform_image(
    codec:  &dyn ContentCodec,
    hook:   &mut dyn ImageHook,
    info:   &RecordInfo,
    index:  usize,
    spec:   &ImageSpec,
    bytes:  &[u8],
) -> Result<Vec<u8>, ContentError> {
    let mut pixels = codec.decode_image(bytes, spec)?;
    let before = (pixels.width(), pixels.height());
    hook.filter_image(info, index, spec, &mut pixels)?;
    let after = (pixels.width(), pixels.height());
    if before != after {
        return Err(ContentError::Reshaped { before, after });
    }
    codec.encode_image(&pixels, spec)
}

fn transform_audio(
    hook:   &mut dyn AudioHook,
    info:   &RecordInfo,
    index:  usize,
    spec:   &AudioSpec,
    bytes:  &[u8],
) -> Result<Vec<u8>, ContentError> {
    let mut samples = bytes.to_vec();
    hook.filter_audio(info, index, spec, &mut samples)?;
    Ok(samples)
}

// ── In-memory sink ───────────────────────────────────────────────────────────

/// Collects copied records as stored records, encoding filtered ones
/// immediately.  Used by parallel workers before the ordered merge.
#[derive(Debug, Default)]
pub struct BufferedSink {
    pub records: Vec<RawRecord>,
}

impl RecordSink for BufferedSink {
    fn write_verbatim(&mut self, record: &RawRecord) -> io::Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn write_blocks(
        &mut self,
        info:        &RecordInfo,
        compression: Compression,
        blocks:      &[ContentBlock],
    ) -> io::Result<()> {
        let payloads: Vec<&[u8]> = blocks.iter().map(|b| b.bytes.as_slice()).collect();
        let record = crate::record::encode_record(*info, compression, &payloads)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.records.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DecisionCache;
    use crate::content::PixelBuffer;
    use crate::filter::{MosaicImages, Region, SilenceAudio, StaticRegions};
    use crate::format::{ImageEncoding, PixelFormat, SampleFormat};
    use crate::index::FormatTable;
    use crate::record::encode_record;
    use image::{Rgb, RgbImage};

    const CAMERA: StreamId = StreamId::new(100, 1);
    const MIC:    StreamId = StreamId::new(300, 1);
    const IMU:    StreamId = StreamId::new(500, 1);

    fn raw_image_spec() -> ImageSpec {
        ImageSpec { encoding: ImageEncoding::Raw { pixel_format: PixelFormat::Rgb8 }, width: 8, height: 8 }
    }

    fn audio_spec() -> AudioSpec {
        AudioSpec { sample_format: SampleFormat::S16Le, channels: 1, sample_rate: 16_000 }
    }

    fn formats() -> FormatTable {
        let mut table = FormatTable::default();
        table.insert(
            Signature::new(CAMERA, RecordKind::Data, 1),
            RecordFormat::new(vec![ContentSpec::other("exposure"), ContentSpec::Image(raw_image_spec())]),
        );
        table.insert(
            Signature::new(CAMERA, RecordKind::Configuration, 1),
            RecordFormat::new(vec![ContentSpec::other("calibration")]),
        );
        table.insert(
            Signature::new(MIC, RecordKind::Data, 1),
            RecordFormat::new(vec![ContentSpec::Audio(audio_spec())]),
        );
        table.insert(
            Signature::new(IMU, RecordKind::Data, 1),
            RecordFormat::new(vec![ContentSpec::other("accel"), ContentSpec::other("gyro")]),
        );
        table
    }

    fn info(stream_id: StreamId, kind: RecordKind, timestamp: f64) -> RecordInfo {
        RecordInfo { stream_id, kind, format_version: 1, timestamp }
    }

    fn record(info: RecordInfo, blocks: &[&[u8]]) -> RawRecord {
        encode_record(info, Compression::Lz4, blocks).unwrap()
    }

    fn red_pixels() -> Vec<u8> {
        RgbImage::from_pixel(8, 8, Rgb([200, 30, 30])).into_raw()
    }

    fn blocks_of(record: &RawRecord) -> Vec<Vec<u8>> {
        split_blocks(&decode_payload(record).unwrap()).unwrap()
    }

    fn full_hooks() -> HookRegistry {
        HookRegistry::new()
            .with_image_hook(MosaicImages::new(StaticRegions::new(vec![Region::new(-4, -4, 24, 24)])))
            .with_audio_hook(SilenceAudio)
    }

    #[test]
    fn unknown_signature_is_copied_byte_for_byte() {
        let formats = formats();
        let mut hooks = full_hooks();
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, CopyOptions::default());

        let src = record(info(StreamId::new(999, 1), RecordKind::Data, 1.0), &[b"opaque"]);
        assert_eq!(copier.copy_record(&src, &mut sink).unwrap(), Disposition::Verbatim);
        assert_eq!(sink.records[0].to_bytes().unwrap(), src.to_bytes().unwrap());
    }

    #[test]
    fn telemetry_data_is_copied_verbatim() {
        let formats = formats();
        let mut hooks = full_hooks();
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, CopyOptions::default());

        let src = record(info(IMU, RecordKind::Data, 1.0), &[b"ax ay az", b"gx gy gz"]);
        assert_eq!(copier.copy_record(&src, &mut sink).unwrap(), Disposition::Verbatim);
        assert_eq!(sink.records, vec![src]);
    }

    #[test]
    fn decision_is_computed_once_per_signature() {
        let formats = formats();
        let mut hooks = full_hooks();
        let mut cache = DecisionCache::new();
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, &mut cache, &mut hooks, CopyOptions::default());

        for i in 0..25 {
            let src = record(info(IMU, RecordKind::Data, i as f64), &[b"a", b"g"]);
            copier.copy_record(&src, &mut sink).unwrap();
        }
        for i in 0..5 {
            let src = record(info(MIC, RecordKind::Data, i as f64), &[&[1, 2, 3, 4]]);
            copier.copy_record(&src, &mut sink).unwrap();
        }
        assert_eq!(copier.stats().decisions_computed, 2);
        assert_eq!(copier.stats().records, 30);
        drop(copier);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn configuration_without_filterable_blocks_follows_policy() {
        let formats = formats();
        let src = record(info(CAMERA, RecordKind::Configuration, 0.0), &[b"fx fy cx cy"]);

        let mut hooks = full_hooks();
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, CopyOptions::default());
        assert_eq!(copier.copy_record(&src, &mut sink).unwrap(), Disposition::Filtered);
        assert_eq!(blocks_of(&sink.records[0]), vec![b"fx fy cx cy".to_vec()]);

        let options = CopyOptions { verbatim_policy: VerbatimPolicy::AnyKind, ..Default::default() };
        let mut hooks = full_hooks();
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, options);
        assert_eq!(copier.copy_record(&src, &mut sink).unwrap(), Disposition::Verbatim);
    }

    #[test]
    fn image_block_is_redacted_and_order_preserved() {
        let formats = formats();
        let mut hooks = full_hooks();
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, CopyOptions::default());

        let src = record(info(CAMERA, RecordKind::Data, 2.0), &[b"1/60s", &red_pixels()]);
        assert_eq!(copier.copy_record(&src, &mut sink).unwrap(), Disposition::Filtered);

        let out = blocks_of(&sink.records[0]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], b"1/60s");
        assert_eq!(out[1].len(), red_pixels().len());
        let image = RgbImage::from_raw(8, 8, out[1].clone()).unwrap();
        assert_eq!(image.get_pixel(4, 4), &Rgb([128, 128, 128]));
        assert_eq!(sink.records[0].header.compression, Compression::Lz4);
        assert_eq!(copier.stats().blocks_transformed, 1);
    }

    #[test]
    fn audio_block_is_silenced() {
        let formats = formats();
        let mut hooks = full_hooks();
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, CopyOptions::default());

        let samples: Vec<u8> = (0..200u16).flat_map(|s| (s * 97).to_le_bytes()).collect();
        copier.copy_record(&record(info(MIC, RecordKind::Data, 0.5), &[&samples]), &mut sink).unwrap();
        assert_eq!(blocks_of(&sink.records[0]), vec![vec![0u8; samples.len()]]);
    }

    #[test]
    fn undecodable_image_keeps_original_bytes() {
        let formats = formats();
        let mut hooks = full_hooks();
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, CopyOptions::default());

        // 5 bytes cannot be an 8x8 RGB frame.
        let cam = record(info(CAMERA, RecordKind::Data, 1.0), &[b"meta", b"short"]);
        assert_eq!(copier.copy_record(&cam, &mut sink).unwrap(), Disposition::Filtered);

        assert_eq!(blocks_of(&sink.records[0]), vec![b"meta".to_vec(), b"short".to_vec()]);
        assert_eq!(copier.warnings().len(), 1);
        assert_eq!(copier.warnings()[0].block_index, Some(1));
        assert_eq!(copier.stats().blocks_kept, 1);
    }

    #[test]
    fn misframed_audio_is_still_silenced() {
        let mut formats = FormatTable::default();
        let stereo = AudioSpec { sample_format: SampleFormat::S16Le, channels: 2, sample_rate: 48_000 };
        let broken = AudioSpec { channels: 0, ..stereo.clone() };
        formats.insert(Signature::new(MIC, RecordKind::Data, 1), RecordFormat::new(vec![ContentSpec::Audio(stereo)]));
        formats.insert(Signature::new(MIC, RecordKind::Data, 2), RecordFormat::new(vec![ContentSpec::Audio(broken)]));

        let mut hooks = full_hooks();
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, CopyOptions::default());

        // 1002 bytes is not a whole number of 4-byte stereo frames.
        copier.copy_record(&record(info(MIC, RecordKind::Data, 1.0), &[&[7u8; 1002]]), &mut sink).unwrap();
        let zero_channels = RecordInfo { format_version: 2, ..info(MIC, RecordKind::Data, 2.0) };
        copier.copy_record(&record(zero_channels, &[&[7u8; 16]]), &mut sink).unwrap();

        assert_eq!(blocks_of(&sink.records[0]), vec![vec![0u8; 1002]]);
        assert_eq!(blocks_of(&sink.records[1]), vec![vec![0u8; 16]]);
        assert_eq!(copier.stats().blocks_transformed, 2);
        assert_eq!(copier.stats().blocks_kept, 0);
        assert_eq!(copier.warnings().len(), 2);
        assert!(copier.warnings().iter().all(|w| w.block_index == Some(0)));
    }

    #[test]
    fn untouched_rgba_png_survives_filtering() {
        let mut formats = FormatTable::default();
        let png = ImageSpec { encoding: ImageEncoding::Png, width: 8, height: 8 };
        formats.insert(Signature::new(CAMERA, RecordKind::Data, 1), RecordFormat::new(vec![ContentSpec::Image(png)]));

        let rgba = image::RgbaImage::from_fn(8, 8, |x, y| image::Rgba([x as u8 * 20, y as u8 * 20, 60, 0]));
        let mut encoded = std::io::Cursor::new(Vec::new());
        rgba.write_to(&mut encoded, image::ImageFormat::Png).unwrap();

        let mut hooks = HookRegistry::new()
            .with_image_hook(MosaicImages::new(StaticRegions::new(vec![Region::new(40, 40, 8, 8)])));
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, CopyOptions::default());
        copier.copy_record(&record(info(CAMERA, RecordKind::Data, 1.0), &[encoded.get_ref().as_slice()]), &mut sink).unwrap();

        let out = &blocks_of(&sink.records[0])[0];
        let back = image::load_from_memory_with_format(out, image::ImageFormat::Png).unwrap();
        assert_eq!(back.color(), image::ColorType::Rgba8);
        assert_eq!(back.to_rgba8(), rgba);
    }

    #[test]
    fn empty_blocks_are_left_alone_silently() {
        let formats = formats();
        let mut hooks = full_hooks();
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, CopyOptions::default());

        copier.copy_record(&record(info(CAMERA, RecordKind::Data, 1.0), &[b"", b""]), &mut sink).unwrap();
        assert_eq!(blocks_of(&sink.records[0]), vec![Vec::<u8>::new(), Vec::new()]);
        assert!(copier.warnings().is_empty());
    }

    #[test]
    fn block_count_mismatch_falls_back_to_verbatim() {
        let formats = formats();
        let mut hooks = full_hooks();
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, CopyOptions::default());

        let src = record(info(CAMERA, RecordKind::Data, 1.0), &[&red_pixels()]);
        assert_eq!(copier.copy_record(&src, &mut sink).unwrap(), Disposition::Verbatim);
        assert_eq!(sink.records, vec![src]);
        assert_eq!(copier.warnings()[0].block_index, None);
    }

    #[test]
    fn kinds_without_hooks_pass_through() {
        let formats = formats();
        let mut hooks = HookRegistry::new().with_audio_hook(SilenceAudio);
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, CopyOptions::default());

        let src = record(info(CAMERA, RecordKind::Data, 1.0), &[b"m", &red_pixels()]);
        copier.copy_record(&src, &mut sink).unwrap();
        assert_eq!(blocks_of(&sink.records[0]), vec![b"m".to_vec(), red_pixels()]);
    }

    struct Shrink;

    impl ImageHook for Shrink {
        fn filter_image(
            &mut self,
            _: &RecordInfo,
            _: usize,
            _: &ImageSpec,
            pixels: &mut PixelBuffer,
        ) -> Result<(), ContentError> {
            pixels.image = RgbImage::new(2, 2);
            Ok(())
        }
    }

    #[test]
    fn reshaping_hook_is_rejected() {
        let formats = formats();
        let mut hooks = HookRegistry::new().with_image_hook(Shrink);
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, CopyOptions::default());

        copier.copy_record(&record(info(CAMERA, RecordKind::Data, 1.0), &[b"m", &red_pixels()]), &mut sink).unwrap();
        assert_eq!(blocks_of(&sink.records[0])[1], red_pixels());
        assert!(copier.warnings()[0].reason.contains("Pixel grid changed"));
    }

    /// Decodes with the standard codec, refuses to encode.
    struct NoEncode(StandardCodec);

    impl ContentCodec for NoEncode {
        fn decode_image(&self, bytes: &[u8], spec: &ImageSpec) -> Result<PixelBuffer, ContentError> {
            self.0.decode_image(bytes, spec)
        }
        fn encode_image(&self, _: &PixelBuffer, _: &ImageSpec) -> Result<Vec<u8>, ContentError> {
            Err(ContentError::ImageEncode("encoder unavailable".into()))
        }
        fn check_audio(&self, bytes: &[u8], spec: &AudioSpec) -> Result<(), ContentError> {
            self.0.check_audio(bytes, spec)
        }
    }

    #[test]
    fn encode_failure_after_transform_keeps_original_bytes() {
        let formats = formats();
        let mut hooks = full_hooks();
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, CopyOptions::default())
            .with_codec(Box::new(NoEncode(StandardCodec::default())));

        let src = record(info(CAMERA, RecordKind::Data, 4.0), &[b"m", &red_pixels()]);
        assert_eq!(copier.copy_record(&src, &mut sink).unwrap(), Disposition::Filtered);

        assert_eq!(blocks_of(&sink.records[0]), vec![b"m".to_vec(), red_pixels()]);
        assert_eq!(copier.stats().blocks_kept, 1);
        assert_eq!(copier.stats().blocks_transformed, 0);
        assert_eq!(copier.warnings().len(), 1);
        assert_eq!(copier.warnings()[0].block_index, Some(1));
        assert!(copier.warnings()[0].reason.contains("encoder unavailable"));
    }

    struct Refuse;

    impl AudioHook for Refuse {
        fn filter_audio(&mut self, _: &RecordInfo, _: usize, _: &AudioSpec, _: &mut [u8]) -> Result<(), ContentError> {
            Err(ContentError::Transform("model not loaded".into()))
        }
    }

    #[test]
    fn hook_failure_keeps_original_bytes() {
        let formats = formats();
        let mut hooks = HookRegistry::new().with_audio_hook(Refuse);
        let mut sink = BufferedSink::default();
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, CopyOptions::default());

        copier.copy_record(&record(info(MIC, RecordKind::Data, 0.0), &[&[5, 6, 7, 8]]), &mut sink).unwrap();
        assert_eq!(blocks_of(&sink.records[0]), vec![vec![5, 6, 7, 8]]);
        assert_eq!(copier.stats().blocks_kept, 1);
        assert!(copier.warnings()[0].reason.contains("model not loaded"));
    }

    #[test]
    fn compression_override_applies_to_filtered_records_only() {
        let formats = formats();
        let mut hooks = full_hooks();
        let mut sink = BufferedSink::default();
        let options = CopyOptions { compression: Some(Compression::None), ..Default::default() };
        let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), &mut hooks, options);

        copier.copy_record(&record(info(IMU, RecordKind::Data, 0.0), &[b"a", b"g"]), &mut sink).unwrap();
        copier.copy_record(&record(info(MIC, RecordKind::Data, 0.0), &[&[9, 9]]), &mut sink).unwrap();
        assert_eq!(sink.records[0].header.compression, Compression::Lz4);
        assert_eq!(sink.records[1].header.compression, Compression::None);
    }
}
