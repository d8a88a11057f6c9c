//! Whole-container copy drivers.
//!
//! [`copy_file`] runs every record of a source container through one
//! [`RecordFilterCopier`] in file order.  [`copy_file_parallel`] reads the
//! source in windows of [`CopyOptions::parallel_window`] records, filters
//! each stream of a window on its own worker (Rayon when the `parallel`
//! feature is enabled), then writes the window in the original file order
//! before reading the next one.  Both produce byte-identical output and the
//! same report for the same input and options.

use std::collections::BTreeMap;
use std::io::{Read, Seek, Write};
use tracing::info;

use crate::cache::{DecisionCache, SharedDecisionCache};
use crate::copier::{BlockWarning, BufferedSink, CopyError, CopyOptions, CopyReport, CopyStats, RecordFilterCopier};
use crate::filter::HookRegistry;
use crate::index::FormatTable;
use crate::io_stream::{RecordFileReader, RecordFileWriter};
use crate::record::{RawRecord, StreamId};

/// Copy every record of `reader` into `writer` and finalize the output.
pub fn copy_file<R: Read + Seek, W: Write + Seek>(
    reader:  &mut RecordFileReader<R>,
    writer:  &mut RecordFileWriter<W>,
    options: &CopyOptions,
    hooks:   &mut HookRegistry,
) -> Result<CopyReport, CopyError> {
    writer.copy_streams_from(&reader.index);
    let formats = reader.index.format_table();

    let mut copier = RecordFilterCopier::new(&formats, DecisionCache::new(), hooks, options.clone());
    for record in reader.records() {
        let record = record?;
        copier.copy_record(&record, writer)?;
    }
    let report = copier.into_report();

    writer.finalize()?;
    log_report(&report);
    Ok(report)
}

/// A record tagged with its position in the source file.
type Sequenced = (usize, RawRecord);

/// Output of one window, or of one stream within it.
#[derive(Default)]
struct Filtered {
    records:  Vec<Sequenced>,
    stats:    CopyStats,
    /// Each warning with the position of the record that raised it.
    warnings: Vec<(usize, BlockWarning)>,
}

/// Like [`copy_file`], but filters streams concurrently.
///
/// At most one window of source records and their filtered copies is held
/// in memory.  `make_hooks` is called once per stream per window, so
/// stateful hooks are never shared between threads.  The decision cache is
/// shared for the whole run.
pub fn copy_file_parallel<R, W, H>(
    reader:     &mut RecordFileReader<R>,
    writer:     &mut RecordFileWriter<W>,
    options:    &CopyOptions,
    make_hooks: H,
) -> Result<CopyReport, CopyError>
where
    R: Read + Seek,
    W: Write + Seek,
    H: Fn() -> HookRegistry + Sync,
{
    writer.copy_streams_from(&reader.index);
    let formats = reader.index.format_table();
    let cache = SharedDecisionCache::new();
    let window = options.parallel_window.max(1);

    let mut report = CopyReport::default();
    let mut records = reader.records().enumerate();
    loop {
        let mut groups: BTreeMap<StreamId, Vec<Sequenced>> = BTreeMap::new();
        for (seq, record) in records.by_ref().take(window) {
            let record = record?;
            groups.entry(record.info().stream_id).or_default().push((seq, record));
        }
        if groups.is_empty() {
            break;
        }

        let done = filter_window(groups.into_values().collect(), &formats, &cache, options, &make_hooks)?;
        for (_, record) in &done.records {
            writer.write_raw(record)?;
        }
        report.stats.merge(&done.stats);
        report.warnings.extend(done.warnings.into_iter().map(|(_, w)| w));
    }

    writer.finalize()?;
    log_report(&report);
    Ok(report)
}

/// Filter one window's stream groups and merge them back into file order.
fn filter_window<H: Fn() -> HookRegistry + Sync>(
    groups:     Vec<Vec<Sequenced>>,
    formats:    &FormatTable,
    cache:      &SharedDecisionCache,
    options:    &CopyOptions,
    make_hooks: &H,
) -> Result<Filtered, CopyError> {
    let work = |group: Vec<Sequenced>| filter_group(group, formats, cache, options, make_hooks);

    #[cfg(feature = "parallel")]
    let results: Vec<Result<Filtered, CopyError>> = {
        use rayon::prelude::*;
        groups.into_par_iter().map(work).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let results: Vec<Result<Filtered, CopyError>> = groups.into_iter().map(work).collect();

    let mut merged = Filtered::default();
    for r in results {
        let part = r?;
        merged.records.extend(part.records);
        merged.stats.merge(&part.stats);
        merged.warnings.extend(part.warnings);
    }
    merged.records.sort_unstable_by_key(|(seq, _)| *seq);
    // stable: warnings of one record keep their block order
    merged.warnings.sort_by_key(|(seq, _)| *seq);
    Ok(merged)
}

fn filter_group<H: Fn() -> HookRegistry>(
    group:      Vec<Sequenced>,
    formats:    &FormatTable,
    cache:      &SharedDecisionCache,
    options:    &CopyOptions,
    make_hooks: &H,
) -> Result<Filtered, CopyError> {
    let mut hooks = make_hooks();
    let mut copier = RecordFilterCopier::new(formats, cache, &mut hooks, options.clone());
    let mut sink = BufferedSink::default();

    let mut seqs = Vec::with_capacity(group.len());
    let mut warning_seqs = Vec::new();
    for (seq, record) in &group {
        copier.copy_record(record, &mut sink)?;
        seqs.push(*seq);
        warning_seqs.resize(copier.warnings().len(), *seq);
    }
    let report = copier.into_report();
    Ok(Filtered {
        // copy_record forwards exactly one record per input
        records:  seqs.into_iter().zip(sink.records).collect(),
        stats:    report.stats,
        warnings: warning_seqs.into_iter().zip(report.warnings).collect(),
    })
}

fn log_report(report: &CopyReport) {
    let s = &report.stats;
    info!(
        records = s.records,
        verbatim = s.verbatim,
        filtered = s.filtered,
        decisions = s.decisions_computed,
        blocks_transformed = s.blocks_transformed,
        blocks_kept = s.blocks_kept,
        warnings = report.warnings.len(),
        "copy complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Compression;
    use crate::filter::SilenceAudio;
    use crate::format::{AudioSpec, ContentSpec, RecordFormat, SampleFormat};
    use crate::record::{RecordInfo, RecordKind};
    use std::io::Cursor;

    const MIC: StreamId = StreamId::new(300, 1);
    const IMU: StreamId = StreamId::new(500, 1);

    fn source() -> Vec<u8> {
        let mut w = RecordFileWriter::with_compression(Cursor::new(Vec::new()), Compression::None).unwrap();
        w.add_stream(MIC, "mic");
        w.add_stream(IMU, "imu");
        let audio = AudioSpec { sample_format: SampleFormat::S16Le, channels: 1, sample_rate: 16_000 };
        w.set_record_format(MIC, RecordKind::Data, 1, RecordFormat::new(vec![ContentSpec::Audio(audio)]));
        w.set_record_format(IMU, RecordKind::Data, 1, RecordFormat::new(vec![ContentSpec::other("accel")]));
        for i in 0..6u8 {
            let (id, payload) = if i % 2 == 0 { (MIC, vec![i + 1; 8]) } else { (IMU, vec![i; 12]) };
            let info = RecordInfo { stream_id: id, kind: RecordKind::Data, format_version: 1, timestamp: i as f64 };
            w.write_record(info, &[&payload]).unwrap();
        }
        w.finalize().unwrap();
        w.into_inner().into_inner()
    }

    fn sequential_copy() -> (Vec<u8>, CopyReport) {
        let mut r = RecordFileReader::open(Cursor::new(source())).unwrap();
        let mut w = RecordFileWriter::new(Cursor::new(Vec::new())).unwrap();
        let mut hooks = HookRegistry::new().with_audio_hook(SilenceAudio);
        let report = copy_file(&mut r, &mut w, &CopyOptions::default(), &mut hooks).unwrap();
        (w.into_inner().into_inner(), report)
    }

    #[test]
    fn copy_file_filters_audio_only() {
        let (out, report) = sequential_copy();
        assert_eq!(report.stats.records, 6);
        assert_eq!(report.stats.verbatim, 3);
        assert_eq!(report.stats.filtered, 3);
        assert_eq!(report.stats.decisions_computed, 2);

        let mut r = RecordFileReader::open(Cursor::new(out)).unwrap();
        for record in r.records() {
            let record = record.unwrap();
            let blocks = RecordFileReader::<Cursor<Vec<u8>>>::read_blocks(&record).unwrap();
            if record.info().stream_id == MIC {
                assert_eq!(blocks, vec![vec![0u8; 8]]);
            } else {
                assert_eq!(blocks[0].len(), 12);
                assert!(blocks[0].iter().all(|&b| b != 0));
            }
        }
    }

    #[test]
    fn parallel_copy_matches_sequential_output() {
        let (expected, expected_report) = sequential_copy();

        let mut r = RecordFileReader::open(Cursor::new(source())).unwrap();
        let mut w = RecordFileWriter::new(Cursor::new(Vec::new())).unwrap();
        let report = copy_file_parallel(&mut r, &mut w, &CopyOptions::default(), || {
            HookRegistry::new().with_audio_hook(SilenceAudio)
        })
        .unwrap();
        let out = w.into_inner().into_inner();

        assert_eq!(report.stats, expected_report.stats);
        let a = RecordFileReader::open(Cursor::new(out)).unwrap();
        let b = RecordFileReader::open(Cursor::new(expected)).unwrap();
        assert_eq!(a.index.entries, b.index.entries);
        assert_eq!(a.index.streams, b.index.streams);
    }

    #[test]
    fn small_windows_give_the_same_output() {
        let (expected, expected_report) = sequential_copy();

        let options = CopyOptions { parallel_window: 2, ..Default::default() };
        let mut r = RecordFileReader::open(Cursor::new(source())).unwrap();
        let mut w = RecordFileWriter::new(Cursor::new(Vec::new())).unwrap();
        let report = copy_file_parallel(&mut r, &mut w, &options, || {
            HookRegistry::new().with_audio_hook(SilenceAudio)
        })
        .unwrap();

        assert_eq!(report.stats, expected_report.stats);
        let a = RecordFileReader::open(Cursor::new(w.into_inner().into_inner())).unwrap();
        let b = RecordFileReader::open(Cursor::new(expected)).unwrap();
        assert_eq!(a.index.entries, b.index.entries);
    }

    #[test]
    fn warnings_follow_file_order_in_both_drivers() {
        const MIC2: StreamId = StreamId::new(300, 2);
        let mono = AudioSpec { sample_format: SampleFormat::S16Le, channels: 1, sample_rate: 16_000 };
        let mut w = RecordFileWriter::with_compression(Cursor::new(Vec::new()), Compression::None).unwrap();
        for id in [MIC2, MIC] {
            w.set_record_format(id, RecordKind::Data, 1, RecordFormat::new(vec![ContentSpec::Audio(mono.clone())]));
        }
        // Odd lengths are never whole S16 frames; every timestamp ties.
        for i in 0..6u8 {
            let id = if i % 2 == 0 { MIC } else { MIC2 };
            let info = RecordInfo { stream_id: id, kind: RecordKind::Data, format_version: 1, timestamp: 0.0 };
            w.write_record(info, &[&vec![i + 1; 3 + i as usize * 2]]).unwrap();
        }
        w.finalize().unwrap();
        let src = w.into_inner().into_inner();

        let hooks = || HookRegistry::new().with_audio_hook(SilenceAudio);
        let sequential = {
            let mut r = RecordFileReader::open(Cursor::new(src.clone())).unwrap();
            let mut w = RecordFileWriter::new(Cursor::new(Vec::new())).unwrap();
            copy_file(&mut r, &mut w, &CopyOptions::default(), &mut hooks()).unwrap()
        };
        let parallel = {
            let options = CopyOptions { parallel_window: 4, ..Default::default() };
            let mut r = RecordFileReader::open(Cursor::new(src)).unwrap();
            let mut w = RecordFileWriter::new(Cursor::new(Vec::new())).unwrap();
            copy_file_parallel(&mut r, &mut w, &options, hooks).unwrap()
        };

        assert_eq!(sequential.warnings.len(), 6);
        assert_eq!(parallel.warnings, sequential.warnings);
        let streams: Vec<StreamId> = parallel.warnings.iter().map(|w| w.stream_id).collect();
        assert_eq!(streams, vec![MIC, MIC2, MIC, MIC2, MIC, MIC2]);
    }
}
