pub mod header;
pub mod compression;
pub mod record;
pub mod format;
pub mod index;
pub mod cache;
pub mod content;
pub mod filter;
pub mod copier;
pub mod io_stream;
pub mod copy;

pub use header::FileHeader;
pub use compression::Compression;
pub use record::{RawRecord, RecordInfo, RecordKind, StreamId};
pub use format::{AudioSpec, ContentKind, ContentSpec, ImageSpec, RecordFormat};
pub use index::{ContainerIndex, FormatTable};
pub use cache::{DecisionCache, DecisionStore, SharedDecisionCache, Signature};
pub use content::{ContentBlock, ContentCodec, PixelBuffer, StandardCodec};
pub use filter::{AudioHook, HookRegistry, ImageHook, MosaicImages, SilenceAudio};
pub use copier::{CopyError, CopyOptions, CopyReport, FormatLookup, RecordFilterCopier, RecordSink, VerbatimPolicy};
pub use io_stream::{RecordFileReader, RecordFileWriter};
pub use copy::{copy_file, copy_file_parallel};
