//! Streaming container engine: writer and reader.
//!
//! # Writer
//! [`RecordFileWriter`] reserves the file header, then appends records in
//! submission order.  Streams and their record formats are registered in the
//! in-memory index; `finalize()` writes the zstd-compressed JSON index after
//! the last record and patches the header at offset 0.
//!
//! # Reader
//! [`RecordFileReader::open`] reads the header and index and iterates
//! records lazily in file order, verifying each record's CRC32.
//!
//! # Recovery
//! When the index is missing (the writer never finalized) or unreadable,
//! [`RecordFileReader::recover`] rebuilds the entry list by scanning record
//! headers sequentially from the end of the file header.  Record formats
//! live only in the index and cannot be recovered, so every record of a
//! recovered file has an unknown signature.

use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, warn};

use crate::compression::{Compression, DEFAULT_ZSTD_LEVEL};
use crate::content::ContentBlock;
use crate::copier::RecordSink;
use crate::format::RecordFormat;
use crate::header::{FileHeader, HEADER_SIZE};
use crate::index::{ContainerIndex, IndexEntry, StreamInfo};
use crate::record::{
    decode_payload, encode_record, split_blocks, RawRecord, RecordHeader, RecordInfo, RecordKind, StreamId,
};

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct RecordFileWriter<W: Write + Seek> {
    writer:          W,
    pub header:      FileHeader,
    pub index:       ContainerIndex,
    /// Compression used by [`RecordFileWriter::write_record`].
    pub compression: Compression,
    finalized:       bool,
}

impl<W: Write + Seek> RecordFileWriter<W> {
    pub fn new(writer: W) -> io::Result<Self> {
        Self::with_compression(writer, Compression::default())
    }

    pub fn with_compression(mut writer: W, compression: Compression) -> io::Result<Self> {
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&[0u8; HEADER_SIZE])?; // reserved; overwritten on finalize
        Ok(Self {
            writer,
            header: FileHeader::new(),
            index: ContainerIndex::default(),
            compression,
            finalized: false,
        })
    }

    /// Register a stream, or rename it if already present.
    pub fn add_stream(&mut self, id: StreamId, name: impl Into<String>) {
        self.index.stream_entry(id).name = name.into();
    }

    pub fn set_record_format(&mut self, id: StreamId, kind: RecordKind, format_version: u32, format: RecordFormat) {
        self.index.stream_entry(id).set_format(kind, format_version, format);
    }

    /// Copy the stream table and every record format of another container.
    pub fn copy_streams_from(&mut self, source: &ContainerIndex) {
        for stream in &source.streams {
            let entry: &mut StreamInfo = self.index.stream_entry(stream.id);
            entry.name = stream.name.clone();
            for f in &stream.formats {
                entry.set_format(f.kind, f.format_version, f.format.clone());
            }
        }
    }

    /// Frame and write a record from its block payloads.
    pub fn write_record(&mut self, info: RecordInfo, blocks: &[&[u8]]) -> io::Result<()> {
        let compression = self.compression;
        self.write_payloads(info, compression, blocks)
    }

    fn write_payloads(&mut self, info: RecordInfo, compression: Compression, blocks: &[&[u8]]) -> io::Result<()> {
        let record = encode_record(info, compression, blocks)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.write_raw(&record)
    }

    /// Append a stored record unchanged.
    pub fn write_raw(&mut self, record: &RawRecord) -> io::Result<()> {
        if self.finalized {
            return Err(io::Error::new(io::ErrorKind::Other, "writer already finalized"));
        }
        let info = record.info();
        self.index.stream_entry(info.stream_id);

        let offset = self.writer.stream_position()?;
        record.header.write(&mut self.writer)?;
        self.writer.write_all(&record.payload)?;

        self.index.entries.push(IndexEntry {
            offset,
            stream_id:    info.stream_id,
            kind:         info.kind,
            timestamp:    info.timestamp,
            content_hash: blake3::hash(&record.payload).into(),
        });
        Ok(())
    }

    pub fn records_written(&self) -> usize {
        self.index.entries.len()
    }

    /// Write the index and patch the header.  Must be called exactly once.
    pub fn finalize(&mut self) -> io::Result<()> {
        if self.finalized {
            return Err(io::Error::new(io::ErrorKind::Other, "writer already finalized"));
        }
        self.index.compute_root_hash();

        let index_json = self.index.to_bytes()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let index_blob = Compression::Zstd { level: DEFAULT_ZSTD_LEVEL }
            .compress(&index_json)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        let index_offset = self.writer.stream_position()?;
        self.writer.write_all(&index_blob)?;
        let end = self.writer.stream_position()?;

        self.header.index_offset = index_offset;
        self.header.index_size   = index_blob.len() as u64;
        self.header.record_count = self.index.entries.len() as u64;

        self.writer.seek(SeekFrom::Start(0))?;
        self.header.write(&mut self.writer)?;
        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()?;
        self.finalized = true;
        debug!(records = self.header.record_count, streams = self.index.streams.len(), "container finalized");
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Seek> RecordSink for RecordFileWriter<W> {
    fn write_verbatim(&mut self, record: &RawRecord) -> io::Result<()> {
        self.write_raw(record)
    }

    fn write_blocks(&mut self, info: &RecordInfo, compression: Compression, blocks: &[ContentBlock]) -> io::Result<()> {
        let payloads: Vec<&[u8]> = blocks.iter().map(|b| b.bytes.as_slice()).collect();
        self.write_payloads(*info, compression, &payloads)
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct RecordFileReader<R: Read + Seek> {
    reader:     R,
    pub header: FileHeader,
    pub index:  ContainerIndex,
}

impl<R: Read + Seek> RecordFileReader<R> {
    /// Open a finalized container.  Fails if the index is absent or corrupt;
    /// use [`RecordFileReader::recover`] for those files.
    pub fn open(mut reader: R) -> io::Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let header = FileHeader::read(&mut reader)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if !header.is_finalized() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "container has no index (never finalized)"));
        }

        reader.seek(SeekFrom::Start(header.index_offset))?;
        let blob = read_sized(&mut reader, header.index_size)?;
        let json = zstd::decode_all(&blob[..])?;
        let index = ContainerIndex::from_bytes(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(Self { reader, header, index })
    }

    /// Open a container whose index is missing or unreadable by scanning
    /// its records.
    pub fn recover(mut reader: R) -> io::Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let header = FileHeader::read(&mut reader).unwrap_or_else(|e| {
            warn!(error = %e, "unreadable file header, scanning anyway");
            FileHeader::new()
        });
        let mut this = Self { reader, header, index: ContainerIndex::default() };
        this.index = this.scan_records()?;
        Ok(this)
    }

    /// Rebuild the stream table and entry list by reading every record
    /// header from `HEADER_SIZE` onward.  Stops at the first header that does
    /// not parse, at a truncated payload, or at the index offset if known.
    ///
    /// Returns the reconstructed index without modifying `self.index`.
    pub fn scan_records(&mut self) -> io::Result<ContainerIndex> {
        let limit = if self.header.is_finalized() { Some(self.header.index_offset) } else { None };
        let mut index = ContainerIndex::default();
        let mut pos = HEADER_SIZE as u64;

        loop {
            if limit.is_some_and(|l| pos >= l) {
                break;
            }
            self.reader.seek(SeekFrom::Start(pos))?;
            let header = match RecordHeader::read(&mut self.reader) {
                Ok(h) => h,
                Err(_) => break,
            };
            let payload = match read_sized(&mut self.reader, header.stored_size as u64) {
                Ok(payload) => payload,
                Err(_) => {
                    warn!(offset = pos, "truncated record payload, scan stopped");
                    break;
                }
            };
            let record = RawRecord { header, payload };
            if !record.checksum_ok() {
                warn!(offset = pos, "record checksum mismatch, scan stopped");
                break;
            }

            let info = record.info();
            index.stream_entry(info.stream_id);
            index.entries.push(IndexEntry {
                offset:       pos,
                stream_id:    info.stream_id,
                kind:         info.kind,
                timestamp:    info.timestamp,
                content_hash: blake3::hash(&record.payload).into(),
            });
            pos += record.stored_len() as u64;
        }

        index.compute_root_hash();
        Ok(index)
    }

    /// Read and verify the record stored at `offset`.
    pub fn read_record_at(&mut self, offset: u64) -> io::Result<RawRecord> {
        self.reader.seek(SeekFrom::Start(offset))?;
        let header = RecordHeader::read(&mut self.reader)?;
        let payload = read_sized(&mut self.reader, header.stored_size as u64)?;
        let record = RawRecord { header, payload };
        if !record.checksum_ok() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record checksum mismatch at offset {offset}"),
            ));
        }
        Ok(record)
    }

    /// Decompress a record and split it into block payloads.
    pub fn read_blocks(record: &RawRecord) -> io::Result<Vec<Vec<u8>>> {
        let payload = decode_payload(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        split_blocks(&payload)
    }

    /// Records in file order, read lazily.
    pub fn records(&mut self) -> Records<'_, R> {
        Records { reader: self, next: 0 }
    }

    /// Check every record's CRC32 and BLAKE3 hash against the index.
    /// Returns the offsets of records that fail.
    pub fn verify(&mut self) -> io::Result<Vec<u64>> {
        let entries = self.index.entries.clone();
        let mut bad = Vec::new();
        for entry in &entries {
            match self.read_record_at(entry.offset) {
                Ok(record) => {
                    let hash: [u8; 32] = blake3::hash(&record.payload).into();
                    if hash != entry.content_hash {
                        bad.push(entry.offset);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => bad.push(entry.offset),
                Err(e) => return Err(e),
            }
        }
        Ok(bad)
    }
}

/// Read exactly `size` bytes.  The buffer grows with the data actually
/// present, so a corrupt size field cannot force a large allocation.
fn read_sized<R: Read>(reader: &mut R, size: u64) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.take(size).read_to_end(&mut buf)?;
    if buf.len() as u64 != size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {size} bytes, found {}", buf.len()),
        ));
    }
    Ok(buf)
}

pub struct Records<'a, R: Read + Seek> {
    reader: &'a mut RecordFileReader<R>,
    next:   usize,
}

impl<R: Read + Seek> Iterator for Records<'_, R> {
    type Item = io::Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.reader.index.entries.get(self.next)?.offset;
        self.next += 1;
        Some(self.reader.read_record_at(offset))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.reader.index.entries.len().saturating_sub(self.next);
        (left, Some(left))
    }
}
