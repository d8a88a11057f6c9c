//! Record framing.
//!
//! On disk every record is a fixed [`RECORD_HEADER_SIZE`]-byte header
//! followed by `stored_size` payload bytes (compressed per the header's
//! compression tag).  The uncompressed payload is a block table:
//!
//! ```text
//! u16 block_count | u32 len[block_count] | block bytes, concatenated
//! ```
//!
//! Block content types are not stored per record; they come from the
//! record format registered for the record's signature in the index.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use crc32fast::Hasher;

use crate::compression::{Compression, CompressionError};

pub const RECORD_MAGIC:       u32   = 0x4452_4352; // "RCRD"
pub const RECORD_HEADER_SIZE: usize = 36;

// ── Stream identity ──────────────────────────────────────────────────────────

/// A stream is identified by the kind of device that produced it and an
/// instance number distinguishing several devices of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    pub type_id:  u16,
    pub instance: u16,
}

impl StreamId {
    pub const fn new(type_id: u16, instance: u16) -> Self {
        Self { type_id, instance }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.type_id, self.instance)
    }
}

impl FromStr for StreamId {
    type Err = String;

    /// Parses the `type-instance` form used by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_id, instance) = s
            .split_once('-')
            .ok_or_else(|| format!("stream id must look like 1201-1, got {s:?}"))?;
        Ok(Self {
            type_id:  type_id.trim().parse().map_err(|e| format!("bad stream type {type_id:?}: {e}"))?,
            instance: instance.trim().parse().map_err(|e| format!("bad stream instance {instance:?}: {e}"))?,
        })
    }
}

// ── Record kind ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Configuration = 1,
    State         = 2,
    /// Payload data, the bulk of any recording.
    Data          = 3,
}

impl RecordKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(RecordKind::Configuration),
            2 => Some(RecordKind::State),
            3 => Some(RecordKind::Data),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordKind::Configuration => "configuration",
            RecordKind::State         => "state",
            RecordKind::Data          => "data",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Metadata of a record, readable from its header without touching the payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordInfo {
    pub stream_id:      StreamId,
    pub kind:           RecordKind,
    pub format_version: u32,
    /// Seconds on the recording's clock.
    pub timestamp:      f64,
}

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    pub info:              RecordInfo,
    pub compression:       Compression,
    pub uncompressed_size: u32,
    pub stored_size:       u32,
    /// CRC32 of the stored (possibly compressed) payload.
    pub checksum:          u32,
}

impl RecordHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(RECORD_MAGIC)?;
        writer.write_u16::<LittleEndian>(self.info.stream_id.type_id)?;
        writer.write_u16::<LittleEndian>(self.info.stream_id.instance)?;
        writer.write_u8(self.info.kind as u8)?;
        writer.write_u8(self.compression.tag())?;
        writer.write_i8(self.compression.level())?;
        writer.write_u8(0)?;
        writer.write_u32::<LittleEndian>(self.info.format_version)?;
        writer.write_f64::<LittleEndian>(self.info.timestamp)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u32::<LittleEndian>(self.stored_size)?;
        writer.write_u32::<LittleEndian>(self.checksum)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != RECORD_MAGIC {
            return Err(invalid(format!("bad record magic {magic:#010x}")));
        }
        let type_id  = reader.read_u16::<LittleEndian>()?;
        let instance = reader.read_u16::<LittleEndian>()?;
        let kind_raw = reader.read_u8()?;
        let tag      = reader.read_u8()?;
        let level    = reader.read_i8()?;
        let _pad     = reader.read_u8()?;

        let kind = RecordKind::from_u8(kind_raw)
            .ok_or_else(|| invalid(format!("unknown record kind {kind_raw}")))?;
        let compression = Compression::from_tag(tag, level)
            .ok_or_else(|| invalid(format!("unknown compression tag {tag}")))?;

        Ok(Self {
            info: RecordInfo {
                stream_id:      StreamId { type_id, instance },
                kind,
                format_version: reader.read_u32::<LittleEndian>()?,
                timestamp:      reader.read_f64::<LittleEndian>()?,
            },
            compression,
            uncompressed_size: reader.read_u32::<LittleEndian>()?,
            stored_size:       reader.read_u32::<LittleEndian>()?,
            checksum:          reader.read_u32::<LittleEndian>()?,
        })
    }
}

// ── Raw record ───────────────────────────────────────────────────────────────

/// A record exactly as stored: header plus stored payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub header:  RecordHeader,
    pub payload: Vec<u8>,
}

impl RawRecord {
    pub fn info(&self) -> &RecordInfo {
        &self.header.info
    }

    pub fn stored_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }

    /// The on-disk bytes of this record.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.stored_len());
        self.header.write(&mut out)?;
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    pub fn checksum_ok(&self) -> bool {
        crc32(&self.payload) == self.header.checksum
    }
}

/// Frame and compress `blocks` into a stored record.
pub fn encode_record(
    info:        RecordInfo,
    compression: Compression,
    blocks:      &[&[u8]],
) -> Result<RawRecord, CompressionError> {
    let payload = pack_blocks(blocks);
    let stored  = compression.compress(&payload)?;
    let header = RecordHeader {
        info,
        compression,
        uncompressed_size: payload.len() as u32,
        stored_size:       stored.len() as u32,
        checksum:          crc32(&stored),
    };
    Ok(RawRecord { header, payload: stored })
}

/// Verify and decompress a stored record's payload.
pub fn decode_payload(record: &RawRecord) -> Result<Vec<u8>, CompressionError> {
    let actual = crc32(&record.payload);
    if actual != record.header.checksum {
        return Err(CompressionError::Checksum { expected: record.header.checksum, actual });
    }
    record.header.compression
        .decompress(&record.payload, record.header.uncompressed_size as usize)
}

// ── Block table ──────────────────────────────────────────────────────────────

pub fn pack_blocks(blocks: &[&[u8]]) -> Vec<u8> {
    let body: usize = blocks.iter().map(|b| b.len()).sum();
    let mut out = Vec::with_capacity(2 + 4 * blocks.len() + body);
    out.extend_from_slice(&(blocks.len() as u16).to_le_bytes());
    for block in blocks {
        out.extend_from_slice(&(block.len() as u32).to_le_bytes());
    }
    for block in blocks {
        out.extend_from_slice(block);
    }
    out
}

/// Split an uncompressed payload into its blocks.  The block table must
/// account for every payload byte.
pub fn split_blocks(payload: &[u8]) -> io::Result<Vec<Vec<u8>>> {
    let mut cursor = payload;
    let count = cursor.read_u16::<LittleEndian>()? as usize;
    let mut lens = Vec::with_capacity(count);
    for _ in 0..count {
        lens.push(cursor.read_u32::<LittleEndian>()? as usize);
    }
    let declared: usize = lens.iter().sum();
    if declared != cursor.len() {
        return Err(invalid(format!(
            "block table declares {declared} bytes, payload holds {}",
            cursor.len()
        )));
    }
    let mut blocks = Vec::with_capacity(count);
    for len in lens {
        let (block, rest) = cursor.split_at(len);
        blocks.push(block.to_vec());
        cursor = rest;
    }
    Ok(blocks)
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
