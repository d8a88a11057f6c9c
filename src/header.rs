//! Fixed 64-byte file header at offset 0.
//!
//! The writer reserves the header on creation and patches it in place on
//! `finalize()`, once the index location and record count are known.
//! A header with `index_offset == 0` belongs to a file that was never
//! finalized; such files can still be read through the record scanner.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::Utc;
use std::io::{self, Read, Write};
use thiserror::Error;
use uuid::Uuid;

pub const MAGIC:       &[u8; 4] = b"RECF";
pub const VERSION:     u32      = 1;
pub const HEADER_SIZE: usize    = 64;

/// Bytes of zero padding after the last defined field.
const RESERVED: usize = 8;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Invalid magic number")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    pub version:      u32,
    pub file_uuid:    Uuid,
    /// Unix seconds at creation time.
    pub created_at:   i64,
    pub index_offset: u64,
    pub index_size:   u64,
    pub record_count: u64,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            version:      VERSION,
            file_uuid:    Uuid::new_v4(),
            created_at:   Utc::now().timestamp(),
            index_offset: 0,
            index_size:   0,
            record_count: 0,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.index_offset != 0
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_all(self.file_uuid.as_bytes())?;
        writer.write_i64::<LittleEndian>(self.created_at)?;
        writer.write_u64::<LittleEndian>(self.index_offset)?;
        writer.write_u64::<LittleEndian>(self.index_size)?;
        writer.write_u64::<LittleEndian>(self.record_count)?;
        writer.write_all(&[0u8; RESERVED])?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(HeaderError::InvalidMagic);
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(HeaderError::UnsupportedVersion(version));
        }
        let mut uuid_bytes = [0u8; 16];
        reader.read_exact(&mut uuid_bytes)?;
        let header = Self {
            version,
            file_uuid:    Uuid::from_bytes(uuid_bytes),
            created_at:   reader.read_i64::<LittleEndian>()?,
            index_offset: reader.read_u64::<LittleEndian>()?,
            index_size:   reader.read_u64::<LittleEndian>()?,
            record_count: reader.read_u64::<LittleEndian>()?,
        };
        let mut reserved = [0u8; RESERVED];
        reader.read_exact(&mut reserved)?;
        Ok(header)
    }
}
