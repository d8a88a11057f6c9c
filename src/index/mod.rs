use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::cache::Signature;
use crate::copier::FormatLookup;
use crate::format::RecordFormat;
use crate::record::{RecordKind, StreamId};

/// A record format registered for one (kind, version) of a stream.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FormatEntry {
    pub kind:           RecordKind,
    pub format_version: u32,
    pub format:         RecordFormat,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StreamInfo {
    pub id:      StreamId,
    #[serde(default)]
    pub name:    String,
    #[serde(default)]
    pub formats: Vec<FormatEntry>,
}

impl StreamInfo {
    pub fn new(id: StreamId, name: impl Into<String>) -> Self {
        Self { id, name: name.into(), formats: Vec::new() }
    }

    pub fn format(&self, kind: RecordKind, format_version: u32) -> Option<&RecordFormat> {
        self.formats
            .iter()
            .find(|f| f.kind == kind && f.format_version == format_version)
            .map(|f| &f.format)
    }

    /// Register or replace the format for (kind, version).
    pub fn set_format(&mut self, kind: RecordKind, format_version: u32, format: RecordFormat) {
        match self.formats.iter_mut().find(|f| f.kind == kind && f.format_version == format_version) {
            Some(entry) => entry.format = format,
            None => self.formats.push(FormatEntry { kind, format_version, format }),
        }
    }
}

/// Location and fingerprint of one stored record.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IndexEntry {
    pub offset:       u64,
    pub stream_id:    StreamId,
    pub kind:         RecordKind,
    pub timestamp:    f64,
    /// BLAKE3 of the stored payload bytes.
    pub content_hash: [u8; 32],
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ContainerIndex {
    pub streams:   Vec<StreamInfo>,
    pub entries:   Vec<IndexEntry>,
    /// BLAKE3 over every entry hash, in file order.
    pub root_hash: [u8; 32],
}

impl ContainerIndex {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn stream(&self, id: StreamId) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.id == id)
    }

    pub fn stream_mut(&mut self, id: StreamId) -> Option<&mut StreamInfo> {
        self.streams.iter_mut().find(|s| s.id == id)
    }

    /// The stream entry for `id`, created with an empty name if absent.
    pub fn stream_entry(&mut self, id: StreamId) -> &mut StreamInfo {
        let pos = match self.streams.iter().position(|s| s.id == id) {
            Some(pos) => pos,
            None => {
                self.streams.push(StreamInfo::new(id, ""));
                self.streams.len() - 1
            }
        };
        &mut self.streams[pos]
    }

    pub fn records_in_stream(&self, id: StreamId) -> usize {
        self.entries.iter().filter(|e| e.stream_id == id).count()
    }

    pub fn compute_root_hash(&mut self) {
        let mut hasher = blake3::Hasher::new();
        for entry in &self.entries {
            hasher.update(&entry.content_hash);
        }
        self.root_hash = hasher.finalize().into();
    }

    /// Flatten the registered formats into a signature-keyed table.
    pub fn format_table(&self) -> FormatTable {
        let mut table = FormatTable::default();
        for stream in &self.streams {
            for entry in &stream.formats {
                table.insert(
                    Signature::new(stream.id, entry.kind, entry.format_version),
                    entry.format.clone(),
                );
            }
        }
        table
    }
}

impl FormatLookup for ContainerIndex {
    fn record_format(&self, signature: &Signature) -> Option<&RecordFormat> {
        self.stream(signature.stream_id)?
            .format(signature.kind, signature.format_version)
    }
}

/// Owned signature → format map, detached from the reader so records can be
/// pulled while formats are being consulted.
#[derive(Debug, Clone, Default)]
pub struct FormatTable {
    formats: HashMap<Signature, RecordFormat>,
}

impl FormatTable {
    pub fn insert(&mut self, signature: Signature, format: RecordFormat) {
        self.formats.insert(signature, format);
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

impl FormatLookup for FormatTable {
    fn record_format(&self, signature: &Signature) -> Option<&RecordFormat> {
        self.formats.get(signature)
    }
}
