//! Schema log record format.
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────────┴──────────┘
//! ```
//!
//! Length counts everything after itself. The CRC covers the format byte and
//! the payload. The payload is a MessagePack-encoded [`SchemaRecord`].

use crc32fast::Hasher;
use ferrule_core::{SchemaEntry, SchemaKey};
use serde::{Deserialize, Serialize};

/// Current schema record format version
pub const SCHEMA_RECORD_FORMAT_VERSION: u8 = 1;

/// Bytes of framing around a payload: length + format version + CRC
pub const RECORD_OVERHEAD: usize = 4 + 1 + 4;

/// One change to the schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchemaRecord {
    /// A function or aggregate was defined or replaced
    Put(SchemaEntry),
    /// A function or aggregate was dropped
    Remove(SchemaKey),
}

impl SchemaRecord {
    /// Key the record applies to
    pub fn key(&self) -> SchemaKey {
        match self {
            SchemaRecord::Put(entry) => entry.schema_key(),
            SchemaRecord::Remove(key) => key.clone(),
        }
    }

    /// Serialize to a framed record
    pub fn to_bytes(&self) -> Result<Vec<u8>, RecordError> {
        let body = rmp_serde::to_vec(self).map_err(|e| RecordError::Payload(e.to_string()))?;

        let mut payload = Vec::with_capacity(1 + body.len());
        payload.push(SCHEMA_RECORD_FORMAT_VERSION);
        payload.extend_from_slice(&body);
        let crc = compute_crc(&payload);

        let total_len = payload.len() + 4;
        let mut record = Vec::with_capacity(4 + total_len);
        record.extend_from_slice(&(total_len as u32).to_le_bytes());
        record.extend_from_slice(&payload);
        record.extend_from_slice(&crc.to_le_bytes());
        Ok(record)
    }

    /// Parse the record at the start of `bytes`
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), RecordError> {
        let length = read_u32(bytes, 0).ok_or(RecordError::InsufficientData)? as usize;
        if length < 5 {
            return Err(RecordError::InvalidFormat);
        }
        if bytes.len() < 4 + length {
            return Err(RecordError::InsufficientData);
        }

        let payload = &bytes[4..4 + length - 4];
        let stored = read_u32(bytes, length).ok_or(RecordError::InsufficientData)?;
        let computed = compute_crc(payload);
        if stored != computed {
            return Err(RecordError::ChecksumMismatch {
                expected: stored,
                computed,
            });
        }

        let format_version = payload[0];
        if format_version != SCHEMA_RECORD_FORMAT_VERSION {
            return Err(RecordError::UnsupportedVersion(format_version));
        }
        let record = rmp_serde::from_slice(&payload[1..])
            .map_err(|e| RecordError::Payload(e.to_string()))?;
        Ok((record, 4 + length))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let word: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(word))
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Record parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// Not enough data to parse record
    #[error("Insufficient data to parse record")]
    InsufficientData,

    /// Record format is invalid
    #[error("Invalid record format")]
    InvalidFormat,

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected checksum from record
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Unsupported format version
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// Payload did not (de)serialize
    #[error("Invalid payload: {0}")]
    Payload(String),
}

impl RecordError {
    /// True when the bytes simply end early, as after a crash mid-append
    pub fn is_torn(&self) -> bool {
        matches!(self, RecordError::InsufficientData)
    }
}
