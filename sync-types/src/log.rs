//! Log records and log headers - the data a provider serves.
//!
//! Both types use a versioned framing: two prefix bytes
//! `[struct_version, compat_version]` followed by a MessagePack body. A
//! decoder accepts any payload whose compat version it understands.
//!
//! Bodies are written as maps keyed by field name. Older decoders skip
//! keys appended by newer writers, and newer decoders fill fields that
//! older writers never wrote from their defaults.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{SyncError, Timestamp};

/// Current encoding version of [`LogRecord`].
pub const LOG_RECORD_VERSION: u8 = 2;
/// Oldest decoder version able to read a current [`LogRecord`].
const LOG_RECORD_COMPAT: u8 = 1;

/// Current encoding version of [`LogHeader`].
pub const LOG_HEADER_VERSION: u8 = 1;
const LOG_HEADER_COMPAT: u8 = 1;

const FRAME_PREFIX_LEN: usize = 2;

/// A single replicated change record.
///
/// `id` was added in version 2 and decodes as empty from version-1
/// payloads.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogRecord {
    /// Namespace the record belongs to.
    pub section: String,
    /// Key within the section.
    pub name: String,
    /// When the change was logged.
    pub timestamp: Timestamp,
    /// Opaque application payload.
    pub data: Vec<u8>,
    /// Backend-assigned id, unique within its log.
    #[serde(default)]
    pub id: String,
}

impl LogRecord {
    /// Create a record without an id; the storage backend assigns one.
    pub fn new(
        timestamp: Timestamp,
        section: impl Into<String>,
        name: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            section: section.into(),
            name: name.into(),
            timestamp,
            data,
            id: String::new(),
        }
    }

    /// Set the backend-assigned id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Encode to the versioned wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        encode_framed(LOG_RECORD_VERSION, LOG_RECORD_COMPAT, self)
    }

    /// Decode from the versioned wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        decode_framed(LOG_RECORD_VERSION, bytes)
    }
}

/// Summary of the newest committed position of a log.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogHeader {
    /// Marker of the newest record.
    pub max_marker: String,
    /// Timestamp of the newest record.
    pub max_time: Timestamp,
}

impl LogHeader {
    /// Create a header.
    pub fn new(max_marker: impl Into<String>, max_time: Timestamp) -> Self {
        Self {
            max_marker: max_marker.into(),
            max_time,
        }
    }

    /// Encode to the versioned wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        encode_framed(LOG_HEADER_VERSION, LOG_HEADER_COMPAT, self)
    }

    /// Decode from the versioned wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        decode_framed(LOG_HEADER_VERSION, bytes)
    }
}

fn encode_framed<T: Serialize>(
    version: u8,
    compat: u8,
    body: &T,
) -> Result<Vec<u8>, SyncError> {
    let mut out = vec![version, compat];
    rmp_serde::encode::write_named(&mut out, body).map_err(SyncError::Serialization)?;
    Ok(out)
}

fn decode_framed<T: DeserializeOwned>(
    decoder_version: u8,
    bytes: &[u8],
) -> Result<T, SyncError> {
    if bytes.len() < FRAME_PREFIX_LEN {
        return Err(SyncError::InvalidData(format!(
            "frame of {} bytes is shorter than its prefix",
            bytes.len()
        )));
    }
    let compat = bytes[1];
    if compat > decoder_version {
        return Err(SyncError::UnsupportedVersion(compat));
    }
    rmp_serde::from_slice(&bytes[FRAME_PREFIX_LEN..]).map_err(SyncError::Deserialization)
}
