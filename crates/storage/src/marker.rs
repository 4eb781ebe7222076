//! Datafile markers
//!
//! Every datafile and journal is a header followed by a sequence of markers.
//! A marker is self-delimiting with a length prefix and a CRC32 checksum.
//!
//! # Marker Layout
//!
//! ```text
//! ┌─────────────────┬─────────────┬──────────┬─────────────────────┬──────────┐
//! │ Length (4 bytes)│ Version (1) │ Type (1) │ Payload (variable)  │ CRC32 (4)│
//! └─────────────────┴─────────────┴──────────┴─────────────────────┴──────────┘
//!
//! Document payload:
//! ┌──────────┬──────────┬───────────┬───────────────────────────┬──────────────┐
//! │ DocId (8)│ RevId (8)│ Flags (1) │ Edge endpoints (32, opt.) │ JSON body    │
//! └──────────┴──────────┴───────────┴───────────────────────────┴──────────────┘
//!
//! Deletion payload:
//! ┌──────────┬──────────┬──────────────────────────┐
//! │ DocId (8)│ RevId (8)│ Deleted at (8, µs epoch) │
//! └──────────┴──────────┴──────────────────────────┘
//! ```
//!
//! The length field covers everything after itself, checksum included.
//! All integers are little-endian.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use crc32fast::Hasher;
use serde_json::Value as JsonValue;
use shoal_core::{
    CollectionId, DocumentHandle, DocumentId, EdgeEndpoints, Error, RevisionId,
};

/// Current marker format version
pub const MARKER_FORMAT_VERSION: u8 = 1;

const TYPE_DOCUMENT: u8 = 1;
const TYPE_DELETION: u8 = 2;

const FLAG_EDGE: u8 = 0b0000_0001;

/// Length prefix + version + type + crc
const FRAME_OVERHEAD: usize = 4 + 1 + 1 + 4;

/// A document revision stored in a datafile
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMarker {
    /// Document identifier
    pub did: DocumentId,
    /// Revision written by this marker
    pub rid: RevisionId,
    /// Endpoints when the document is an edge
    pub edge: Option<EdgeEndpoints>,
    /// Serialized JSON attributes
    pub body: Vec<u8>,
}

impl DocumentMarker {
    /// Build a marker from a JSON document
    pub fn new(
        did: DocumentId,
        rid: RevisionId,
        edge: Option<EdgeEndpoints>,
        body: &JsonValue,
    ) -> Result<Self, Error> {
        Ok(Self {
            did,
            rid,
            edge,
            body: serde_json::to_vec(body)?,
        })
    }

    /// Parse the stored body
    pub fn body_json(&self) -> Result<JsonValue, Error> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::corrupted(format!("document {} body: {}", self.did, e)))
    }
}

/// A document deletion stored in a datafile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionMarker {
    /// Deleted document
    pub did: DocumentId,
    /// Revision of the deletion itself
    pub rid: RevisionId,
    /// Wall-clock time of the deletion
    pub deleted_at: DateTime<Utc>,
}

/// Datafile marker
#[derive(Debug, Clone, PartialEq)]
pub enum Marker {
    /// Document revision
    Document(DocumentMarker),
    /// Document deletion
    Deletion(DeletionMarker),
}

impl Marker {
    /// Document the marker refers to
    pub fn did(&self) -> DocumentId {
        match self {
            Marker::Document(m) => m.did,
            Marker::Deletion(m) => m.did,
        }
    }

    /// Revision carried by the marker
    pub fn rid(&self) -> RevisionId {
        match self {
            Marker::Document(m) => m.rid,
            Marker::Deletion(m) => m.rid,
        }
    }

    /// Size of the encoded marker in bytes
    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD
            + match self {
                Marker::Document(m) => {
                    let edge_len = if m.edge.is_some() { 32 } else { 0 };
                    17 + edge_len + m.body.len()
                }
                Marker::Deletion(_) => 24,
            }
    }

    /// Serialize the marker
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.encoded_len() - 4);
        payload.push(MARKER_FORMAT_VERSION);
        // Writes into a Vec cannot fail.
        match self {
            Marker::Document(m) => {
                payload.push(TYPE_DOCUMENT);
                let _ = payload.write_u64::<LittleEndian>(m.did.as_u64());
                let _ = payload.write_u64::<LittleEndian>(m.rid.as_u64());
                match &m.edge {
                    Some(edge) => {
                        payload.push(FLAG_EDGE);
                        for handle in [edge.from, edge.to] {
                            let _ = payload.write_u64::<LittleEndian>(handle.cid.as_u64());
                            let _ = payload.write_u64::<LittleEndian>(handle.did.as_u64());
                        }
                    }
                    None => payload.push(0),
                }
                payload.extend_from_slice(&m.body);
            }
            Marker::Deletion(m) => {
                payload.push(TYPE_DELETION);
                let _ = payload.write_u64::<LittleEndian>(m.did.as_u64());
                let _ = payload.write_u64::<LittleEndian>(m.rid.as_u64());
                let _ = payload.write_i64::<LittleEndian>(m.deleted_at.timestamp_micros());
            }
        }

        let crc = compute_crc(&payload);
        let total_len = payload.len() + 4;
        let mut record = Vec::with_capacity(4 + total_len);
        let _ = record.write_u32::<LittleEndian>(total_len as u32);
        record.extend_from_slice(&payload);
        let _ = record.write_u32::<LittleEndian>(crc);
        record
    }

    /// Deserialize a marker from the front of `bytes`
    ///
    /// Returns (marker, bytes_consumed) on success.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), MarkerError> {
        if bytes.len() < 4 {
            return Err(MarkerError::InsufficientData);
        }
        let length = LittleEndian::read_u32(&bytes[0..4]) as usize;
        if length < FRAME_OVERHEAD - 4 {
            return Err(MarkerError::InvalidFormat("length below minimum frame"));
        }
        if bytes.len() < 4 + length {
            return Err(MarkerError::InsufficientData);
        }

        let payload = &bytes[4..4 + length - 4];
        let stored_crc = LittleEndian::read_u32(&bytes[4 + length - 4..4 + length]);
        let computed_crc = compute_crc(payload);
        if stored_crc != computed_crc {
            return Err(MarkerError::ChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }

        if payload[0] != MARKER_FORMAT_VERSION {
            return Err(MarkerError::UnsupportedVersion(payload[0]));
        }
        let body = &payload[2..];
        let marker = match payload[1] {
            TYPE_DOCUMENT => Marker::Document(decode_document(body)?),
            TYPE_DELETION => Marker::Deletion(decode_deletion(body)?),
            other => return Err(MarkerError::UnknownType(other)),
        };
        Ok((marker, 4 + length))
    }
}

fn decode_document(body: &[u8]) -> Result<DocumentMarker, MarkerError> {
    if body.len() < 17 {
        return Err(MarkerError::InvalidFormat("document marker too short"));
    }
    let did = DocumentId(LittleEndian::read_u64(&body[0..8]));
    let rid = RevisionId(LittleEndian::read_u64(&body[8..16]));
    let flags = body[16];
    let mut rest = &body[17..];

    let edge = if flags & FLAG_EDGE != 0 {
        if rest.len() < 32 {
            return Err(MarkerError::InvalidFormat("edge endpoints truncated"));
        }
        let handle = |b: &[u8]| {
            DocumentHandle::new(
                CollectionId(LittleEndian::read_u64(&b[0..8])),
                DocumentId(LittleEndian::read_u64(&b[8..16])),
            )
        };
        let edge = EdgeEndpoints {
            from: handle(&rest[0..16]),
            to: handle(&rest[16..32]),
        };
        rest = &rest[32..];
        Some(edge)
    } else {
        None
    };

    Ok(DocumentMarker {
        did,
        rid,
        edge,
        body: rest.to_vec(),
    })
}

fn decode_deletion(body: &[u8]) -> Result<DeletionMarker, MarkerError> {
    if body.len() != 24 {
        return Err(MarkerError::InvalidFormat("deletion marker has wrong size"));
    }
    let micros = LittleEndian::read_i64(&body[16..24]);
    let deleted_at = Utc
        .timestamp_opt(
            micros.div_euclid(1_000_000),
            (micros.rem_euclid(1_000_000) * 1_000) as u32,
        )
        .single()
        .ok_or(MarkerError::InvalidFormat("deletion timestamp out of range"))?;
    Ok(DeletionMarker {
        did: DocumentId(LittleEndian::read_u64(&body[0..8])),
        rid: RevisionId(LittleEndian::read_u64(&body[8..16])),
        deleted_at,
    })
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Marker parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkerError {
    /// Not enough data to parse a marker
    #[error("insufficient data to parse marker")]
    InsufficientData,

    /// Marker structure is invalid
    #[error("invalid marker format: {0}")]
    InvalidFormat(&'static str),

    /// Checksum verification failed
    #[error("checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the marker
        expected: u32,
        /// Checksum computed over the payload
        computed: u32,
    },

    /// Unsupported format version
    #[error("unsupported marker version: {0}")]
    UnsupportedVersion(u8),

    /// Unknown marker type tag
    #[error("unknown marker type: {0}")]
    UnknownType(u8),
}

impl From<MarkerError> for Error {
    fn from(e: MarkerError) -> Self {
        Error::Corrupted(e.to_string())
    }
}
