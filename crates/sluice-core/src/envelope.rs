//! Envelope decoder — turns a raw stream payload into an [`Envelope`].
//!
//! Two wire shapes are accepted and tried in order: the structured shape,
//! where `docker` is an object carrying `container_id`, then the legacy
//! shape, where `docker` is a bare string. Missing or `null` fields decode to
//! empty values and a missing timestamp to `0001-01-01T00:00:00Z`; only a
//! type mismatch rejects a shape. A payload that fits neither shape is a
//! [`DecodeError`], which callers discard.
//!
//! Both encodings are self-describing (JSON, and MessagePack with named
//! fields), so the shape fallback works the same way for each.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::types::{ContainerRef, Encoding, Envelope, Origin};

/// Neither envelope shape decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("json payload matched no envelope shape (structured: {structured}; legacy: {legacy})")]
    Json {
        structured: serde_json::Error,
        legacy: serde_json::Error,
    },
    #[error("msgpack payload matched no envelope shape (structured: {structured}; legacy: {legacy})")]
    MsgPack {
        structured: rmp_serde::decode::Error,
        legacy: rmp_serde::decode::Error,
    },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("msgpack encoding failed: {0}")]
    MsgPack(#[from] rmp_serde::encode::Error),
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// Seconds from the Unix epoch back to `0001-01-01T00:00:00Z`.
const ZERO_TIME_SECS: i64 = -62_135_596_800;

/// The timestamp of an envelope that carries none.
pub fn zero_time() -> DateTime<FixedOffset> {
    DateTime::<Utc>::from_timestamp(ZERO_TIME_SECS, 0)
        .unwrap_or_default()
        .fixed_offset()
}

/// Treat an explicit `null` like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_zero_time<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<DateTime<FixedOffset>>::deserialize(deserializer)?.unwrap_or_else(zero_time))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DockerWire {
    #[serde(default, deserialize_with = "null_as_default")]
    container_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StructuredWire {
    #[serde(default, deserialize_with = "null_as_default")]
    log: String,
    #[serde(default, deserialize_with = "null_as_default")]
    stream: String,
    #[serde(default, deserialize_with = "null_as_default")]
    kubernetes: Origin,
    #[serde(default, deserialize_with = "null_as_default")]
    docker: DockerWire,
    #[serde(rename = "@timestamp", default = "zero_time", deserialize_with = "null_as_zero_time")]
    timestamp: DateTime<FixedOffset>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LegacyWire {
    #[serde(default, deserialize_with = "null_as_default")]
    log: String,
    #[serde(default, deserialize_with = "null_as_default")]
    stream: String,
    #[serde(default, deserialize_with = "null_as_default")]
    kubernetes: Origin,
    #[serde(default, deserialize_with = "null_as_default")]
    docker: String,
    #[serde(rename = "@timestamp", default = "zero_time", deserialize_with = "null_as_zero_time")]
    timestamp: DateTime<FixedOffset>,
}

impl From<StructuredWire> for Envelope {
    fn from(w: StructuredWire) -> Self {
        Envelope {
            log: w.log,
            stream: w.stream,
            origin: w.kubernetes,
            container: ContainerRef::Structured {
                container_id: w.docker.container_id,
            },
            timestamp: w.timestamp,
        }
    }
}

impl From<LegacyWire> for Envelope {
    fn from(w: LegacyWire) -> Self {
        Envelope {
            log: w.log,
            stream: w.stream,
            origin: w.kubernetes,
            container: ContainerRef::Legacy(w.docker),
            timestamp: w.timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Decode / encode
// ---------------------------------------------------------------------------

/// Decode `raw` using `encoding`, structured shape first.
pub fn decode(raw: &[u8], encoding: Encoding) -> Result<Envelope, DecodeError> {
    match encoding {
        Encoding::Json => match serde_json::from_slice::<StructuredWire>(raw) {
            Ok(wire) => Ok(wire.into()),
            Err(structured) => serde_json::from_slice::<LegacyWire>(raw)
                .map(Envelope::from)
                .map_err(|legacy| DecodeError::Json { structured, legacy }),
        },
        Encoding::MsgPack => match rmp_serde::from_slice::<StructuredWire>(raw) {
            Ok(wire) => Ok(wire.into()),
            Err(structured) => rmp_serde::from_slice::<LegacyWire>(raw)
                .map(Envelope::from)
                .map_err(|legacy| DecodeError::MsgPack { structured, legacy }),
        },
    }
}

impl Envelope {
    /// Encode in the wire shape matching `self.container`.
    pub fn encode(&self, encoding: Encoding) -> Result<Vec<u8>, EncodeError> {
        match &self.container {
            ContainerRef::Structured { container_id } => {
                let wire = StructuredWire {
                    log: self.log.clone(),
                    stream: self.stream.clone(),
                    kubernetes: self.origin.clone(),
                    docker: DockerWire {
                        container_id: container_id.clone(),
                    },
                    timestamp: self.timestamp,
                };
                encode_wire(&wire, encoding)
            }
            ContainerRef::Legacy(id) => {
                let wire = LegacyWire {
                    log: self.log.clone(),
                    stream: self.stream.clone(),
                    kubernetes: self.origin.clone(),
                    docker: id.clone(),
                    timestamp: self.timestamp,
                };
                encode_wire(&wire, encoding)
            }
        }
    }
}

fn encode_wire<T: Serialize>(wire: &T, encoding: Encoding) -> Result<Vec<u8>, EncodeError> {
    Ok(match encoding {
        Encoding::Json => serde_json::to_vec(wire)?,
        // Named fields: maps keyed by field name, like the shipper's output.
        Encoding::MsgPack => rmp_serde::to_vec_named(wire)?,
    })
}
