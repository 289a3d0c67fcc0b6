//! Core types for sluice-core.
//!
//! This module defines the data shared across the pipeline: the decoded
//! [`Envelope`] read from the stream, the [`ClassifiedLine`] produced from
//! it, and the [`Encoding`] selector for raw payloads.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::envelope::null_as_default;

/// One decoded stream payload.
///
/// Both accepted wire shapes collapse into this type; [`ContainerRef`]
/// records which one the payload arrived in.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Raw line text as written by the workload.
    pub log: String,
    /// `stdout` or `stderr`.
    pub stream: String,
    /// Where the line came from.
    pub origin: Origin,
    /// Container identifier.
    pub container: ContainerRef,
    /// Collection timestamp, with the producer's UTC offset preserved.
    pub timestamp: DateTime<FixedOffset>,
}

/// Pod-level metadata attached by the log shipper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    #[serde(default, rename = "namespace_name", deserialize_with = "null_as_default")]
    pub namespace: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pod_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pod_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub container_name: String,
    /// May be partial; lookups fall back to the empty string.
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: HashMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub host: String,
}

impl Origin {
    /// Label value for `key`, or `""` when absent.
    pub fn label(&self, key: &str) -> &str {
        self.labels.get(key).map(String::as_str).unwrap_or("")
    }
}

/// The container identifier in either envelope shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerRef {
    /// Structured shape: `{"container_id": "..."}`.
    Structured { container_id: String },
    /// Legacy shape: the identifier as a bare string.
    Legacy(String),
}

impl ContainerRef {
    pub fn container_id(&self) -> &str {
        match self {
            ContainerRef::Structured { container_id } => container_id,
            ContainerRef::Legacy(id) => id,
        }
    }
}

/// Which side of the platform a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineOrigin {
    ControlPlane,
    Application,
}

impl std::fmt::Display for LineOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineOrigin::ControlPlane => write!(f, "control-plane"),
            LineOrigin::Application => write!(f, "application"),
        }
    }
}

/// An origin-tagged, rendered log line ready for storage or streaming.
///
/// Produced and consumed within one pipeline pass; never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedLine {
    /// Application the line is filed under.
    pub target_key: String,
    /// Canonical one-line rendering.
    pub rendered: String,
    /// Container name, for process filtering. `None` for control-plane lines.
    pub process_hint: Option<String>,
    pub origin: LineOrigin,
}

/// Payload encoding on the stream. Chosen by configuration, never sniffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Json,
    /// MessagePack with named fields, as the platform's log shipper emits.
    #[serde(alias = "binary")]
    MsgPack,
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Json => write!(f, "json"),
            Encoding::MsgPack => write!(f, "msgpack"),
        }
    }
}

impl std::str::FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "msgpack" | "binary" => Ok(Encoding::MsgPack),
            other => Err(format!("unknown message encoding: {other}")),
        }
    }
}
