//! Encoding and decoding of application payloads.
//!
//! Every published message is a JSON document tagged with a `tipo` field,
//! wrapped in an [`Envelope`] that carries the serialized bytes plus the
//! wire attributes (`timestamp`, `origin`) consumers use for tracing.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::utils::{Error, Result};

pub mod payload;

pub use payload::{Event, LogRecord, Notification, Payload, TaggedPayload, UserAction};


/// Attribute key carrying the encode-time wall clock, RFC 3339 formatted.
pub const TIMESTAMP_ATTR: &str = "timestamp";

/// Attribute key identifying the publishing component.
pub const ORIGIN_ATTR: &str = "origin";

/// Value stamped into the [`ORIGIN_ATTR`] attribute on every encode.
pub const ORIGIN: &str = "pubrelay-publisher";

/// Serialized payload bytes plus the metadata attributes that travel with
/// them through the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub data: Vec<u8>,
    pub attributes: HashMap<String, String>,
}

/// Serializes a payload and stamps the standard attributes, timestamping
/// with the current wall clock.
pub fn encode(payload: &Payload) -> Result<Envelope> {
    encode_at(payload, Utc::now())
}

/// Serializes a payload, stamping `at` as the timestamp attribute.
///
/// Split out from [`encode`] so tests can pin the clock.
pub fn encode_at(payload: &Payload, at: DateTime<Utc>) -> Result<Envelope> {
    let data = serde_json::to_vec(payload).map_err(Error::Serialization)?;
    let mut attributes = HashMap::new();
    attributes.insert(
        TIMESTAMP_ATTR.to_string(),
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
    );
    attributes.insert(ORIGIN_ATTR.to_string(), ORIGIN.to_string());
    Ok(Envelope { data, attributes })
}

/// Deserializes the payload carried by an envelope.
pub fn decode(envelope: &Envelope) -> Result<Payload> {
    decode_bytes(&envelope.data)
}

/// Deserializes a payload from raw message bytes.
pub fn decode_bytes(data: &[u8]) -> Result<Payload> {
    serde_json::from_slice(data).map_err(Error::Deserialization)
}
