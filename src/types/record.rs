//! Decoded packet records flowing through the pipeline.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::Value;

/// A decoded telemetry packet.
///
/// This is the unit that flows from the parser through the hub to every
/// sink. The payload is shared via `Arc` so fan-out clones stay cheap.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    /// Packet id (first byte of the decoded frame).
    pub id: u8,
    /// Capture time, taken at COBS decode success.
    pub timestamp: DateTime<Utc>,
    /// Raw packet body (payload after the id byte).
    pub payload: Arc<[u8]>,
    /// Decoded interpretation of the payload.
    pub data: DecodedData,
}

/// Decoded interpretation of a packet body.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedData {
    /// UTF-8 text (the reserved text packet id).
    Text(String),
    /// Field name to value mapping for a registered schema.
    Fields(BTreeMap<String, Value>),
    /// Unregistered id; only the raw payload is available.
    Raw,
}

impl PacketRecord {
    pub fn new(id: u8, timestamp: DateTime<Utc>, payload: Vec<u8>, data: DecodedData) -> Self {
        Self { id, timestamp, payload: payload.into(), data }
    }

    /// Packet id as `0xNN` with lowercase hex digits.
    pub fn id_hex(&self) -> String {
        format!("0x{:02x}", self.id)
    }

    /// Payload as lowercase hex.
    pub fn payload_hex(&self) -> String {
        let mut out = String::with_capacity(self.payload.len() * 2);
        for byte in self.payload.iter() {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    /// Text payload, if this is a text record.
    pub fn text(&self) -> Option<&str> {
        match &self.data {
            DecodedData::Text(text) => Some(text),
            _ => None,
        }
    }

    /// JSON value for the `data` field of serialized records.
    ///
    /// Struct records serialize their field map; raw records serialize as
    /// `{"id", "payload_hex"}`; text records have no `data` (the text goes
    /// in its own field).
    pub fn data_json(&self) -> Option<serde_json::Value> {
        match &self.data {
            DecodedData::Text(_) => None,
            DecodedData::Fields(fields) => serde_json::to_value(fields).ok(),
            DecodedData::Raw => Some(serde_json::json!({
                "id": self.id_hex(),
                "payload_hex": self.payload_hex(),
            })),
        }
    }

    /// Serializable envelope shared by the JSONL sink and the bridge.
    pub fn envelope(&self) -> RecordEnvelope<'_> {
        RecordEnvelope {
            ts: self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            id: self.id_hex(),
            payload_hex: self.payload_hex(),
            data: self.data_json(),
            text: self.text(),
        }
    }

    /// Capture time in nanoseconds since the Unix epoch.
    ///
    /// Saturates at zero for pre-epoch clocks and at `i64::MAX` past the
    /// year 2262, which is out of range for this protocol anyway.
    pub fn timestamp_nanos(&self) -> u64 {
        self.timestamp
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .try_into()
            .unwrap_or_default()
    }
}

/// One record serialized with its capture metadata.
///
/// Exactly one of `text` and `data` is present, matching the wire contract:
/// text packets carry `text`, everything else carries `data`.
#[derive(Debug, Serialize)]
pub struct RecordEnvelope<'a> {
    pub ts: String,
    pub id: String,
    pub payload_hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<&'a str>,
}
