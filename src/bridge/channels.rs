//! Bridge channels and collaborator-derived message emitters.
//!
//! The bridge always owns one channel: the normalized packet record.
//! Everything else (markers, transforms, rendered images, ...) belongs to
//! external collaborators, which plug in through [`ChannelEmitter`]: derive
//! zero or one JSON message per record for one advertised channel. The two
//! emitters that need nothing beyond the record itself ship here.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{DecodedData, PacketRecord};

/// One advertised channel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSpec {
    pub id: u64,
    pub topic: String,
    pub encoding: String,
    pub schema_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub schema_encoding: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub schema: String,
}

impl ChannelSpec {
    /// JSON-encoded channel with a JSON schema.
    pub fn json(
        id: u64,
        topic: impl Into<String>,
        schema_name: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            id,
            topic: topic.into(),
            encoding: "json".to_string(),
            schema_name: schema_name.into(),
            schema_encoding: "jsonschema".to_string(),
            schema: schema.into(),
        }
    }
}

/// Derives messages for one extra channel from the record stream.
///
/// Implementations must be cheap: `derive` runs on the broadcast path for
/// every record. Returning `None` means this record produces nothing on
/// the emitter's channel.
pub trait ChannelEmitter: Send + Sync {
    /// The channel to advertise. The server may renumber `id` to avoid
    /// collisions; topic and schema are kept as-is.
    fn channel(&self) -> ChannelSpec;

    /// Derive this channel's message for one record.
    fn derive(&self, record: &PacketRecord) -> Option<serde_json::Value>;
}

/// JSON schema advertised for the packet channel.
pub const PACKET_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "id": { "type": "string" },
    "ts": { "type": "string" },
    "payload_hex": { "type": "string" },
    "data": { "type": "object", "additionalProperties": true },
    "text": { "type": "string" }
  },
  "required": ["id", "payload_hex"]
}"#;

/// JSON schema advertised for the log channel.
pub const LOG_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "timestamp": {
      "type": "object",
      "properties": {
        "sec": { "type": "integer" },
        "nsec": { "type": "integer" }
      },
      "required": ["sec", "nsec"]
    },
    "level": { "type": "integer" },
    "message": { "type": "string" },
    "name": { "type": "string" },
    "file": { "type": "string" },
    "line": { "type": "integer" }
  },
  "required": ["timestamp", "level", "message", "name", "file", "line"]
}"#;

/// JSON schema advertised for the temperature channel.
pub const TEMPERATURE_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "timestamp": {
      "type": "object",
      "properties": {
        "sec": { "type": "integer" },
        "nsec": { "type": "integer" }
      },
      "required": ["sec", "nsec"]
    },
    "value": { "type": "number" },
    "unit": { "type": "string" }
  },
  "required": ["timestamp", "value", "unit"]
}"#;

#[derive(Debug, Serialize)]
struct Stamp {
    sec: i64,
    nsec: u32,
}

impl Stamp {
    fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self { sec: ts.timestamp(), nsec: ts.timestamp_subsec_nanos() }
    }
}

/// Republishes text packets as `foxglove.Log` messages.
pub struct LogEmitter {
    pub channel_id: u64,
    pub topic: String,
    pub logger_name: String,
}

impl Default for LogEmitter {
    fn default() -> Self {
        Self {
            channel_id: 2,
            topic: "/telemux/log".to_string(),
            logger_name: "telemux".to_string(),
        }
    }
}

const LOG_LEVEL_INFO: u8 = 2;

impl ChannelEmitter for LogEmitter {
    fn channel(&self) -> ChannelSpec {
        ChannelSpec::json(self.channel_id, &self.topic, "foxglove.Log", LOG_SCHEMA)
    }

    fn derive(&self, record: &PacketRecord) -> Option<serde_json::Value> {
        let text = record.text()?;
        Some(serde_json::json!({
            "timestamp": Stamp::from_timestamp(record.timestamp),
            "level": LOG_LEVEL_INFO,
            "message": text,
            "name": self.logger_name,
            "file": "",
            "line": 0,
        }))
    }
}

/// Republishes one numeric field of one packet id as a temperature reading.
pub struct TemperatureEmitter {
    pub channel_id: u64,
    pub topic: String,
    /// Packet id carrying the reading.
    pub packet_id: u8,
    /// Field name within the decoded record.
    pub field: String,
    pub unit: String,
}

impl TemperatureEmitter {
    pub fn new(packet_id: u8, field: impl Into<String>) -> Self {
        Self {
            channel_id: 3,
            topic: "/telemux/temperature".to_string(),
            packet_id,
            field: field.into(),
            unit: "C".to_string(),
        }
    }
}

impl ChannelEmitter for TemperatureEmitter {
    fn channel(&self) -> ChannelSpec {
        ChannelSpec::json(
            self.channel_id,
            &self.topic,
            "telemux.Temperature",
            TEMPERATURE_SCHEMA,
        )
    }

    fn derive(&self, record: &PacketRecord) -> Option<serde_json::Value> {
        if record.id != self.packet_id {
            return None;
        }
        let fields = match &record.data {
            DecodedData::Fields(fields) => fields,
            _ => return None,
        };
        let value = fields.get(&self.field)?.as_f64();
        Some(serde_json::json!({
            "timestamp": Stamp::from_timestamp(record.timestamp),
            "value": value,
            "unit": self.unit,
        }))
    }
}
