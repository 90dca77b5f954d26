//! WebSocket bridge wire messages.
//!
//! Control messages are JSON text frames with an `op` discriminator; data
//! flows as binary frames. The vocabulary follows the
//! `foxglove.websocket.v1` subprotocol so stock visualization clients can
//! connect without adaptation.

use serde::{Deserialize, Serialize};

use super::channels::ChannelSpec;

/// Negotiated WebSocket subprotocol.
pub const SUBPROTOCOL: &str = "foxglove.websocket.v1";

/// Binary frame opcode for channel data.
pub const OP_MESSAGE_DATA: u8 = 0x01;

/// First server message after the upgrade.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub op: &'static str,
    pub name: String,
    pub capabilities: Vec<String>,
    pub supported_encodings: Vec<String>,
    pub session_id: String,
}

impl ServerInfo {
    pub fn new(name: String, session_id: String) -> Self {
        Self {
            op: "serverInfo",
            name,
            capabilities: Vec::new(),
            supported_encodings: Vec::new(),
            session_id,
        }
    }
}

/// Second server message: the channel table.
#[derive(Debug, Clone, Serialize)]
pub struct Advertise<'a> {
    pub op: &'static str,
    pub channels: &'a [ChannelSpec],
}

impl<'a> Advertise<'a> {
    pub fn new(channels: &'a [ChannelSpec]) -> Self {
        Self { op: "advertise", channels }
    }
}

/// Client-to-server control messages.
///
/// Anything that fails to parse into this enum (unknown ops included) is
/// ignored by the read loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Subscribe { subscriptions: Vec<SubscriptionRequest> },
    #[serde(rename_all = "camelCase")]
    Unsubscribe { subscription_ids: Vec<u32> },
}

/// One client subscription binding.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    /// Client-chosen subscription id, scoped to its connection.
    pub id: u32,
    /// Server-advertised channel id.
    pub channel_id: u64,
}

/// Encode one channel data frame:
/// `[0x01] [subscription id u32 LE] [log time u64 LE ns] [JSON payload]`.
pub fn encode_message_data(subscription_id: u32, log_time_ns: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + 8 + payload.len());
    out.push(OP_MESSAGE_DATA);
    out.extend_from_slice(&subscription_id.to_le_bytes());
    out.extend_from_slice(&log_time_ns.to_le_bytes());
    out.extend_from_slice(payload);
    out
}
