//! WebSocket bridge for visualization clients.
//!
//! Speaks the `foxglove.websocket.v1` subprotocol: JSON control messages
//! with an `op` discriminator, binary frames for channel data. One channel
//! always carries the normalized packet record; extra channels are derived
//! through the [`ChannelEmitter`] seam.

mod channels;
mod messages;
mod server;

pub use channels::{
    ChannelEmitter, ChannelSpec, LogEmitter, TemperatureEmitter, LOG_SCHEMA, PACKET_SCHEMA,
    TEMPERATURE_SCHEMA,
};
pub use messages::{encode_message_data, ClientMessage, SubscriptionRequest, SUBPROTOCOL};
pub use server::{BridgeConfig, BridgeServer};
