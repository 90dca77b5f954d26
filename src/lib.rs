//! Host-side receiver for COBS-framed embedded telemetry.
//!
//! telemux ingests the binary stream an RTT-style TCP server relays from
//! firmware, decodes each frame against a declared schema, and fans the
//! decoded records out to concurrent sinks without letting any sink stall
//! the others or the ingest path.
//!
//! # Pipeline
//!
//! ```text
//! source supervisor → framer → (COBS → parser) → hub ─┬─ JSONL sink
//!                                                     └─ WebSocket bridge
//! ```
//!
//! - The **source supervisor** owns the dial–frame–backoff loop over one
//!   TCP address; frames in flight during a disconnect are dropped.
//! - The **framer** splits the stream on `0x00` delimiters.
//! - The **parser** decodes `[id][body]` payloads against the
//!   [`PacketRegistry`]: UTF-8 text for the reserved text id, a field map
//!   for registered schemas, raw passthrough for everything else.
//! - The **hub** broadcasts records with a non-blocking send per
//!   subscriber; a full queue drops the record for that subscriber only.
//! - The **bridge** serves `foxglove.websocket.v1` clients with per-client
//!   bounded send queues and subscription routing.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use telemux::{
//!     BridgeConfig, FieldDef, FieldType, PacketRegistry, PacketSchema, Pipeline,
//!     PipelineConfig,
//! };
//! use tokio_util::sync::CancellationToken;
//! use tokio::io;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(PacketRegistry::new(0xFF));
//!     registry.register(
//!         0x42,
//!         PacketSchema::new(
//!             "sample_t",
//!             8,
//!             true,
//!             vec![
//!                 FieldDef { name: "value".into(), ty: FieldType::Int32, offset: 0, size: 4 },
//!                 FieldDef { name: "tick_ms".into(), ty: FieldType::UInt32, offset: 4, size: 4 },
//!             ],
//!         )?,
//!     )?;
//!
//!     let cancel = CancellationToken::new();
//!     let pipeline = Pipeline::new(PipelineConfig::default(), registry)?
//!         .with_jsonl(io::stdout())
//!         .with_bridge(BridgeConfig::default(), vec![]);
//!
//!     let result = pipeline.run(cancel).await;
//!     std::process::exit(match result {
//!         Ok(()) => 0,
//!         Err(err) => err.exit_code(),
//!     });
//! }
//! ```

pub mod bridge;
mod config;
mod error;
mod hub;
mod pipeline;
pub mod protocol;
mod sink;
pub mod source;
pub mod types;

pub use bridge::{BridgeConfig, BridgeServer, ChannelEmitter, ChannelSpec};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use hub::{Hub, HubOptions, HubSubscription};
pub use pipeline::Pipeline;
pub use protocol::{PacketParser, PacketRegistry};
pub use sink::JsonlSink;
pub use source::{ByteSource, SourceOptions, SourceSupervisor, TcpSource};
pub use types::{DecodedData, FieldDef, FieldType, PacketRecord, PacketSchema, Value};
