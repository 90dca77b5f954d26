//! Pipeline configuration.
//!
//! All knobs recognized by the core, deserializable from any serde format the
//! embedding CLI chooses. Durations are plain millisecond integers so that
//! config files stay flat; accessor methods convert to [`Duration`].

use serde::Deserialize;
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Configuration for the ingest pipeline.
///
/// Every field has a default; a `PipelineConfig::default()` with only
/// `source_addr` overridden is a complete working configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// TCP address of the telemetry source (RTT server).
    pub source_addr: String,
    /// Base reconnect backoff in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Reconnect backoff cap in milliseconds.
    pub reconnect_max_ms: u64,
    /// Dial timeout in milliseconds.
    pub dial_timeout_ms: u64,
    /// Per-read deadline in milliseconds; 0 disables the deadline.
    pub read_timeout_ms: u64,
    /// Buffered reader capacity in bytes for the framer.
    pub reader_buf: usize,
    /// Bounded queue size between the framer and the transformer.
    pub frame_queue_size: usize,
    /// Bounded queue size into the hub actor.
    pub hub_broadcast_buffer: usize,
    /// Default per-subscriber queue size.
    pub hub_client_buffer_default: usize,
    /// Per-WebSocket-client send queue size.
    pub ws_send_buffer: usize,
    /// Packet id whose payload is interpreted as UTF-8 text.
    ///
    /// The [`crate::PacketRegistry`] handed to [`crate::Pipeline::new`]
    /// must be constructed with this same id; the pipeline refuses to
    /// start on a mismatch.
    pub text_packet_id: u8,
    /// Grace period for cooperative shutdown in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_addr: defaults::source_addr(),
            reconnect_interval_ms: defaults::reconnect_interval_ms(),
            reconnect_max_ms: defaults::reconnect_max_ms(),
            dial_timeout_ms: defaults::dial_timeout_ms(),
            read_timeout_ms: defaults::read_timeout_ms(),
            reader_buf: defaults::reader_buf(),
            frame_queue_size: defaults::frame_queue_size(),
            hub_broadcast_buffer: defaults::hub_broadcast_buffer(),
            hub_client_buffer_default: defaults::hub_client_buffer_default(),
            ws_send_buffer: defaults::ws_send_buffer(),
            text_packet_id: defaults::text_packet_id(),
            shutdown_grace_ms: defaults::shutdown_grace_ms(),
        }
    }
}

impl PipelineConfig {
    /// Validate the configuration.
    ///
    /// Rejections here are configuration errors (exit code 2 for an
    /// embedding CLI); the pipeline refuses to start.
    pub fn validate(&self) -> Result<()> {
        if self.source_addr.is_empty() {
            return Err(PipelineError::config("source_addr must not be empty"));
        }
        if self.reader_buf == 0 {
            return Err(PipelineError::config("reader_buf must be positive"));
        }
        if self.frame_queue_size == 0 {
            return Err(PipelineError::config("frame_queue_size must be positive"));
        }
        if self.hub_broadcast_buffer == 0 {
            return Err(PipelineError::config("hub_broadcast_buffer must be positive"));
        }
        if self.hub_client_buffer_default == 0 {
            return Err(PipelineError::config(
                "hub_client_buffer_default must be positive",
            ));
        }
        if self.ws_send_buffer == 0 {
            return Err(PipelineError::config("ws_send_buffer must be positive"));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(PipelineError::config("reconnect_interval_ms must be positive"));
        }
        if self.reconnect_max_ms < self.reconnect_interval_ms {
            return Err(PipelineError::config(
                "reconnect_max_ms must be at least reconnect_interval_ms",
            ));
        }
        Ok(())
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// Per-read deadline, `None` when disabled.
    pub fn read_timeout(&self) -> Option<Duration> {
        if self.read_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.read_timeout_ms))
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

mod defaults {
    pub fn source_addr() -> String {
        "127.0.0.1:19021".to_string()
    }

    pub fn reconnect_interval_ms() -> u64 {
        1_000
    }

    pub fn reconnect_max_ms() -> u64 {
        30_000
    }

    pub fn dial_timeout_ms() -> u64 {
        5_000
    }

    pub fn read_timeout_ms() -> u64 {
        0
    }

    pub fn reader_buf() -> usize {
        64 * 1024
    }

    pub fn frame_queue_size() -> usize {
        256
    }

    pub fn hub_broadcast_buffer() -> usize {
        256
    }

    pub fn hub_client_buffer_default() -> usize {
        100
    }

    pub fn ws_send_buffer() -> usize {
        256
    }

    pub fn text_packet_id() -> u8 {
        0xFF
    }

    pub fn shutdown_grace_ms() -> u64 {
        5_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.reader_buf, 65536);
        assert_eq!(cfg.frame_queue_size, 256);
        assert_eq!(cfg.hub_client_buffer_default, 100);
        assert_eq!(cfg.text_packet_id, 0xFF);
        assert_eq!(cfg.reconnect_interval(), Duration::from_secs(1));
        assert_eq!(cfg.reconnect_max(), Duration::from_secs(30));
        assert_eq!(cfg.dial_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.read_timeout(), None);
    }

    #[test]
    fn rejects_zero_sized_queues() {
        let cfg = PipelineConfig { frame_queue_size: 0, ..Default::default() };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let cfg = PipelineConfig { reader_buf: 0, ..Default::default() };
        assert!(cfg.validate().is_err());

        let cfg = PipelineConfig { source_addr: String::new(), ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_backoff_cap_below_base() {
        let cfg = PipelineConfig {
            reconnect_interval_ms: 5_000,
            reconnect_max_ms: 1_000,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn deserializes_partial_config() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{"source_addr": "10.0.0.7:19021", "read_timeout_ms": 250}"#,
        )
        .unwrap();
        assert_eq!(cfg.source_addr, "10.0.0.7:19021");
        assert_eq!(cfg.read_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.ws_send_buffer, 256);
    }

    #[test]
    fn rejects_unknown_fields() {
        let result: std::result::Result<PipelineConfig, _> =
            serde_json::from_str(r#"{"sourc_addr": "oops"}"#);
        assert!(result.is_err());
    }
}
