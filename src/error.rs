//! Error types for the ingest pipeline.
//!
//! All failures in the crate surface as [`PipelineError`]. The enum carries
//! enough structure for an embedder to decide between retrying, dropping the
//! offending unit of work, or exiting:
//!
//! - [`PipelineError::is_retryable`] identifies transient I/O conditions that
//!   the source supervisor recovers from with backoff.
//! - [`PipelineError::is_fatal`] identifies conditions that must stop the
//!   whole pipeline (misconfiguration, a dead listener).
//! - [`PipelineError::exit_code`] maps an error to the process exit status an
//!   embedding CLI should use: `2` for configuration errors, `1` for fatal
//!   runtime errors. A clean cancellation returns `Ok(())` and exits `0`.

use std::time::Duration;
use thiserror::Error;

use crate::protocol::cobs::CobsError;

/// Result type alias for pipeline operations.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("failed to connect to {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("malformed frame")]
    Frame {
        #[from]
        source: CobsError,
    },

    #[error("decode error for packet 0x{id:02x}: {details}")]
    Decode { id: u8, details: String },

    #[error("invalid schema '{struct_name}': {reason}")]
    Schema { struct_name: String, reason: String },

    #[error("failed to listen on {addr}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Connect { .. } => true,
            PipelineError::Io { .. } => true,
            PipelineError::Timeout { .. } => true,
            PipelineError::Config { .. } => false,
            PipelineError::Frame { .. } => false,
            PipelineError::Decode { .. } => false,
            PipelineError::Schema { .. } => false,
            PipelineError::Listen { .. } => false,
        }
    }

    /// Returns whether this error must stop the whole pipeline.
    ///
    /// Everything else is localized: a bad frame, a bad record, or a bad
    /// client never stops ingestion.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Config { .. } | PipelineError::Listen { .. }
        )
    }

    /// Process exit status for an embedding CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config { .. } => 2,
            _ => 1,
        }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        PipelineError::Config { reason: reason.into() }
    }

    /// Helper constructor for dial failures.
    pub fn connect(endpoint: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Connect { endpoint: endpoint.into(), source }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io { context: context.into(), source }
    }

    /// Helper constructor for decode failures.
    pub fn decode(id: u8, details: impl Into<String>) -> Self {
        PipelineError::Decode { id, details: details.into() }
    }

    /// Helper constructor for schema validation failures.
    pub fn schema(struct_name: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Schema {
            struct_name: struct_name.into(),
            reason: reason.into(),
        }
    }

    /// Helper constructor for listener failures.
    pub fn listen(addr: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Listen { addr: addr.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(test)]
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn error_messages_contain_their_context(
                reason in ".*",
                id in any::<u8>(),
                details in ".*",
                duration_ms in 1u64..60_000u64
            ) {
                let config = PipelineError::config(reason.clone());
                prop_assert!(config.to_string().contains(&reason));

                let decode = PipelineError::decode(id, details.clone());
                let msg = decode.to_string();
                let id_hex = format!("{:02x}", id);
                prop_assert!(msg.contains(&id_hex));
                prop_assert!(msg.contains(&details));

                let timeout = PipelineError::Timeout {
                    duration: Duration::from_millis(duration_ms),
                };
                prop_assert!(!timeout.to_string().is_empty());
            }

            #[test]
            fn retryable_and_fatal_are_disjoint(
                reason in ".*",
                endpoint in "[a-z0-9.:]+",
            ) {
                let errors = vec![
                    PipelineError::config(reason.clone()),
                    PipelineError::connect(
                        endpoint.clone(),
                        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                    ),
                    PipelineError::io(
                        reason.clone(),
                        std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"),
                    ),
                    PipelineError::listen(
                        endpoint,
                        std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
                    ),
                ];
                for err in errors {
                    prop_assert!(!(err.is_retryable() && err.is_fatal()));
                }
            }
        }
    }

    #[test]
    fn exit_codes_match_cli_contract() {
        assert_eq!(PipelineError::config("bad").exit_code(), 2);
        let listen = PipelineError::listen(
            "127.0.0.1:8765",
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        );
        assert_eq!(listen.exit_code(), 1);
        let decode = PipelineError::decode(0x42, "size mismatch");
        assert_eq!(decode.exit_code(), 1);
    }

    #[test]
    fn fatal_classification() {
        assert!(PipelineError::config("bad").is_fatal());
        let listen = PipelineError::listen(
            "127.0.0.1:0",
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        );
        assert!(listen.is_fatal());
        let io = PipelineError::io(
            "read",
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"),
        );
        assert!(!io.is_fatal());
        assert!(io.is_retryable());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<PipelineError>();

        let error = PipelineError::config("test");
        let _: &dyn std::error::Error = &error;
    }
}
