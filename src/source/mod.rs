//! Telemetry byte sources and their supervision.
//!
//! A [`ByteSource`] produces connected byte streams; the
//! [`SourceSupervisor`] owns the dial-run-backoff loop and feeds each
//! connection to the framer, which splits the stream on `0x00` delimiters
//! and hands whole frames to the pipeline.

mod framer;
mod supervisor;

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{PipelineError, Result};

pub use supervisor::{SourceOptions, SourceSupervisor};

/// A dialable source of telemetry bytes.
///
/// Implementations abstract over the transport (TCP to an RTT server in
/// production, an in-process listener in tests). The supervisor treats a
/// returned stream as one connection lifetime.
#[async_trait]
pub trait ByteSource: Send + Sync + 'static {
    type Stream: AsyncRead + Send + Unpin;

    /// Establish one connection.
    async fn connect(&self) -> Result<Self::Stream>;

    /// Human-readable endpoint for logging.
    fn endpoint(&self) -> &str;
}

/// TCP byte source with a dial timeout.
#[derive(Debug, Clone)]
pub struct TcpSource {
    addr: String,
    dial_timeout: Duration,
}

impl TcpSource {
    pub fn new(addr: impl Into<String>, dial_timeout: Duration) -> Self {
        Self { addr: addr.into(), dial_timeout }
    }
}

#[async_trait]
impl ByteSource for TcpSource {
    type Stream = TcpStream;

    async fn connect(&self) -> Result<TcpStream> {
        match timeout(self.dial_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(err)) => Err(PipelineError::connect(&self.addr, err)),
            Err(_) => Err(PipelineError::Timeout { duration: self.dial_timeout }),
        }
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}
