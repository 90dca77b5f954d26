//! Newline-delimited JSON sink.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::hub::HubSubscription;
use crate::types::PacketRecord;

/// Writes one JSON object per record, one record per line.
///
/// Line shape: `ts` (RFC-3339 with nanoseconds, UTC), `id` (`0xNN`),
/// `payload_hex`, and exactly one of `text` / `data`. A record that fails
/// to serialize is dropped; a writer failure is terminal and stops the
/// sink (the rest of the pipeline keeps running).
pub struct JsonlSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Consume the subscription until it ends or cancellation fires.
    pub async fn run(
        mut self,
        mut subscription: HubSubscription,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut written = 0u64;
        loop {
            let record = tokio::select! {
                _ = cancel.cancelled() => break,
                record = subscription.recv() => match record {
                    Some(record) => record,
                    None => break,
                },
            };

            let line = match encode_line(&record) {
                Ok(line) => line,
                Err(err) => {
                    warn!(id = %record.id_hex(), error = %err, "dropping unserializable record");
                    continue;
                }
            };

            match self.write_line(&line).await {
                Ok(()) => written += 1,
                Err(err) if is_terminal(&err) => {
                    warn!(error = %err, "jsonl writer gone, stopping sink");
                    return Err(PipelineError::io("jsonl writer failed", err));
                }
                Err(err) => {
                    warn!(id = %record.id_hex(), error = %err, "dropping record on write error");
                }
            }
        }

        let _ = self.writer.flush().await;
        debug!(records = written, "jsonl sink stopped");
        Ok(())
    }

    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(line).await?;
        self.writer.flush().await
    }
}

/// A writer that reports one of these kinds will never accept another line.
fn is_terminal(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::WriteZero
    )
}

fn encode_line(record: &PacketRecord) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(&record.envelope())
        .map_err(|err| PipelineError::decode(record.id, err.to_string()))?;
    line.push(b'\n');
    Ok(line)
}
