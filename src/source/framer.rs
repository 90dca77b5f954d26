//! Delimiter-based frame extraction from a connected byte stream.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{PipelineError, Result};

/// Wire delimiter between COBS frames.
pub(crate) const FRAME_DELIMITER: u8 = 0x00;

/// Splits one connection's byte stream into delimiter-stripped frames.
///
/// The framer owns the connection for its lifetime. It returns `Ok(())`
/// when asked to stop (cancellation, or the frame queue's receiver went
/// away) and `Err` on any read failure, which the supervisor answers with
/// a reconnect. A partial frame buffered at that point is discarded.
pub(crate) struct Framer {
    reader_buf: usize,
    read_timeout: Option<Duration>,
}

impl Framer {
    pub fn new(reader_buf: usize, read_timeout: Option<Duration>) -> Self {
        Self { reader_buf, read_timeout }
    }

    pub async fn run<R>(
        &self,
        stream: R,
        out: &mpsc::Sender<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::with_capacity(self.reader_buf, stream);
        let mut buf: Vec<u8> = Vec::new();

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                outcome = read_chunk(&mut reader, &mut buf, self.read_timeout) => outcome,
            };

            match outcome? {
                ReadOutcome::TimedOut => continue,
                ReadOutcome::Eof => {
                    return Err(PipelineError::io(
                        "source connection closed",
                        std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"),
                    ));
                }
                ReadOutcome::Data => {}
            }

            if buf.last() != Some(&FRAME_DELIMITER) {
                // EOF in the middle of a frame; the partial data is useless.
                return Err(PipelineError::io(
                    "source connection closed mid-frame",
                    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"),
                ));
            }
            buf.pop();

            if buf.is_empty() {
                trace!("skipping empty frame");
                continue;
            }

            let frame = std::mem::take(&mut buf);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = out.send(frame) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

enum ReadOutcome {
    Data,
    TimedOut,
    Eof,
}

/// Read up to and including the next delimiter, honoring the optional read
/// deadline. A deadline expiry keeps whatever was already buffered (the
/// next call continues the same frame); only a real I/O failure is an error.
async fn read_chunk<R>(
    reader: &mut BufReader<R>,
    buf: &mut Vec<u8>,
    deadline: Option<Duration>,
) -> Result<ReadOutcome>
where
    R: AsyncRead + Unpin,
{
    let read = reader.read_until(FRAME_DELIMITER, buf);
    let result = match deadline {
        Some(deadline) => match timeout(deadline, read).await {
            Ok(result) => result,
            Err(_) => return Ok(ReadOutcome::TimedOut),
        },
        None => read.await,
    };

    match result {
        Ok(0) => Ok(ReadOutcome::Eof),
        Ok(_) => Ok(ReadOutcome::Data),
        Err(err) => Err(PipelineError::io("read from source", err)),
    }
}
