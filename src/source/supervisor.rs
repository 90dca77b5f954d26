//! Reconnecting source supervisor.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::framer::Framer;
use super::ByteSource;

/// Supervision knobs for one source.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Base backoff after a failure.
    pub reconnect_interval: Duration,
    /// Backoff cap.
    pub reconnect_max: Duration,
    /// Framer buffered-reader capacity.
    pub reader_buf: usize,
    /// Optional per-read deadline, to keep reconnects responsive.
    pub read_timeout: Option<Duration>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
            reader_buf: 64 * 1024,
            read_timeout: None,
        }
    }
}

/// Owns the dial–frame–backoff loop over one configured source.
///
/// Backoff is linear in the consecutive failure count and capped; a
/// successful connection resets the count. At most one framer is alive at
/// any time: the next dial only starts after the previous connection has
/// been torn down.
pub struct SourceSupervisor<S> {
    source: S,
    options: SourceOptions,
}

impl<S: ByteSource> SourceSupervisor<S> {
    pub fn new(source: S, options: SourceOptions) -> Self {
        Self { source, options }
    }

    /// Run until cancelled. Never returns an error: every failure is
    /// answered with backoff and redial.
    pub async fn run(self, out: mpsc::Sender<Vec<u8>>, cancel: CancellationToken) {
        let framer = Framer::new(self.options.reader_buf, self.options.read_timeout);
        let endpoint = self.source.endpoint().to_string();
        let mut failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let dialed = tokio::select! {
                _ = cancel.cancelled() => return,
                dialed = self.source.connect() => dialed,
            };

            let stream = match dialed {
                Ok(stream) => stream,
                Err(err) => {
                    failures = failures.saturating_add(1);
                    warn!(endpoint = %endpoint, error = %err, failures, "dial failed");
                    if !self.backoff(failures, &cancel).await {
                        return;
                    }
                    continue;
                }
            };

            info!(endpoint = %endpoint, "source connected");
            failures = 0;

            match framer.run(stream, &out, &cancel).await {
                Ok(()) => {
                    // Stop was requested (cancellation or pipeline teardown).
                    debug!(endpoint = %endpoint, "framer stopped");
                    return;
                }
                Err(err) => {
                    warn!(endpoint = %endpoint, error = %err, "source connection lost");
                }
            }

            if cancel.is_cancelled() {
                return;
            }
            if !self.backoff(1, &cancel).await {
                return;
            }
        }
    }

    /// Cancellable backoff sleep; returns `false` when cancelled.
    async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> bool {
        let wait = self
            .options
            .reconnect_interval
            .saturating_mul(attempt)
            .min(self.options.reconnect_max);
        debug!(?wait, attempt, "backing off before redial");
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TcpSource;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn quick_options() -> SourceOptions {
        SourceOptions {
            reconnect_interval: Duration::from_millis(10),
            reconnect_max: Duration::from_millis(50),
            reader_buf: 4096,
            read_timeout: None,
        }
    }

    #[tokio::test]
    async fn streams_frames_from_a_live_source() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[0x03, 0x68, 0x69, 0x00]).await.unwrap();
            // Hold the connection open so the supervisor does not churn.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let supervisor = SourceSupervisor::new(
            TcpSource::new(addr.to_string(), Duration::from_secs(1)),
            quick_options(),
        );
        let sup_cancel = cancel.clone();
        let handle = tokio::spawn(supervisor.run(tx, sup_cancel));

        let frame = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, vec![0x03, 0x68, 0x69]);

        cancel.cancel();
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn reconnects_after_the_peer_drops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // First connection: one frame, then close.
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[0x02, 0x41, 0x00]).await.unwrap();
            drop(stream);

            // Second connection: another frame.
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[0x02, 0x42, 0x00]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let supervisor = SourceSupervisor::new(
            TcpSource::new(addr.to_string(), Duration::from_secs(1)),
            quick_options(),
        );
        let sup_cancel = cancel.clone();
        tokio::spawn(supervisor.run(tx, sup_cancel));

        let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, vec![0x02, 0x41]);
        let second = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(second, vec![0x02, 0x42]);

        cancel.cancel();
    }

    #[tokio::test]
    async fn dial_failures_back_off_until_a_listener_appears() {
        // Reserve a port, then free it so the first dials are refused.
        let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = placeholder.local_addr().unwrap();
        drop(placeholder);

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let supervisor = SourceSupervisor::new(
            TcpSource::new(addr.to_string(), Duration::from_secs(1)),
            quick_options(),
        );
        let sup_cancel = cancel.clone();
        tokio::spawn(supervisor.run(tx, sup_cancel));

        // Let a few dial attempts fail before the source shows up.
        tokio::time::sleep(Duration::from_millis(60)).await;

        let listener = TcpListener::bind(addr).await.unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[0x02, 0x5A, 0x00]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let frame = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, vec![0x02, 0x5A]);

        cancel.cancel();
    }

    #[tokio::test]
    async fn cancellation_aborts_the_dial_loop() {
        // Nothing listens here; the supervisor sits in dial/backoff.
        let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = placeholder.local_addr().unwrap();
        drop(placeholder);

        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let supervisor = SourceSupervisor::new(
            TcpSource::new(addr.to_string(), Duration::from_secs(1)),
            quick_options(),
        );
        let sup_cancel = cancel.clone();
        let handle = tokio::spawn(supervisor.run(tx, sup_cancel));

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
