//! Pipeline assembly: source → decode → hub → sinks.

#[cfg(test)]
mod tests;

use chrono::Utc;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::bridge::{BridgeConfig, BridgeServer, ChannelEmitter};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::hub::{Hub, HubOptions};
use crate::protocol::{cobs, PacketParser, PacketRegistry};
use crate::sink::JsonlSink;
use crate::source::{SourceOptions, SourceSupervisor, TcpSource};
use crate::types::PacketRecord;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The assembled ingest pipeline.
///
/// Construction validates configuration; `run` spawns every task and
/// resolves when cancellation has completed teardown (`Ok`) or a fatal
/// error stopped the pipeline (`Err`). Embedders map the outcome to exit
/// codes via [`crate::PipelineError::exit_code`]; clean cancellation is
/// exit code 0.
pub struct Pipeline {
    config: PipelineConfig,
    registry: Arc<PacketRegistry>,
    jsonl: Option<BoxedWriter>,
    bridge: Option<(BridgeConfig, Vec<Box<dyn ChannelEmitter>>)>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("jsonl", &self.jsonl.is_some())
            .field("bridge", &self.bridge.is_some())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create a pipeline over a validated configuration and a populated
    /// registry.
    ///
    /// The registry's text id and every schema must be in place before
    /// `run`: decoding starts with the first connection. The registry must
    /// agree with `config.text_packet_id`; a mismatch would decode text
    /// under an id the configuration never named, so it is rejected as a
    /// configuration error.
    pub fn new(config: PipelineConfig, registry: Arc<PacketRegistry>) -> Result<Self> {
        config.validate()?;
        if registry.text_id() != config.text_packet_id {
            return Err(PipelineError::config(format!(
                "text_packet_id 0x{:02x} does not match the registry's text id 0x{:02x}",
                config.text_packet_id,
                registry.text_id()
            )));
        }
        Ok(Self { config, registry, jsonl: None, bridge: None })
    }

    /// Attach a JSONL sink writing to `writer`.
    pub fn with_jsonl<W>(mut self, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.jsonl = Some(Box::new(writer));
        self
    }

    /// Attach the WebSocket bridge.
    pub fn with_bridge(
        mut self,
        config: BridgeConfig,
        emitters: Vec<Box<dyn ChannelEmitter>>,
    ) -> Self {
        self.bridge = Some((config, emitters));
        self
    }

    /// Run until cancelled or a fatal error occurs.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let config = self.config;

        let hub = Hub::spawn(
            cancel.clone(),
            HubOptions {
                broadcast_buffer: config.hub_broadcast_buffer,
                client_buffer: config.hub_client_buffer_default,
            },
        );

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        // Sinks subscribe before the source starts so no record can slip
        // past them during startup.
        if let Some(writer) = self.jsonl {
            let subscription = hub.subscribe().await;
            let sink_cancel = cancel.clone();
            tasks.spawn(async move {
                JsonlSink::new(writer).run(subscription, sink_cancel).await
            });
        }

        if let Some((bridge_config, emitters)) = self.bridge {
            let server = Arc::new(
                BridgeServer::bind(
                    bridge_config,
                    emitters,
                    config.ws_send_buffer,
                    config.shutdown_grace(),
                )
                .await?,
            );
            let subscription = hub.subscribe().await;
            let bridge_cancel = cancel.clone();
            tasks.spawn(async move { server.run(subscription, bridge_cancel).await });
        }

        let (frame_tx, frame_rx) = mpsc::channel(config.frame_queue_size);

        let supervisor = SourceSupervisor::new(
            TcpSource::new(config.source_addr.as_str(), config.dial_timeout()),
            SourceOptions {
                reconnect_interval: config.reconnect_interval(),
                reconnect_max: config.reconnect_max(),
                reader_buf: config.reader_buf,
                read_timeout: config.read_timeout(),
            },
        );
        let supervisor_cancel = cancel.clone();
        tasks.spawn(async move {
            supervisor.run(frame_tx, supervisor_cancel).await;
            Ok(())
        });

        let parser = PacketParser::new(Arc::clone(&self.registry));
        let transform_hub = hub.clone();
        let transform_cancel = cancel.clone();
        tasks.spawn(async move {
            transform_frames(frame_rx, parser, transform_hub, transform_cancel).await;
            Ok(())
        });

        info!(source = %config.source_addr, "pipeline started");

        // Supervise: a fatal task error cancels everything; anything else
        // is logged and the rest of the pipeline keeps going.
        let mut fatal: Option<PipelineError> = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(err))) if err.is_fatal() => {
                        error!(error = %err, "fatal pipeline error");
                        fatal = Some(err);
                        cancel.cancel();
                        break;
                    }
                    Some(Ok(Err(err))) => {
                        warn!(error = %err, "pipeline task stopped");
                    }
                    Some(Err(join_err)) => {
                        error!(error = %join_err, "pipeline task panicked");
                    }
                },
            }
        }

        // Cooperative teardown within the grace period.
        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                if let Ok(Err(err)) = joined {
                    debug!(error = %err, "task ended during shutdown");
                }
            }
        };
        if timeout(config.shutdown_grace(), drain).await.is_err() {
            warn!("shutdown grace elapsed, aborting remaining tasks");
            tasks.abort_all();
        }

        info!("pipeline stopped");
        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Frame-to-record transformer: COBS decode, parse, publish.
///
/// Every failure is local to its frame; the loop only ends on cancellation
/// or when the framer side closes the queue.
async fn transform_frames(
    mut frames: mpsc::Receiver<Vec<u8>>,
    parser: PacketParser,
    hub: Hub,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };

        let decoded = match cobs::decode(&frame) {
            Ok(decoded) => decoded,
            Err(err) => {
                trace!(error = %err, len = frame.len(), "dropping malformed frame");
                continue;
            }
        };
        if decoded.is_empty() {
            continue;
        }

        let timestamp = Utc::now();
        let id = decoded[0];
        let body = &decoded[1..];

        let data = match parser.parse(id, body) {
            Ok(data) => data,
            Err(err) => {
                debug!(id = format!("0x{id:02x}"), error = %err, "dropping undecodable packet");
                continue;
            }
        };

        let record = PacketRecord::new(id, timestamp, body.to_vec(), data);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = hub.publish(record) => {}
        }
    }
}
