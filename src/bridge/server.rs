//! WebSocket fan-out server.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use super::channels::{ChannelEmitter, ChannelSpec, PACKET_SCHEMA};
use super::messages::{
    encode_message_data, Advertise, ClientMessage, ServerInfo, SUBPROTOCOL,
};
use crate::error::{PipelineError, Result};
use crate::hub::HubSubscription;
use crate::types::PacketRecord;

/// Bridge server configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// WebSocket listen address.
    pub listen_addr: String,
    /// Server name sent in `serverInfo`.
    pub name: String,
    /// Topic of the packet channel.
    pub topic: String,
    /// Channel id of the packet channel.
    pub channel_id: u64,
    /// Schema name of the packet channel.
    pub schema_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8765".to_string(),
            name: "telemux".to_string(),
            topic: "telemux/packet".to_string(),
            channel_id: 1,
            schema_name: "telemux.Packet".to_string(),
        }
    }
}

struct ClientHandle {
    id: u64,
    sender: mpsc::Sender<Vec<u8>>,
    /// Client-local subscription id to channel id. Written by the client's
    /// read loop, read by the broadcast path under a short lock.
    subscriptions: Mutex<HashMap<u32, u64>>,
    /// Per-client stop signal; latched by `close`.
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl ClientHandle {
    /// Latched close: both the read loop and the write loop can observe a
    /// failure, but only the first call signals shutdown.
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.cancel();
        }
    }

    /// Non-blocking offer to this client's send queue.
    fn try_send(&self, frame: Vec<u8>) {
        match self.sender.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                trace!(client = self.id, "send queue full, dropping frame");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn subscription_ids_for(&self, channel_id: u64) -> Vec<u32> {
        let subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subscriptions
            .iter()
            .filter(|(_, bound)| **bound == channel_id)
            .map(|(id, _)| *id)
            .collect()
    }

    fn apply(&self, message: ClientMessage, advertised: &HashSet<u64>) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        match message {
            ClientMessage::Subscribe { subscriptions: requests } => {
                for request in requests {
                    if advertised.contains(&request.channel_id) {
                        trace!(
                            client = self.id,
                            subscription = request.id,
                            channel = request.channel_id,
                            "subscribe"
                        );
                        subscriptions.insert(request.id, request.channel_id);
                    } else {
                        debug!(
                            client = self.id,
                            channel = request.channel_id,
                            "subscribe to unadvertised channel ignored"
                        );
                    }
                }
            }
            ClientMessage::Unsubscribe { subscription_ids } => {
                for id in subscription_ids {
                    subscriptions.remove(&id);
                }
            }
        }
    }
}

/// WebSocket fan-out server speaking `foxglove.websocket.v1`.
///
/// The server advertises the packet channel plus one channel per emitter,
/// routes every hub record to subscribed clients through per-client bounded
/// send queues, and never lets one slow or dead client affect another.
pub struct BridgeServer {
    name: String,
    listener: TcpListener,
    local_addr: SocketAddr,
    packet_channel_id: u64,
    channels: Vec<ChannelSpec>,
    advertised: HashSet<u64>,
    emitters: Vec<(u64, Box<dyn ChannelEmitter>)>,
    clients: RwLock<HashMap<u64, Arc<ClientHandle>>>,
    next_client_id: AtomicU64,
    send_buffer: usize,
    shutdown_grace: Duration,
}

impl std::fmt::Debug for BridgeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeServer")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr)
            .field("packet_channel_id", &self.packet_channel_id)
            .field("channels", &self.channels)
            .field("advertised", &self.advertised)
            .field("send_buffer", &self.send_buffer)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish_non_exhaustive()
    }
}

impl BridgeServer {
    /// Bind the listen socket and build the channel table.
    ///
    /// A bind failure is fatal to the pipeline. Emitter channel ids that
    /// collide with the packet channel or each other are renumbered past
    /// the highest taken id.
    pub async fn bind(
        config: BridgeConfig,
        emitters: Vec<Box<dyn ChannelEmitter>>,
        send_buffer: usize,
        shutdown_grace: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|err| PipelineError::listen(&config.listen_addr, err))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| PipelineError::listen(&config.listen_addr, err))?;

        let mut channels = vec![ChannelSpec::json(
            config.channel_id,
            &config.topic,
            &config.schema_name,
            PACKET_SCHEMA,
        )];
        let mut taken: HashSet<u64> = channels.iter().map(|c| c.id).collect();

        let mut bound_emitters = Vec::with_capacity(emitters.len());
        for emitter in emitters {
            let mut spec = emitter.channel();
            if taken.contains(&spec.id) {
                let next = taken.iter().max().copied().unwrap_or(0) + 1;
                debug!(topic = %spec.topic, from = spec.id, to = next, "renumbering channel");
                spec.id = next;
            }
            taken.insert(spec.id);
            bound_emitters.push((spec.id, emitter));
            channels.push(spec);
        }

        info!(addr = %local_addr, channels = channels.len(), "bridge listening");

        Ok(Self {
            name: config.name,
            listener,
            local_addr,
            packet_channel_id: config.channel_id,
            advertised: taken,
            channels,
            emitters: bound_emitters,
            clients: RwLock::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
            send_buffer: send_buffer.max(1),
            shutdown_grace,
        })
    }

    /// Actual bound address (useful when configured with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept clients and fan records out until cancelled.
    ///
    /// Returns `Err` only on an accept-loop failure; client-level failures
    /// close that client and keep the server running.
    pub async fn run(
        self: Arc<Self>,
        subscription: HubSubscription,
        cancel: CancellationToken,
    ) -> Result<()> {
        let tracker = TaskTracker::new();

        let broadcast_server = Arc::clone(&self);
        let broadcast_cancel = cancel.clone();
        tracker.spawn(async move {
            broadcast_server.broadcast_loop(subscription, broadcast_cancel).await;
        });

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&self);
                        let client_cancel = cancel.child_token();
                        tracker.spawn(async move {
                            server.handle_connection(stream, peer, client_cancel).await;
                        });
                    }
                    Err(err) => {
                        break Err(PipelineError::listen(self.local_addr.to_string(), err));
                    }
                }
            }
        };

        // Stop accepting, close every client exactly once, then wait out
        // the grace period for connection tasks to finish.
        self.close_all_clients();
        tracker.close();
        if timeout(self.shutdown_grace, tracker.wait()).await.is_err() {
            warn!("bridge shutdown grace elapsed with tasks still running");
        }
        info!("bridge stopped");
        result
    }

    fn close_all_clients(&self) {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        for client in clients.values() {
            client.close();
        }
    }

    fn snapshot_clients(&self) -> Vec<Arc<ClientHandle>> {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        clients.values().cloned().collect()
    }

    async fn broadcast_loop(&self, mut subscription: HubSubscription, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                record = subscription.recv() => match record {
                    Some(record) => self.broadcast_record(&record),
                    None => return,
                },
            }
        }
    }

    fn broadcast_record(&self, record: &PacketRecord) {
        let log_time_ns = record.timestamp_nanos();

        match serde_json::to_vec(&record.envelope()) {
            Ok(payload) => {
                self.publish_to_channel(self.packet_channel_id, log_time_ns, &payload)
            }
            Err(err) => {
                warn!(id = %record.id_hex(), error = %err, "record not serializable, skipping")
            }
        }

        for (channel_id, emitter) in &self.emitters {
            if let Some(message) = emitter.derive(record) {
                match serde_json::to_vec(&message) {
                    Ok(payload) => self.publish_to_channel(*channel_id, log_time_ns, &payload),
                    Err(err) => {
                        warn!(channel = channel_id, error = %err, "derived message not serializable")
                    }
                }
            }
        }
    }

    fn publish_to_channel(&self, channel_id: u64, log_time_ns: u64, payload: &[u8]) {
        for client in self.snapshot_clients() {
            for subscription_id in client.subscription_ids_for(channel_id) {
                client.try_send(encode_message_data(subscription_id, log_time_ns, payload));
            }
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) {
        let upgraded = tokio::select! {
            _ = cancel.cancelled() => return,
            upgraded = tokio_tungstenite::accept_hdr_async(stream, negotiate_subprotocol) => upgraded,
        };
        let ws = match upgraded {
            Ok(ws) => ws,
            Err(err) => {
                debug!(%peer, error = %err, "websocket upgrade failed");
                return;
            }
        };
        let (mut ws_tx, ws_rx) = ws.split();

        if !self.send_handshake(&mut ws_tx).await {
            debug!(%peer, "handshake write failed");
            return;
        }

        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (send_tx, send_rx) = mpsc::channel(self.send_buffer);
        let client = Arc::new(ClientHandle {
            id: client_id,
            sender: send_tx,
            subscriptions: Mutex::new(HashMap::new()),
            shutdown: cancel,
            closed: AtomicBool::new(false),
        });
        {
            let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
            clients.insert(client_id, Arc::clone(&client));
        }
        info!(client = client_id, %peer, "client connected");

        let writer_client = Arc::clone(&client);
        let write_task = tokio::spawn(write_loop(ws_tx, send_rx, writer_client));

        self.read_loop(&client, ws_rx).await;

        client.close();
        {
            let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
            clients.remove(&client_id);
        }
        let _ = write_task.await;
        info!(client = client_id, %peer, "client disconnected");
    }

    async fn send_handshake(
        &self,
        ws_tx: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
    ) -> bool {
        let session_id = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string();
        let info = ServerInfo::new(self.name.clone(), session_id);
        let advertise = Advertise::new(&self.channels);

        let info_json = match serde_json::to_string(&info) {
            Ok(json) => json,
            Err(_) => return false,
        };
        let advertise_json = match serde_json::to_string(&advertise) {
            Ok(json) => json,
            Err(_) => return false,
        };

        ws_tx.send(Message::text(info_json)).await.is_ok()
            && ws_tx.send(Message::text(advertise_json)).await.is_ok()
    }

    async fn read_loop(
        &self,
        client: &Arc<ClientHandle>,
        mut ws_rx: SplitStream<WebSocketStream<TcpStream>>,
    ) {
        loop {
            let message = tokio::select! {
                _ = client.shutdown.cancelled() => return,
                message = ws_rx.next() => message,
            };

            let message = match message {
                Some(Ok(message)) => message,
                Some(Err(err)) => {
                    debug!(client = client.id, error = %err, "read failed");
                    return;
                }
                None => return,
            };

            if !message.is_text() {
                // Binary, ping/pong, close: nothing to route.
                continue;
            }
            let text = match message.into_text() {
                Ok(text) => text,
                Err(_) => continue,
            };
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(parsed) => client.apply(parsed, &self.advertised),
                Err(err) => {
                    trace!(client = client.id, error = %err, "ignoring unparseable op");
                }
            }
        }
    }
}

/// Write loop: drain the client's send queue into binary WebSocket frames.
/// Any write failure latches the client closed.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut send_rx: mpsc::Receiver<Vec<u8>>,
    client: Arc<ClientHandle>,
) {
    loop {
        let frame = tokio::select! {
            _ = client.shutdown.cancelled() => break,
            frame = send_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if ws_tx.send(Message::binary(frame)).await.is_err() {
            client.close();
            break;
        }
    }
    let _ = ws_tx.close().await;
}

fn negotiate_subprotocol(
    request: &Request,
    mut response: Response,
) -> std::result::Result<Response, ErrorResponse> {
    // All origins are accepted; only the subprotocol echo matters, and only
    // when the client offered ours.
    let offered = request
        .headers()
        .get("sec-websocket-protocol")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if offered.split(',').any(|p| p.trim() == SUBPROTOCOL) {
        response
            .headers_mut()
            .insert("sec-websocket-protocol", HeaderValue::from_static(SUBPROTOCOL));
    }
    Ok(response)
}
