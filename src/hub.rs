//! Non-blocking broadcast hub.
//!
//! One producer, many subscribers, and a hard rule: no subscriber can stall
//! the producer or another subscriber. A single actor task owns the
//! subscriber set; everything else talks to it through queues. Delivery to
//! each subscriber uses a non-blocking send: a full queue means the record
//! is dropped for that subscriber only.
//!
//! Per-subscriber delivery order equals publish order, modulo drops.
//! Cancellation closes every subscriber's stream exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::types::PacketRecord;

/// Hub queue sizing.
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Capacity of the broadcast queue into the actor.
    pub broadcast_buffer: usize,
    /// Default per-subscriber queue capacity.
    pub client_buffer: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self { broadcast_buffer: 256, client_buffer: 100 }
    }
}

struct Register {
    id: u64,
    tx: mpsc::Sender<PacketRecord>,
    ack: oneshot::Sender<()>,
}

/// Handle to the hub actor. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    broadcast_tx: mpsc::Sender<PacketRecord>,
    register_tx: mpsc::Sender<Register>,
    unregister_tx: mpsc::UnboundedSender<u64>,
    next_id: Arc<AtomicU64>,
    client_buffer: usize,
}

/// One subscriber's receiving end.
///
/// Dropping the subscription without calling [`HubSubscription::unsubscribe`]
/// is fine: the actor notices the closed queue on the next delivery and
/// removes the entry.
pub struct HubSubscription {
    id: u64,
    rx: mpsc::Receiver<PacketRecord>,
    unregister_tx: mpsc::UnboundedSender<u64>,
}

impl Hub {
    /// Spawn the hub actor.
    ///
    /// The actor runs until the cancellation token fires, then drops every
    /// subscriber queue and exits.
    pub fn spawn(cancel: CancellationToken, options: HubOptions) -> Hub {
        let (broadcast_tx, broadcast_rx) = mpsc::channel(options.broadcast_buffer.max(1));
        let (register_tx, register_rx) = mpsc::channel(1);
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();

        tokio::spawn(actor(broadcast_rx, register_rx, unregister_rx, cancel));

        Hub {
            broadcast_tx,
            register_tx,
            unregister_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            client_buffer: options.client_buffer.max(1),
        }
    }

    /// Publish a record to every subscriber.
    ///
    /// Waits only for space in the actor's broadcast queue, never for any
    /// subscriber. A no-op once the hub has shut down.
    pub async fn publish(&self, record: PacketRecord) {
        let _ = self.broadcast_tx.send(record).await;
    }

    /// Subscribe with the default queue size.
    pub async fn subscribe(&self) -> HubSubscription {
        self.subscribe_with_buffer(self.client_buffer).await
    }

    /// Subscribe with an explicit queue size (`0` means the default).
    ///
    /// Returns once the actor has installed the subscription, so records
    /// published afterwards are guaranteed to be offered to it.
    pub async fn subscribe_with_buffer(&self, buffer: usize) -> HubSubscription {
        let buffer = if buffer == 0 { self.client_buffer } else { buffer };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(buffer);
        let (ack_tx, ack_rx) = oneshot::channel();

        let _ = self.register_tx.send(Register { id, tx, ack: ack_tx }).await;
        // A dropped ack means the actor is gone; the subscription is then
        // already closed and recv() will return None immediately.
        let _ = ack_rx.await;

        HubSubscription {
            id,
            rx,
            unregister_tx: self.unregister_tx.clone(),
        }
    }
}

impl HubSubscription {
    /// Receive the next record. `None` once the hub shuts down or the
    /// subscription is removed.
    pub async fn recv(&mut self) -> Option<PacketRecord> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for draining in tests and shutdown paths.
    pub fn try_recv(&mut self) -> Option<PacketRecord> {
        self.rx.try_recv().ok()
    }

    /// Remove this subscription from the hub.
    pub fn unsubscribe(self) {
        let _ = self.unregister_tx.send(self.id);
    }

    /// Adapt the subscription into a `Stream` of records.
    ///
    /// The actor prunes the entry when the stream is dropped.
    pub fn into_stream(self) -> ReceiverStream<PacketRecord> {
        ReceiverStream::new(self.rx)
    }
}

async fn actor(
    mut broadcast_rx: mpsc::Receiver<PacketRecord>,
    mut register_rx: mpsc::Receiver<Register>,
    mut unregister_rx: mpsc::UnboundedReceiver<u64>,
    cancel: CancellationToken,
) {
    let mut subscribers: HashMap<u64, mpsc::Sender<PacketRecord>> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(subscribers = subscribers.len(), "hub shutting down");
                subscribers.clear();
                return;
            }
            Some(reg) = register_rx.recv() => {
                trace!(subscriber = reg.id, "hub register");
                subscribers.insert(reg.id, reg.tx);
                let _ = reg.ack.send(());
            }
            Some(id) = unregister_rx.recv() => {
                trace!(subscriber = id, "hub unregister");
                subscribers.remove(&id);
            }
            Some(record) = broadcast_rx.recv() => {
                subscribers.retain(|id, tx| match tx.try_send(record.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        trace!(subscriber = id, "subscriber queue full, dropping record");
                        true
                    }
                    Err(TrySendError::Closed(_)) => {
                        trace!(subscriber = id, "subscriber gone, removing");
                        false
                    }
                });
            }
            else => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DecodedData;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn record(id: u8) -> PacketRecord {
        PacketRecord::new(id, Utc::now(), vec![id], DecodedData::Raw)
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_publisher() {
        let cancel = CancellationToken::new();
        let hub = Hub::spawn(
            cancel.clone(),
            HubOptions { broadcast_buffer: 1, client_buffer: 1 },
        );

        let mut fast = hub.subscribe_with_buffer(128).await;
        let mut slow = hub.subscribe_with_buffer(1).await;

        let publisher = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for i in 0..50u8 {
                    hub.publish(record(i)).await;
                }
            })
        };

        timeout(Duration::from_secs(1), publisher)
            .await
            .expect("publish blocked on slow consumer")
            .unwrap();

        let mut received = Vec::new();
        while received.len() < 50 {
            let rec = timeout(Duration::from_secs(1), fast.recv())
                .await
                .expect("fast consumer timed out")
                .expect("fast stream ended early");
            received.push(rec.id);
        }
        let expected: Vec<u8> = (0..50).collect();
        assert_eq!(received, expected);

        // Give the actor a beat to finish fanning out, then count what the
        // slow subscriber actually got.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut slow_count = 0;
        while slow.try_recv().is_some() {
            slow_count += 1;
        }
        assert!(slow_count <= 1, "slow consumer received {slow_count} records");

        cancel.cancel();
    }

    #[tokio::test]
    async fn delivery_preserves_publish_order() {
        let cancel = CancellationToken::new();
        let hub = Hub::spawn(cancel.clone(), HubOptions::default());
        let mut sub = hub.subscribe().await;

        for i in 0..20u8 {
            hub.publish(record(i)).await;
        }

        for expected in 0..20u8 {
            let rec = timeout(Duration::from_secs(1), sub.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(rec.id, expected);
        }

        cancel.cancel();
    }

    #[tokio::test]
    async fn cancellation_closes_subscriber_streams() {
        let cancel = CancellationToken::new();
        let hub = Hub::spawn(cancel.clone(), HubOptions::default());
        let mut first = hub.subscribe().await;
        let mut second = hub.subscribe().await;

        cancel.cancel();

        let end = timeout(Duration::from_secs(1), first.recv()).await.unwrap();
        assert!(end.is_none());
        let end = timeout(Duration::from_secs(1), second.recv()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_removes_subscription() {
        let cancel = CancellationToken::new();
        let hub = Hub::spawn(cancel.clone(), HubOptions::default());

        let sub = hub.subscribe().await;
        sub.unsubscribe();
        // Publishing after unsubscribe must not deliver anywhere; mostly we
        // assert nothing panics and remaining subscribers still work.
        hub.publish(record(1)).await;

        let mut live = hub.subscribe().await;
        hub.publish(record(2)).await;
        let rec = timeout(Duration::from_secs(1), live.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.id, 2);

        cancel.cancel();
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned_on_next_delivery() {
        let cancel = CancellationToken::new();
        let hub = Hub::spawn(cancel.clone(), HubOptions::default());

        let sub = hub.subscribe_with_buffer(1).await;
        drop(sub);

        // Two publishes: the first may be offered to the dead queue, the
        // second must still reach a live subscriber.
        hub.publish(record(1)).await;
        let mut live = hub.subscribe().await;
        hub.publish(record(2)).await;

        let rec = timeout(Duration::from_secs(1), live.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.id, 2);

        cancel.cancel();
    }

    #[tokio::test]
    async fn burst_to_tiny_queue_keeps_at_most_capacity() {
        let cancel = CancellationToken::new();
        let hub = Hub::spawn(cancel.clone(), HubOptions::default());
        let mut tiny = hub.subscribe_with_buffer(1).await;

        for i in 0..50u8 {
            hub.publish(record(i)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut count = 0;
        while tiny.try_recv().is_some() {
            count += 1;
        }
        assert!(count <= 1);

        cancel.cancel();
    }
}
