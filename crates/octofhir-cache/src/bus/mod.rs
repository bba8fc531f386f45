//! Cross-process invalidation bus.
//!
//! ## How It Works
//!
//! 1. Every write, delete or clear publishes a [`BusMessage`] on a channel
//!    shared by all nodes backing the same store
//! 2. Each node applies received messages to its local tier only
//! 3. Messages carrying the node's own bus id are ignored
//! 4. Failed publishes wait in a bounded [`RetryQueue`] and are retried on a
//!    fixed interval
//!
//! ```text
//! Node A: cache.set("k")
//!   ↓
//! Transport: PUBLISH <channel> {busId: A, type: set, keys: [prefix:k]}
//!   ↓
//! Node A: ignores (own id)
//! Node B: logically expires prefix:k in its local tier
//! ```

mod encoding;
mod memory;
mod message;
mod retry_queue;
mod transport;

pub use encoding::{BinaryEncoder, BusEncoder, JsonEncoder};
pub use memory::{MemoryHub, MemoryTransport};
pub use message::{BusMessage, BusMessageType};
pub use retry_queue::RetryQueue;
pub use transport::{BusTransport, PayloadStream};

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BusConfig;
use crate::error::CacheResult;
use crate::events::{CacheEvent, CacheEventBroadcaster};
use crate::tiers::LocalCache;

/// Invalidation bus for one node.
pub struct Bus {
    id: String,
    id_length: usize,
    channel: String,
    transport: Arc<dyn BusTransport>,
    encoder: Arc<dyn BusEncoder>,
    local: Option<LocalCache>,
    retry_queue: Option<Arc<RetryQueue>>,
    retry_interval: Duration,
    events: CacheEventBroadcaster,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bus {
    /// Create a bus with a random id and the binary encoder.
    pub fn new(
        config: &BusConfig,
        transport: Arc<dyn BusTransport>,
        local: Option<LocalCache>,
        events: CacheEventBroadcaster,
    ) -> Self {
        let id_length = config.id_length;
        let id = truncate_id(uuid::Uuid::new_v4().simple().to_string(), id_length);

        Self {
            id,
            id_length,
            channel: config.channel.clone(),
            transport,
            encoder: Arc::new(BinaryEncoder::new(id_length)),
            local,
            retry_queue: config
                .retry_queue
                .enabled
                .then(|| Arc::new(RetryQueue::new(config.retry_queue.max_size))),
            retry_interval: config.retry_queue.retry_interval,
            events,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Override the node id. Ids wider than the wire id are truncated.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = truncate_id(id.into(), self.id_length);
        self
    }

    #[must_use]
    pub fn with_encoder(mut self, encoder: Arc<dyn BusEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn retry_queue(&self) -> Option<&Arc<RetryQueue>> {
        self.retry_queue.as_ref()
    }

    /// Start listening on the channel and, if enabled, the retry loop.
    ///
    /// Background tasks hold a weak reference and stop once the bus is dropped.
    pub async fn subscribe(self: &Arc<Self>) -> CacheResult<()> {
        self.transport.set_id(&self.id);
        let mut stream = self.transport.subscribe(&self.channel).await?;
        info!(bus_id = %self.id, channel = %self.channel, "bus subscribed");

        let weak = Arc::downgrade(self);
        let listener = tokio::spawn(async move {
            while let Some(payload) = stream.next().await {
                let Some(bus) = weak.upgrade() else {
                    break;
                };
                match bus.encoder.decode(&payload) {
                    Ok(message) => {
                        bus.receive(message).await;
                    }
                    Err(e) => warn!(error = %e, "dropping undecodable bus message"),
                }
            }
            debug!("bus listener stopped");
        });

        let mut tasks = self.tasks.lock();
        tasks.push(listener);

        if self.retry_queue.is_some() {
            tasks.push(tokio::spawn(retry_loop(
                Arc::downgrade(self),
                self.retry_interval,
            )));
        }

        Ok(())
    }

    /// Apply a received message to the local tier.
    ///
    /// Returns `false` when the message originated from this node.
    pub async fn receive(&self, message: BusMessage) -> bool {
        if message.bus_id == self.id {
            debug!(bus_id = %self.id, "ignoring own bus message");
            return false;
        }

        debug!(
            from = %message.bus_id,
            kind = ?message.kind,
            keys = message.keys.len(),
            "received bus message"
        );

        if let Some(local) = &self.local {
            let result = match message.kind {
                BusMessageType::Set => {
                    let mut result = Ok(());
                    for key in &message.keys {
                        if let Err(e) = local.logically_expire(key).await {
                            result = Err(e);
                        }
                    }
                    result
                }
                BusMessageType::Delete => local.delete_many(&message.keys).await.map(|_| ()),
                BusMessageType::Clear => local.clear_namespace(&message.namespace).await,
            };

            if let Err(e) = result {
                warn!(error = %e, kind = ?message.kind, "failed to apply bus message");
            }
        }

        self.events
            .emit_with(|| CacheEvent::BusMessageReceived { message });
        true
    }

    /// Publish a message stamped with this node's id.
    ///
    /// A failed publish is queued for retry and `false` is returned.
    pub async fn publish(&self, message: BusMessage) -> bool {
        let message = message.with_bus_id(self.id.clone());

        match self.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, kind = ?message.kind, "bus publish failed");
                if let Some(queue) = &self.retry_queue {
                    if queue.push(message).is_some() {
                        warn!("bus retry queue full, dropped oldest message");
                    }
                }
                false
            }
        }
    }

    async fn send(&self, message: &BusMessage) -> CacheResult<()> {
        let payload = self.encoder.encode(message)?;
        self.transport.publish(&self.channel, payload).await?;
        self.events.emit_with(|| CacheEvent::BusMessagePublished {
            message: message.clone(),
        });
        Ok(())
    }

    /// Publish queued messages in order until one fails.
    ///
    /// Returns how many were delivered.
    pub async fn process_retry_queue(&self) -> usize {
        let Some(queue) = &self.retry_queue else {
            return 0;
        };

        let mut delivered = 0;
        while let Some(message) = queue.pop_front() {
            if let Err(e) = self.send(&message).await {
                debug!(error = %e, pending = queue.len() + 1, "bus still unavailable");
                requeue(queue, message);
                break;
            }
            delivered += 1;
        }

        if delivered > 0 {
            info!(delivered, "retried queued bus messages");
        }
        delivered
    }

    /// Stop background tasks and disconnect the transport.
    pub async fn disconnect(&self) -> CacheResult<()> {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }
        self.transport.disconnect().await
    }
}

/// Put a message that failed to retry back at the head of the queue.
///
/// Returns `false` when newer messages filled the queue and it was dropped.
fn requeue(queue: &RetryQueue, message: BusMessage) -> bool {
    let kind = message.kind;
    let keys = message.keys.len();
    if queue.push_front(message) {
        return true;
    }
    warn!(kind = ?kind, keys, "bus retry queue full, dropped message that failed to retry");
    false
}

impl Drop for Bus {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field(
                "queued",
                &self.retry_queue.as_ref().map_or(0, |queue| queue.len()),
            )
            .finish()
    }
}

async fn retry_loop(bus: Weak<Bus>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(bus) = bus.upgrade() else {
            break;
        };
        if bus.retry_queue.as_ref().is_some_and(|queue| !queue.is_empty()) {
            bus.process_retry_queue().await;
        }
    }
}

fn truncate_id(mut id: String, max: usize) -> String {
    if id.len() > max {
        let mut end = max;
        while !id.is_char_boundary(end) {
            end -= 1;
        }
        id.truncate(end);
    }
    id
}
