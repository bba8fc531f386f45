//! Redis Pub/Sub bus transport.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use futures_util::StreamExt;
use octofhir_cache::bus::{BusTransport, PayloadStream};
use octofhir_cache::{CacheError, CacheResult};
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::PubSub;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300); // 5 minutes max

/// Buffered payloads per subscription before the listener waits on the bus.
const SUBSCRIPTION_BUFFER: usize = 1024;

/// Bus transport over Redis Pub/Sub.
///
/// Publishes go through the shared pool. Each subscription holds a dedicated
/// Pub/Sub connection that reconnects with exponential backoff if the
/// connection is lost.
///
/// ## Example Flow
///
/// ```text
/// Node A: cache.set("k")
///   ↓
/// Redis Pub/Sub: PUBLISH octofhir-cache:bus <binary message>
///   ↓
/// Node B: listener receives message → expires "k" in its local tier
/// Node A: listener receives its own message → ignored by bus id
/// ```
pub struct RedisTransport {
    pool: Pool,
    url: String,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl RedisTransport {
    /// `url` is used for the dedicated Pub/Sub connections.
    pub fn new(pool: Pool, url: impl Into<String>) -> Self {
        Self {
            pool,
            url: url.into(),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl std::fmt::Debug for RedisTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTransport")
            .field("url", &self.url)
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

async fn connect(url: &str, channel: &str) -> redis::RedisResult<PubSub> {
    let client = redis::Client::open(url)?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    Ok(pubsub)
}

/// Forward messages until the connection drops. Returns `false` once nobody
/// reads the subscription anymore.
async fn forward(pubsub: &mut PubSub, tx: &mpsc::Sender<Vec<u8>>) -> bool {
    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        if tx.send(msg.get_payload_bytes().to_vec()).await.is_err() {
            return false;
        }
    }
    true
}

async fn listen(mut pubsub: PubSub, url: String, channel: String, tx: mpsc::Sender<Vec<u8>>) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if !forward(&mut pubsub, &tx).await {
            tracing::debug!(channel = %channel, "bus subscription dropped, stopping listener");
            return;
        }

        loop {
            tracing::error!(
                channel = %channel,
                backoff_secs = backoff.as_secs(),
                "Bus pub/sub connection closed, reconnecting..."
            );
            tokio::time::sleep(backoff).await;

            if tx.is_closed() {
                return;
            }

            match connect(&url, &channel).await {
                Ok(reconnected) => {
                    tracing::info!(channel = %channel, "Resubscribed to bus channel");
                    pubsub = reconnected;
                    backoff = INITIAL_BACKOFF;
                    break;
                }
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "bus reconnect failed");
                    // Exponential backoff with max limit
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

#[async_trait]
impl BusTransport for RedisTransport {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> CacheResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::bus(format!("failed to get Redis connection: {e}")))?;

        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| CacheError::bus(format!("failed to publish bus message: {e}")))?;

        tracing::debug!(channel = %channel, "published bus message");
        Ok(())
    }

    /// Subscribe before returning, so no message published afterwards is
    /// missed. Later connection losses are retried in the background.
    async fn subscribe(&self, channel: &str) -> CacheResult<PayloadStream> {
        let pubsub = connect(&self.url, channel)
            .await
            .map_err(|e| CacheError::bus(format!("failed to subscribe to '{channel}': {e}")))?;
        tracing::info!(channel = %channel, "Subscribed to bus channel");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task = tokio::spawn(listen(pubsub, self.url.clone(), channel.to_string(), tx));
        self.listeners.lock().push(task);

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (payload, rx))
        });
        Ok(stream.boxed())
    }

    async fn disconnect(&self) -> CacheResult<()> {
        let listeners = std::mem::take(&mut *self.listeners.lock());
        for listener in listeners {
            listener.abort();
        }
        Ok(())
    }
}

impl Drop for RedisTransport {
    fn drop(&mut self) {
        for listener in self.listeners.get_mut().drain(..) {
            listener.abort();
        }
    }
}
