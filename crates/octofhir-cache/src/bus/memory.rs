//! In-process bus transport.
//!
//! Several caches holding transports from the same [`MemoryHub`] behave like
//! separate nodes connected to one pub/sub server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::broadcast;

use crate::bus::transport::{BusTransport, PayloadStream};
use crate::error::{CacheError, CacheResult};

const CHANNEL_CAPACITY: usize = 1024;

/// Shared channel registry.
#[derive(Debug, Default)]
pub struct MemoryHub {
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
}

impl MemoryHub {
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Create a transport attached to this hub.
    pub fn transport(self: &Arc<Self>) -> MemoryTransport {
        MemoryTransport {
            hub: Arc::clone(self),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Transport for one node on a [`MemoryHub`].
///
/// [`set_failing`](Self::set_failing) makes publishes fail, which simulates
/// an unreachable pub/sub server.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    failing: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BusTransport for MemoryTransport {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> CacheResult<()> {
        if self.is_failing() {
            return Err(CacheError::bus("memory transport is unavailable"));
        }
        // No receivers is not an error for pub/sub.
        let _ = self.hub.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<PayloadStream> {
        let receiver = self.hub.sender(channel).subscribe();

        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => return Some((payload, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "memory bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = MemoryHub::new_shared();
        let a = hub.transport();
        let b = hub.transport();

        let mut stream_a = a.subscribe("bus").await.unwrap();
        let mut stream_b = b.subscribe("bus").await.unwrap();

        a.publish("bus", b"hello".to_vec()).await.unwrap();

        assert_eq!(stream_a.next().await.unwrap(), b"hello".to_vec());
        assert_eq!(stream_b.next().await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_failing_transport_rejects_publish() {
        let hub = MemoryHub::new_shared();
        let transport = hub.transport();
        transport.set_failing(true);

        assert!(transport.publish("bus", vec![1]).await.is_err());
        transport.set_failing(false);
        assert!(transport.publish("bus", vec![1]).await.is_ok());
    }
}
