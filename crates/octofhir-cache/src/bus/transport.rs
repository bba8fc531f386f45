//! Bus transport contract.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::CacheResult;

/// Stream of raw payloads received on a channel.
pub type PayloadStream = BoxStream<'static, Vec<u8>>;

/// Pub/sub transport shared by every node of a store.
///
/// Implementations must accept concurrent `publish` calls. A subscription
/// also receives the node's own publishes; the bus filters those out.
#[async_trait]
pub trait BusTransport: Send + Sync + std::fmt::Debug {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> CacheResult<()>;

    async fn subscribe(&self, channel: &str) -> CacheResult<PayloadStream>;

    /// Called once with the node's bus id before subscribing.
    fn set_id(&self, _id: &str) {}

    async fn disconnect(&self) -> CacheResult<()> {
        Ok(())
    }
}
