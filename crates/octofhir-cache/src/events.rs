//! Cache events.
//!
//! Every stack of a store shares one [`CacheEventBroadcaster`]. Events are
//! only built when someone is listening, so an idle broadcaster costs a
//! receiver-count check per operation.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::bus::BusMessage;

/// Default buffer size for the broadcast channel.
/// Slow receivers lose the oldest events beyond this limit.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// The tier a hit was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Local,
    Remote,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "l1"),
            Self::Remote => write!(f, "l2"),
        }
    }
}

/// Events emitted by cache operations. Keys are relative to the store prefix.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Hit {
        key: String,
        value: Value,
        store: String,
        tier: Tier,
        graced: bool,
    },
    Miss {
        key: String,
        store: String,
    },
    Written {
        key: String,
        value: Value,
        store: String,
    },
    Deleted {
        key: String,
        store: String,
    },
    Cleared {
        store: String,
    },
    BusMessagePublished {
        message: BusMessage,
    },
    BusMessageReceived {
        message: BusMessage,
    },
}

impl CacheEvent {
    /// Stable event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hit { .. } => "cache:hit",
            Self::Miss { .. } => "cache:miss",
            Self::Written { .. } => "cache:written",
            Self::Deleted { .. } => "cache:deleted",
            Self::Cleared { .. } => "cache:cleared",
            Self::BusMessagePublished { .. } => "bus:message:published",
            Self::BusMessageReceived { .. } => "bus:message:received",
        }
    }
}

/// Broadcaster for cache events.
///
/// Cheap to clone; clones share the channel.
#[derive(Clone)]
pub struct CacheEventBroadcaster {
    sender: broadcast::Sender<CacheEvent>,
}

impl CacheEventBroadcaster {
    /// Create a new broadcaster with default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Create a new broadcaster with custom buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Send an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn send(&self, event: CacheEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    /// Build and send an event only if there are subscribers.
    pub fn emit_with(&self, build: impl FnOnce() -> CacheEvent) -> usize {
        if !self.has_subscribers() {
            return 0;
        }
        self.send(build())
    }

    /// Subscribe to events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for CacheEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CacheEventBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEventBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = CacheEvent::Miss {
            key: "k".into(),
            store: "cache".into(),
        };
        assert_eq!(event.name(), "cache:miss");
        assert_eq!(
            CacheEvent::Cleared {
                store: "cache".into()
            }
            .name(),
            "cache:cleared"
        );
    }

    #[test]
    fn test_emit_with_skips_building_without_subscribers() {
        let broadcaster = CacheEventBroadcaster::new();
        let mut built = false;
        let count = broadcaster.emit_with(|| {
            built = true;
            CacheEvent::Cleared {
                store: "cache".into(),
            }
        });
        assert_eq!(count, 0);
        assert!(!built);
    }

    #[tokio::test]
    async fn test_send_receive() {
        let broadcaster = CacheEventBroadcaster::new();
        let mut receiver = broadcaster.subscribe();

        broadcaster.emit_with(|| CacheEvent::Deleted {
            key: "k".into(),
            store: "cache".into(),
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.name(), "cache:deleted");
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(Tier::Local.to_string(), "l1");
        assert_eq!(Tier::Remote.to_string(), "l2");
    }
}
