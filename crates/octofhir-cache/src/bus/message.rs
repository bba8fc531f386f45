//! Invalidation messages exchanged between nodes.

use serde::{Deserialize, Serialize};

/// What the receiving nodes must do with their local copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusMessageType {
    /// A key was rewritten: logically expire the local copy.
    Set,
    /// Keys were deleted: remove the local copies.
    Delete,
    /// A namespace was cleared.
    Clear,
}

/// A message published on the bus.
///
/// `keys` are fully qualified. `namespace` is the qualified prefix the
/// operation ran under and is what a `Clear` wipes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    pub bus_id: String,
    #[serde(rename = "type")]
    pub kind: BusMessageType,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub namespace: String,
}

impl BusMessage {
    /// The bus id is filled in by the publishing bus.
    pub fn set(keys: Vec<String>, namespace: impl Into<String>) -> Self {
        Self::new(BusMessageType::Set, keys, namespace)
    }

    pub fn delete(keys: Vec<String>, namespace: impl Into<String>) -> Self {
        Self::new(BusMessageType::Delete, keys, namespace)
    }

    pub fn clear(namespace: impl Into<String>) -> Self {
        Self::new(BusMessageType::Clear, Vec::new(), namespace)
    }

    fn new(kind: BusMessageType, keys: Vec<String>, namespace: impl Into<String>) -> Self {
        Self {
            bus_id: String::new(),
            kind,
            keys,
            namespace: namespace.into(),
        }
    }

    #[must_use]
    pub fn with_bus_id(mut self, bus_id: impl Into<String>) -> Self {
        self.bus_id = bus_id.into();
        self
    }
}
