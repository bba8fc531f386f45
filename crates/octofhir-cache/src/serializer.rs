//! Entry codecs.
//!
//! Every tier stores the same serialized form of an entry, so the codec is
//! chosen once per store and shared by the local and remote tier.

use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};

/// Encodes and decodes [`CacheEntry`] values for storage.
pub trait Serializer: Send + Sync + std::fmt::Debug {
    fn serialize(&self, entry: &CacheEntry) -> CacheResult<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> CacheResult<CacheEntry>;
}

/// JSON codec (default).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, entry: &CacheEntry) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(entry).map_err(|e| CacheError::serialization(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> CacheResult<CacheEntry> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::serialization(e.to_string()))
    }
}

/// MessagePack codec. Smaller payloads for large values.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackSerializer;

impl Serializer for MsgPackSerializer {
    fn serialize(&self, entry: &CacheEntry) -> CacheResult<Vec<u8>> {
        rmp_serde::to_vec_named(entry).map_err(|e| CacheError::serialization(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> CacheResult<CacheEntry> {
        rmp_serde::from_slice(bytes).map_err(|e| CacheError::serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::now_millis;
    use serde_json::json;

    fn sample_entry() -> CacheEntry {
        let now = now_millis();
        CacheEntry::new(
            json!({"name": "Ada", "scores": [1, 2, 3], "nested": {"ok": true}, "none": null}),
            now,
            Some(now + 1_000),
            vec!["users".into(), "team:1".into()],
        )
    }

    #[test]
    fn test_json_preserves_entry() {
        let entry = sample_entry();
        let bytes = JsonSerializer.serialize(&entry).unwrap();
        assert_eq!(JsonSerializer.deserialize(&bytes).unwrap(), entry);
    }

    #[test]
    fn test_msgpack_preserves_entry() {
        let entry = sample_entry();
        let bytes = MsgPackSerializer.serialize(&entry).unwrap();
        assert_eq!(MsgPackSerializer.deserialize(&bytes).unwrap(), entry);
    }

    #[test]
    fn test_msgpack_preserves_never_expiring_entry() {
        let entry = CacheEntry::new(json!(null), now_millis(), None, vec![]);
        let bytes = MsgPackSerializer.serialize(&entry).unwrap();
        let decoded = MsgPackSerializer.deserialize(&bytes).unwrap();
        assert_eq!(decoded.logical_expiration(), None);
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_corrupt_bytes_are_serialization_errors() {
        let err = JsonSerializer.deserialize(b"not json").unwrap_err();
        assert!(matches!(err, CacheError::Serialization { .. }));
    }
}
