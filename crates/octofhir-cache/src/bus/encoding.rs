//! Bus message encoders.
//!
//! # Binary layout
//!
//! ```text
//! +-----------------+------+-----------+-----------+-----------+-----------+-----
//! | bus id (N bytes)| type | ns len u32| ns bytes  | key len u32| key bytes| ...
//! +-----------------+------+-----------+-----------+-----------+-----------+-----
//! ```
//!
//! The bus id is UTF-8, NUL-padded or truncated to `N` (default 24). The type
//! byte is `0x01` for Set and `0x02` for Delete; a Delete with no keys is a
//! Clear. All lengths are big-endian.

use crate::bus::message::{BusMessage, BusMessageType};
use crate::error::{CacheError, CacheResult};

const TYPE_SET: u8 = 0x01;
const TYPE_DELETE: u8 = 0x02;

/// Converts bus messages to and from transport payloads.
pub trait BusEncoder: Send + Sync + std::fmt::Debug {
    fn encode(&self, message: &BusMessage) -> CacheResult<Vec<u8>>;

    fn decode(&self, payload: &[u8]) -> CacheResult<BusMessage>;
}

/// Compact binary encoder.
#[derive(Debug, Clone, Copy)]
pub struct BinaryEncoder {
    id_length: usize,
}

impl BinaryEncoder {
    pub fn new(id_length: usize) -> Self {
        Self { id_length }
    }

    pub fn id_length(&self) -> usize {
        self.id_length
    }

    fn write_chunk(buf: &mut Vec<u8>, bytes: &[u8]) -> CacheResult<()> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| CacheError::serialization("bus message segment exceeds u32::MAX bytes"))?;
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(bytes);
        Ok(())
    }
}

impl Default for BinaryEncoder {
    fn default() -> Self {
        Self::new(24)
    }
}

/// Truncate to at most `max` bytes without splitting a code point.
fn truncate_utf8(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

struct Reader<'a> {
    payload: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> CacheResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.payload.len())
            .ok_or_else(|| CacheError::serialization("truncated bus message"))?;
        let bytes = &self.payload[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn chunk(&mut self) -> CacheResult<&'a [u8]> {
        let len_bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| CacheError::serialization("truncated bus message"))?;
        self.take(u32::from_be_bytes(len_bytes) as usize)
    }

    fn string(&mut self) -> CacheResult<String> {
        let bytes = self.chunk()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CacheError::serialization(format!("invalid UTF-8 in bus message: {e}")))
    }

    fn is_done(&self) -> bool {
        self.offset >= self.payload.len()
    }
}

impl BusEncoder for BinaryEncoder {
    fn encode(&self, message: &BusMessage) -> CacheResult<Vec<u8>> {
        let capacity = self.id_length
            + 1
            + 4
            + message.namespace.len()
            + message.keys.iter().map(|k| k.len() + 4).sum::<usize>();
        let mut buf = Vec::with_capacity(capacity);

        let id = truncate_utf8(&message.bus_id, self.id_length);
        buf.extend_from_slice(id.as_bytes());
        buf.resize(self.id_length, 0);

        buf.push(match message.kind {
            BusMessageType::Set => TYPE_SET,
            BusMessageType::Delete | BusMessageType::Clear => TYPE_DELETE,
        });

        Self::write_chunk(&mut buf, message.namespace.as_bytes())?;

        if message.kind != BusMessageType::Clear {
            for key in &message.keys {
                Self::write_chunk(&mut buf, key.as_bytes())?;
            }
        }

        Ok(buf)
    }

    fn decode(&self, payload: &[u8]) -> CacheResult<BusMessage> {
        let mut reader = Reader { payload, offset: 0 };

        let id_bytes = reader.take(self.id_length)?;
        let id_end = id_bytes
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(id_bytes.len());
        let bus_id = std::str::from_utf8(&id_bytes[..id_end])
            .map_err(|e| CacheError::serialization(format!("invalid bus id: {e}")))?
            .to_string();

        let type_byte = reader.take(1)?[0];
        let namespace = reader.string()?;

        let mut keys = Vec::new();
        while !reader.is_done() {
            keys.push(reader.string()?);
        }

        let kind = match type_byte {
            TYPE_SET => BusMessageType::Set,
            _ if keys.is_empty() => BusMessageType::Clear,
            _ => BusMessageType::Delete,
        };

        Ok(BusMessage {
            bus_id,
            kind,
            keys,
            namespace,
        })
    }
}

/// JSON encoder, for transports where readability beats size.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl BusEncoder for JsonEncoder {
    fn encode(&self, message: &BusMessage) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| CacheError::serialization(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> CacheResult<BusMessage> {
        serde_json::from_slice(payload).map_err(|e| CacheError::serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let encoder = BinaryEncoder::new(4);
        let message = BusMessage::set(vec!["ab".into()], "n").with_bus_id("xy");
        let bytes = encoder.encode(&message).unwrap();

        assert_eq!(
            bytes,
            vec![b'x', b'y', 0, 0, 0x01, 0, 0, 0, 1, b'n', 0, 0, 0, 2, b'a', b'b']
        );
    }

    #[test]
    fn test_utf8_keys_and_separator_survive() {
        let encoder = BinaryEncoder::default();
        let message = BusMessage::delete(
            vec![
                "cache:users:1".into(),
                "cache:ключ:😀".into(),
                "cache::".into(),
                "".into(),
            ],
            "cache",
        )
        .with_bus_id("node-1");

        let bytes = encoder.encode(&message).unwrap();
        assert_eq!(encoder.decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_clear_decodes_from_empty_delete() {
        let encoder = BinaryEncoder::default();
        let message = BusMessage::clear("cache:users").with_bus_id("node-1");

        let decoded = encoder.decode(&encoder.encode(&message).unwrap()).unwrap();
        assert_eq!(decoded.kind, BusMessageType::Clear);
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_unknown_type_decodes_as_delete() {
        let encoder = BinaryEncoder::new(2);
        let mut bytes = encoder
            .encode(&BusMessage::set(vec!["k".into()], "").with_bus_id("ab"))
            .unwrap();
        bytes[2] = 0x7f;

        let decoded = encoder.decode(&bytes).unwrap();
        assert_eq!(decoded.kind, BusMessageType::Delete);
        assert_eq!(decoded.keys, vec!["k".to_string()]);
    }

    #[test]
    fn test_long_bus_id_is_truncated_on_char_boundary() {
        let encoder = BinaryEncoder::new(5);
        let message = BusMessage::set(vec![], "").with_bus_id("abcdé-long");

        let decoded = encoder.decode(&encoder.encode(&message).unwrap()).unwrap();
        assert_eq!(decoded.bus_id, "abcd");
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let encoder = BinaryEncoder::default();
        let bytes = encoder
            .encode(&BusMessage::set(vec!["key".into()], "ns").with_bus_id("id"))
            .unwrap();

        let err = encoder.decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CacheError::Serialization { .. }));
        assert!(encoder.decode(&bytes[..10]).is_err());
    }

    #[test]
    fn test_json_encoder() {
        let message = BusMessage::set(vec!["cache:k".into()], "cache").with_bus_id("a");
        let bytes = JsonEncoder.encode(&message).unwrap();
        assert_eq!(JsonEncoder.decode(&bytes).unwrap(), message);
    }
}
