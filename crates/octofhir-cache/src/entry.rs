//! Cache entry value container.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::options::CacheEntryOptions;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Entries are shared across processes, so creation and expiration times are
/// wall-clock based rather than monotonic.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// A cached value with its creation time, logical expiration and tags.
///
/// Entries are never mutated in place: expiring an entry or applying a grace
/// backoff yields a new entry that is written back to the tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    value: Value,
    created_at: i64,
    logical_expiration: Option<i64>,
    #[serde(default)]
    tags: Vec<String>,
    /// When a grace backoff was applied. Tag expirations older than this do
    /// not cut the backoff short.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    backed_off_at: Option<i64>,
}

impl CacheEntry {
    /// Build an entry from its raw parts.
    pub fn new(
        value: Value,
        created_at: i64,
        logical_expiration: Option<i64>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            value,
            created_at,
            logical_expiration,
            tags,
            backed_off_at: None,
        }
    }

    /// Build a fresh entry for a write made now with the given options.
    pub fn from_options(value: Value, options: &CacheEntryOptions) -> Self {
        let now = now_millis();
        let logical_expiration = options
            .logical_ttl()
            .map(|ttl| now.saturating_add(duration_millis(ttl)));

        Self::new(value, now, logical_expiration, options.tags().to_vec())
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Logical expiration timestamp, `None` when the entry never goes stale.
    pub fn logical_expiration(&self) -> Option<i64> {
        self.logical_expiration
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns `true` once the logical TTL has elapsed.
    pub fn is_logically_expired(&self) -> bool {
        self.logical_expiration
            .is_some_and(|expiration| now_millis() >= expiration)
    }

    /// Returns `true` while a grace backoff suppresses recomputation.
    pub fn is_backing_off(&self) -> bool {
        self.backed_off_at.is_some() && !self.is_logically_expired()
    }

    /// Timestamp tag expiration markers are compared against: the creation
    /// time, or the start of a running grace backoff.
    pub fn tag_reference(&self) -> i64 {
        match self.backed_off_at {
            Some(at) if self.is_backing_off() => at.max(self.created_at),
            _ => self.created_at,
        }
    }

    /// Returns a copy that is logically expired as of now.
    #[must_use]
    pub fn expire(mut self) -> Self {
        self.logical_expiration = Some(now_millis());
        self.backed_off_at = None;
        self
    }

    /// Returns a copy whose logical expiration is `backoff` from now.
    #[must_use]
    pub fn apply_backoff(mut self, backoff: Duration) -> Self {
        let now = now_millis();
        self.logical_expiration = Some(now.saturating_add(duration_millis(backoff)));
        self.backed_off_at = Some(now);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_without_expiration_never_expires() {
        let entry = CacheEntry::new(json!("v"), now_millis(), None, vec![]);
        assert!(!entry.is_logically_expired());
    }

    #[test]
    fn test_expire_marks_entry_stale() {
        let entry = CacheEntry::new(json!(1), now_millis(), Some(now_millis() + 60_000), vec![]);
        assert!(!entry.is_logically_expired());

        let expired = entry.clone().expire();
        assert!(expired.is_logically_expired());
        assert_eq!(expired.value(), entry.value());
        assert_eq!(expired.created_at(), entry.created_at());
    }

    #[test]
    fn test_apply_backoff_pushes_expiration_forward() {
        let entry = CacheEntry::new(json!(1), now_millis() - 10_000, Some(now_millis() - 5_000), vec![]);
        assert!(entry.is_logically_expired());

        let backed_off = entry.apply_backoff(Duration::from_secs(10));
        assert!(!backed_off.is_logically_expired());
        assert!(backed_off.is_backing_off());
        assert!(backed_off.tag_reference() > backed_off.created_at());

        let expired = backed_off.expire();
        assert!(!expired.is_backing_off());
        assert_eq!(expired.tag_reference(), expired.created_at());
    }

    #[test]
    fn test_backoff_survives_serialization() {
        let entry = CacheEntry::new(json!(1), now_millis(), Some(now_millis()), vec!["t".into()])
            .apply_backoff(Duration::from_secs(10));
        let bytes = serde_json::to_vec(&entry).unwrap();
        let decoded: CacheEntry = serde_json::from_slice(&bytes).unwrap();
        assert!(decoded.is_backing_off());
    }

    #[test]
    fn test_serialized_field_names() {
        let entry = CacheEntry::new(json!({"a": 1}), 10, Some(20), vec!["t".into()]);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            json!({"value": {"a": 1}, "createdAt": 10, "logicalExpiration": 20, "tags": ["t"]})
        );
    }
}
