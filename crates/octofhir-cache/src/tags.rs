//! Lazy tag invalidation.
//!
//! Tags are never indexed. Invalidating a tag writes a marker holding the
//! current timestamp; entries carrying that tag whose `created_at` is at or
//! before the marker are treated as expired (or deleted) the next time they
//! are read. Entries written after the marker are unaffected.
//!
//! Markers are ordinary keys of the namespace, read through the same
//! get-or-set path as any other key, so marker reads are cached and
//! stampede-protected too. A read that finds no marker caches `0` in the
//! local tier only; only invalidations write markers to the remote tier and
//! the bus, so a read can never overwrite a newer marker.

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::{Value, json};

use crate::config::DefaultsConfig;
use crate::entry::{CacheEntry, now_millis};
use crate::error::{BoxError, CacheResult};
use crate::factory::{FactoryOutcome, boxed_factory};
use crate::get_set::GetSetHandler;
use crate::options::{CacheEntryOptions, CacheOptions};

const TAG_PREFIX: &str = "___tag:";
const DELETION_PREFIX: &str = "___deletion:";

const TAG_MARKER_LIFETIME: Duration = Duration::from_secs(10 * 24 * 3600);
const DELETION_MARKER_LIFETIME: Duration = Duration::from_secs(30 * 24 * 3600);

/// What tag markers say about an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagVerdict {
    Valid,
    /// Logically expired; still usable as a graced value.
    Expired,
    /// Must be treated as absent.
    Deleted,
}

/// Tag marker reads and writes for one namespace.
#[derive(Debug, Clone)]
pub struct TagSystem {
    tag_options: CacheEntryOptions,
    deletion_options: CacheEntryOptions,
    tag_read_options: CacheEntryOptions,
    deletion_read_options: CacheEntryOptions,
}

impl TagSystem {
    pub fn new(defaults: &DefaultsConfig) -> Self {
        let marker = |lifetime| {
            CacheOptions::new()
                .ttl(lifetime)
                .grace(lifetime)
                .no_timeout()
        };

        let read = |lifetime| marker(lifetime).skip_remote_write().skip_bus_notify();

        Self {
            tag_options: CacheEntryOptions::resolve(&marker(TAG_MARKER_LIFETIME), defaults),
            deletion_options: CacheEntryOptions::resolve(
                &marker(DELETION_MARKER_LIFETIME),
                defaults,
            ),
            tag_read_options: CacheEntryOptions::resolve(&read(TAG_MARKER_LIFETIME), defaults),
            deletion_read_options: CacheEntryOptions::resolve(
                &read(DELETION_MARKER_LIFETIME),
                defaults,
            ),
        }
    }

    pub fn tag_key(tag: &str) -> String {
        format!("{TAG_PREFIX}{tag}")
    }

    pub fn deletion_key(tag: &str) -> String {
        format!("{DELETION_PREFIX}{tag}")
    }

    /// Markers are never checked against other markers.
    pub fn is_marker_key(key: &str) -> bool {
        key.starts_with(TAG_PREFIX) || key.starts_with(DELETION_PREFIX)
    }

    /// Expire every entry tagged with any of `tags` as of now.
    pub async fn expire_by_tag(&self, handler: &GetSetHandler, tags: &[String]) -> CacheResult<()> {
        self.write_markers(handler, tags, Self::tag_key, &self.tag_options)
            .await
    }

    /// Delete every entry tagged with any of `tags` as of now.
    pub async fn delete_by_tag(&self, handler: &GetSetHandler, tags: &[String]) -> CacheResult<()> {
        self.write_markers(handler, tags, Self::deletion_key, &self.deletion_options)
            .await
    }

    async fn write_markers(
        &self,
        handler: &GetSetHandler,
        tags: &[String],
        marker_key: fn(&str) -> String,
        options: &CacheEntryOptions,
    ) -> CacheResult<()> {
        let now = now_millis();
        let distinct: BTreeSet<&str> = tags.iter().map(String::as_str).collect();

        for tag in distinct {
            tracing::debug!(tag = %tag, at = now, "writing tag marker");
            handler
                .stack()
                .set(&marker_key(tag), Some(json!(now)), options)
                .await?;
        }
        Ok(())
    }

    /// Check `entry` against the markers of its tags.
    ///
    /// Deletion markers win over expiration markers. Expiration markers are
    /// compared against [`CacheEntry::tag_reference`], so a grace backoff
    /// applied after a tag expired the entry holds until it runs out.
    pub async fn verdict(&self, handler: &GetSetHandler, entry: &CacheEntry) -> CacheResult<TagVerdict> {
        for tag in entry.tags() {
            let deleted_at = self
                .marker(handler, &Self::deletion_key(tag), &self.deletion_read_options)
                .await?;
            if entry.created_at() <= deleted_at {
                return Ok(TagVerdict::Deleted);
            }
        }

        for tag in entry.tags() {
            let expired_at = self
                .marker(handler, &Self::tag_key(tag), &self.tag_read_options)
                .await?;
            if entry.tag_reference() <= expired_at {
                return Ok(TagVerdict::Expired);
            }
        }

        Ok(TagVerdict::Valid)
    }

    /// Marker timestamp, `0` when the tag was never invalidated.
    async fn marker(
        &self,
        handler: &GetSetHandler,
        key: &str,
        options: &CacheEntryOptions,
    ) -> CacheResult<i64> {
        let factory = boxed_factory(|_| async { Ok::<_, BoxError>(FactoryOutcome::Value(json!(0))) });
        let outcome = handler.handle(key, factory, options).await?;
        Ok(outcome
            .into_option()
            .as_ref()
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }
}
