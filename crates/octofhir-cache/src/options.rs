//! Per-operation options.
//!
//! [`CacheOptions`] carries call-site overrides. [`CacheEntryOptions`] is the
//! resolved, immutable view built by merging those overrides onto the store
//! defaults; every policy decision (stale-while-revalidate, lock wait, factory
//! timeout) is derived from it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DefaultsConfig;
use crate::error::CacheError;

/// Callback invoked with every factory failure.
#[derive(Clone)]
pub struct FactoryErrorHook(Arc<dyn Fn(&CacheError) + Send + Sync>);

impl FactoryErrorHook {
    pub fn new(hook: impl Fn(&CacheError) + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }

    pub fn call(&self, error: &CacheError) {
        (self.0)(error)
    }
}

impl fmt::Debug for FactoryErrorHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FactoryErrorHook")
    }
}

/// Call-site overrides. Unset fields fall back to the store defaults.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use octofhir_cache::CacheOptions;
///
/// let options = CacheOptions::new()
///     .ttl(Duration::from_secs(60))
///     .grace(Duration::from_secs(6 * 3600))
///     .tags(["products"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    ttl: Option<Option<Duration>>,
    grace: Option<Duration>,
    grace_backoff: Option<Duration>,
    timeout: Option<Option<Duration>>,
    hard_timeout: Option<Option<Duration>>,
    lock_timeout: Option<Option<Duration>>,
    tags: Vec<String>,
    force_fresh: bool,
    suppress_remote_errors: Option<bool>,
    skip_local_write: bool,
    skip_remote_write: bool,
    skip_bus_notify: bool,
    on_factory_error: Option<FactoryErrorHook>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logical TTL after which the value is considered stale.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(Some(ttl));
        self
    }

    /// Never let the value go stale.
    pub fn forever(mut self) -> Self {
        self.ttl = Some(None);
        self
    }

    /// Grace period; `Duration::ZERO` disables grace.
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }

    pub fn grace_backoff(mut self, backoff: Duration) -> Self {
        self.grace_backoff = Some(backoff);
        self
    }

    /// Soft timeout. `Duration::ZERO` means stale-while-revalidate.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(Some(timeout));
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = Some(None);
        self
    }

    pub fn hard_timeout(mut self, timeout: Duration) -> Self {
        self.hard_timeout = Some(Some(timeout));
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(Some(timeout));
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Skip every cache check and recompute.
    pub fn force_fresh(mut self) -> Self {
        self.force_fresh = true;
        self
    }

    pub fn suppress_remote_errors(mut self, suppress: bool) -> Self {
        self.suppress_remote_errors = Some(suppress);
        self
    }

    pub fn skip_local_write(mut self) -> Self {
        self.skip_local_write = true;
        self
    }

    pub fn skip_remote_write(mut self) -> Self {
        self.skip_remote_write = true;
        self
    }

    pub fn skip_bus_notify(mut self) -> Self {
        self.skip_bus_notify = true;
        self
    }

    pub fn on_factory_error(mut self, hook: impl Fn(&CacheError) + Send + Sync + 'static) -> Self {
        self.on_factory_error = Some(FactoryErrorHook::new(hook));
        self
    }
}

/// Which budget bounds a factory run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryTimeout {
    /// Recoverable through a stale fallback value.
    Soft(Duration),
    /// Always surfaced to the caller.
    Hard(Duration),
}

impl FactoryTimeout {
    pub fn duration(&self) -> Duration {
        match self {
            Self::Soft(duration) | Self::Hard(duration) => *duration,
        }
    }

    pub(crate) fn into_error(self, key: &str) -> CacheError {
        match self {
            Self::Soft(duration) => CacheError::soft_timeout(key, duration),
            Self::Hard(duration) => CacheError::hard_timeout(key, duration),
        }
    }
}

/// Resolved options for a single cache operation.
#[derive(Debug, Clone)]
pub struct CacheEntryOptions {
    logical_ttl: Option<Duration>,
    physical_ttl: Option<Duration>,
    grace: Duration,
    grace_backoff: Duration,
    timeout: Option<Duration>,
    hard_timeout: Option<Duration>,
    lock_timeout: Option<Duration>,
    tags: Vec<String>,
    force_fresh: bool,
    suppress_remote_errors: Option<bool>,
    skip_local_write: bool,
    skip_remote_write: bool,
    skip_bus_notify: bool,
    on_factory_error: Option<FactoryErrorHook>,
}

impl CacheEntryOptions {
    /// Merge call-site overrides onto the store defaults.
    pub fn resolve(overrides: &CacheOptions, defaults: &DefaultsConfig) -> Self {
        let logical_ttl = overrides.ttl.unwrap_or(defaults.ttl);
        let grace = overrides.grace.unwrap_or(defaults.grace);

        Self {
            logical_ttl,
            physical_ttl: physical_ttl(logical_ttl, grace),
            grace,
            grace_backoff: overrides.grace_backoff.unwrap_or(defaults.grace_backoff),
            timeout: overrides.timeout.unwrap_or(defaults.timeout),
            hard_timeout: overrides.hard_timeout.unwrap_or(defaults.hard_timeout),
            lock_timeout: overrides.lock_timeout.unwrap_or(defaults.lock_timeout),
            tags: overrides.tags.clone(),
            force_fresh: overrides.force_fresh,
            suppress_remote_errors: overrides
                .suppress_remote_errors
                .or(defaults.suppress_remote_errors),
            skip_local_write: overrides.skip_local_write,
            skip_remote_write: overrides.skip_remote_write,
            skip_bus_notify: overrides.skip_bus_notify,
            on_factory_error: overrides.on_factory_error.clone(),
        }
    }

    pub fn logical_ttl(&self) -> Option<Duration> {
        self.logical_ttl
    }

    /// TTL handed to the drivers; outlives the logical TTL while graced.
    pub fn physical_ttl(&self) -> Option<Duration> {
        self.physical_ttl
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn grace_backoff(&self) -> Duration {
        self.grace_backoff
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn hard_timeout(&self) -> Option<Duration> {
        self.hard_timeout
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn force_fresh(&self) -> bool {
        self.force_fresh
    }

    pub fn suppress_remote_errors(&self) -> Option<bool> {
        self.suppress_remote_errors
    }

    pub fn skip_local_write(&self) -> bool {
        self.skip_local_write
    }

    pub fn skip_remote_write(&self) -> bool {
        self.skip_remote_write
    }

    pub fn skip_bus_notify(&self) -> bool {
        self.skip_bus_notify
    }

    pub fn on_factory_error(&self) -> Option<&FactoryErrorHook> {
        self.on_factory_error.as_ref()
    }

    pub fn is_grace_enabled(&self) -> bool {
        !self.grace.is_zero()
    }

    /// Serve the stale value immediately and recompute in the background.
    pub fn should_use_stale_while_revalidate(&self, has_fallback: bool) -> bool {
        self.is_grace_enabled() && self.timeout == Some(Duration::ZERO) && has_fallback
    }

    /// How long a caller may wait for the per-key lock. `None` waits forever.
    pub fn applicable_lock_timeout(&self, has_fallback: bool) -> Option<Duration> {
        if self.should_use_stale_while_revalidate(has_fallback) {
            return Some(Duration::ZERO);
        }

        if self.lock_timeout.is_some() {
            return self.lock_timeout;
        }

        if has_fallback && self.is_grace_enabled() {
            return self.timeout;
        }

        None
    }

    /// The budget racing the factory, if any.
    pub fn factory_timeout(&self, has_fallback: bool) -> Option<FactoryTimeout> {
        if has_fallback && self.is_grace_enabled() {
            if let Some(timeout) = self.timeout {
                return Some(FactoryTimeout::Soft(timeout));
            }
        }

        self.hard_timeout.map(FactoryTimeout::Hard)
    }

    /// Copy with a different tag set, used for internal marker writes.
    pub(crate) fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Eviction TTL for a write.
///
/// Never shorter than the logical TTL, so an entry is not evicted before it
/// goes stale: with grace enabled it is the longer of the two, without grace
/// it is the logical TTL. A value that never goes stale is never evicted.
fn physical_ttl(logical_ttl: Option<Duration>, grace: Duration) -> Option<Duration> {
    if grace.is_zero() {
        return logical_ttl;
    }

    logical_ttl.map(|ttl| ttl.max(grace))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(options: CacheOptions) -> CacheEntryOptions {
        CacheEntryOptions::resolve(&options, &DefaultsConfig::default())
    }

    #[test]
    fn test_defaults_are_applied() {
        let options = resolve(CacheOptions::new());
        assert_eq!(options.logical_ttl(), Some(Duration::from_secs(30 * 60)));
        assert!(!options.is_grace_enabled());
        assert_eq!(options.physical_ttl(), options.logical_ttl());
        assert_eq!(options.timeout(), Some(Duration::ZERO));
        assert_eq!(options.hard_timeout(), None);
    }

    #[test]
    fn test_physical_ttl_uses_grace_when_enabled() {
        let options = resolve(
            CacheOptions::new()
                .ttl(Duration::from_millis(100))
                .grace(Duration::from_secs(6 * 3600)),
        );
        assert_eq!(options.physical_ttl(), Some(Duration::from_secs(6 * 3600)));
        assert!(options.physical_ttl() >= options.logical_ttl());
    }

    #[test]
    fn test_physical_ttl_never_below_logical_ttl() {
        let options = resolve(
            CacheOptions::new()
                .ttl(Duration::from_secs(3600))
                .grace(Duration::from_secs(60)),
        );
        assert_eq!(options.physical_ttl(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_forever_has_no_physical_ttl() {
        let options = resolve(CacheOptions::new().forever().grace(Duration::from_secs(60)));
        assert_eq!(options.logical_ttl(), None);
        assert_eq!(options.physical_ttl(), None);
    }

    #[test]
    fn test_stale_while_revalidate_requires_all_conditions() {
        let graced = resolve(
            CacheOptions::new()
                .grace(Duration::from_secs(60))
                .timeout(Duration::ZERO),
        );
        assert!(graced.should_use_stale_while_revalidate(true));
        assert!(!graced.should_use_stale_while_revalidate(false));

        let no_grace = resolve(CacheOptions::new().timeout(Duration::ZERO));
        assert!(!no_grace.should_use_stale_while_revalidate(true));

        let with_timeout = resolve(
            CacheOptions::new()
                .grace(Duration::from_secs(60))
                .timeout(Duration::from_millis(50)),
        );
        assert!(!with_timeout.should_use_stale_while_revalidate(true));
    }

    #[test]
    fn test_applicable_lock_timeout() {
        let swr = resolve(CacheOptions::new().grace(Duration::from_secs(60)));
        assert_eq!(swr.applicable_lock_timeout(true), Some(Duration::ZERO));

        let explicit = resolve(CacheOptions::new().lock_timeout(Duration::from_millis(200)));
        assert_eq!(
            explicit.applicable_lock_timeout(false),
            Some(Duration::from_millis(200))
        );

        let soft = resolve(
            CacheOptions::new()
                .grace(Duration::from_secs(60))
                .timeout(Duration::from_millis(50)),
        );
        assert_eq!(soft.applicable_lock_timeout(true), Some(Duration::from_millis(50)));
        assert_eq!(soft.applicable_lock_timeout(false), None);
    }

    #[test]
    fn test_factory_timeout_kind() {
        let soft = resolve(
            CacheOptions::new()
                .grace(Duration::from_secs(60))
                .timeout(Duration::from_millis(50))
                .hard_timeout(Duration::from_secs(1)),
        );
        assert_eq!(
            soft.factory_timeout(true),
            Some(FactoryTimeout::Soft(Duration::from_millis(50)))
        );
        assert_eq!(
            soft.factory_timeout(false),
            Some(FactoryTimeout::Hard(Duration::from_secs(1)))
        );

        let none = resolve(CacheOptions::new().no_timeout());
        assert_eq!(none.factory_timeout(true), None);
    }

    #[test]
    fn test_suppress_falls_back_to_defaults() {
        let defaults = DefaultsConfig {
            suppress_remote_errors: Some(false),
            ..DefaultsConfig::default()
        };
        let unset = CacheEntryOptions::resolve(&CacheOptions::new(), &defaults);
        assert_eq!(unset.suppress_remote_errors(), Some(false));

        let overridden =
            CacheEntryOptions::resolve(&CacheOptions::new().suppress_remote_errors(true), &defaults);
        assert_eq!(overridden.suppress_remote_errors(), Some(true));
    }
}
