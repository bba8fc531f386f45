//! Cache error types.
//!
//! Every failure surfaced by the coordinator is a [`CacheError`]. The first six
//! variants form the recoverable/unrecoverable taxonomy used by the get-or-set
//! state machine; the rest wrap infrastructure failures.

use std::fmt;
use std::time::Duration;

/// Boxed error used to carry factory and driver causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Type alias for a cache result.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The per-key lock was not acquired within the allowed wait.
    #[error("Lock timeout: could not acquire lock for '{key}' within {timeout:?}")]
    LockTimeout {
        /// The key whose lock could not be acquired.
        key: String,
        /// The wait budget that elapsed.
        timeout: Duration,
    },

    /// The factory exceeded its soft budget. Recoverable with a stale value.
    #[error("Soft timeout: factory for '{key}' exceeded {timeout:?}")]
    SoftTimeout {
        /// The key being computed.
        key: String,
        /// The soft budget that elapsed.
        timeout: Duration,
    },

    /// The factory exceeded its hard budget. Always surfaced.
    #[error("Hard timeout: factory for '{key}' exceeded {timeout:?}")]
    HardTimeout {
        /// The key being computed.
        key: String,
        /// The hard budget that elapsed.
        timeout: Duration,
    },

    /// The factory returned an error.
    #[error("Factory error for '{key}': {source}")]
    Factory {
        /// The key being computed.
        key: String,
        /// The error raised by the factory.
        #[source]
        source: BoxError,
        /// Whether the factory was running detached from any caller.
        is_background: bool,
    },

    /// A remote-store operation failed and suppression was not in effect.
    #[error("Remote store error during {operation}: {source}")]
    RemoteStore {
        /// The driver operation that failed.
        operation: &'static str,
        /// The underlying driver failure.
        #[source]
        source: BoxError,
    },

    /// Attempted to store the "no value" marker.
    #[error("Cannot cache an absent value for '{key}'")]
    UndefinedValue {
        /// The key that was being written.
        key: String,
    },

    /// An entry or bus message could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// A storage driver reported a failure.
    #[error("Driver error: {message}")]
    Driver {
        /// Description of the failure.
        message: String,
    },

    /// The bus transport reported a failure.
    #[error("Bus error: {message}")]
    Bus {
        /// Description of the failure.
        message: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration value: {0}")]
    Config(String),
}

impl CacheError {
    /// Creates a new `LockTimeout` error.
    #[must_use]
    pub fn lock_timeout(key: impl Into<String>, timeout: Duration) -> Self {
        Self::LockTimeout {
            key: key.into(),
            timeout,
        }
    }

    /// Creates a new `SoftTimeout` error.
    #[must_use]
    pub fn soft_timeout(key: impl Into<String>, timeout: Duration) -> Self {
        Self::SoftTimeout {
            key: key.into(),
            timeout,
        }
    }

    /// Creates a new `HardTimeout` error.
    #[must_use]
    pub fn hard_timeout(key: impl Into<String>, timeout: Duration) -> Self {
        Self::HardTimeout {
            key: key.into(),
            timeout,
        }
    }

    /// Creates a new `Factory` error.
    #[must_use]
    pub fn factory(key: impl Into<String>, source: BoxError, is_background: bool) -> Self {
        Self::Factory {
            key: key.into(),
            source,
            is_background,
        }
    }

    /// Creates a new `RemoteStore` error.
    #[must_use]
    pub fn remote_store(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::RemoteStore {
            operation,
            source: source.into(),
        }
    }

    /// Creates a new `UndefinedValue` error.
    #[must_use]
    pub fn undefined_value(key: impl Into<String>) -> Self {
        Self::UndefinedValue { key: key.into() }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Driver` error.
    #[must_use]
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
        }
    }

    /// Creates a new `Bus` error.
    #[must_use]
    pub fn bus(message: impl Into<String>) -> Self {
        Self::Bus {
            message: message.into(),
        }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns `true` for lock timeouts.
    #[must_use]
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Returns `true` for soft timeouts.
    #[must_use]
    pub fn is_soft_timeout(&self) -> bool {
        matches!(self, Self::SoftTimeout { .. })
    }

    /// Returns `true` for hard timeouts.
    #[must_use]
    pub fn is_hard_timeout(&self) -> bool {
        matches!(self, Self::HardTimeout { .. })
    }

    /// Returns `true` for any lock, soft or hard timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.is_lock_timeout() || self.is_soft_timeout() || self.is_hard_timeout()
    }

    /// Returns `true` for factory failures.
    #[must_use]
    pub fn is_factory_error(&self) -> bool {
        matches!(self, Self::Factory { .. })
    }

    /// Returns `true` for remote-store failures.
    #[must_use]
    pub fn is_remote_store(&self) -> bool {
        matches!(self, Self::RemoteStore { .. })
    }

    /// Returns `true` if a graced stale value may replace this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::SoftTimeout { .. } | Self::Factory { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::LockTimeout { .. } | Self::SoftTimeout { .. } | Self::HardTimeout { .. } => {
                ErrorCategory::Timeout
            }
            Self::Factory { .. } => ErrorCategory::Factory,
            Self::RemoteStore { .. } => ErrorCategory::RemoteStore,
            Self::UndefinedValue { .. } => ErrorCategory::Validation,
            Self::Serialization { .. } => ErrorCategory::Serialization,
            Self::Driver { .. } | Self::Bus { .. } => ErrorCategory::Infrastructure,
            Self::Config(_) => ErrorCategory::Config,
        }
    }
}

/// Categories of cache errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Lock, soft or hard timeout.
    Timeout,
    /// Factory failure.
    Factory,
    /// Remote store failure.
    RemoteStore,
    /// Rejected input.
    Validation,
    /// Encoding or decoding failure.
    Serialization,
    /// Driver or transport failure.
    Infrastructure,
    /// Configuration error.
    Config,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Factory => write!(f, "factory"),
            Self::RemoteStore => write!(f, "remote_store"),
            Self::Validation => write!(f, "validation"),
            Self::Serialization => write!(f, "serialization"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Config => write!(f, "config"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::lock_timeout("users:1", Duration::from_millis(50));
        assert_eq!(
            err.to_string(),
            "Lock timeout: could not acquire lock for 'users:1' within 50ms"
        );

        let err = CacheError::undefined_value("users:1");
        assert_eq!(err.to_string(), "Cannot cache an absent value for 'users:1'");

        let err = CacheError::factory("users:1", "boom".into(), false);
        assert_eq!(err.to_string(), "Factory error for 'users:1': boom");
    }

    #[test]
    fn test_error_predicates() {
        let err = CacheError::soft_timeout("k", Duration::ZERO);
        assert!(err.is_soft_timeout());
        assert!(err.is_recoverable());
        assert!(!err.is_hard_timeout());

        let err = CacheError::hard_timeout("k", Duration::from_secs(1));
        assert!(err.is_hard_timeout());
        assert!(!err.is_recoverable());

        let err = CacheError::remote_store("get", CacheError::driver("down"));
        assert!(err.is_remote_store());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            CacheError::lock_timeout("k", Duration::ZERO).category(),
            ErrorCategory::Timeout
        );
        assert_eq!(
            CacheError::undefined_value("k").category(),
            ErrorCategory::Validation
        );
        assert_eq!(CacheError::bus("down").category(), ErrorCategory::Infrastructure);
        assert_eq!(ErrorCategory::RemoteStore.to_string(), "remote_store");
    }
}
