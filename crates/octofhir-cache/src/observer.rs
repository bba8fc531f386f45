//! Operation observer hook for tracing integrations.

use crate::error::CacheError;

/// Borrowed description of a facade operation.
#[derive(Debug, Clone, Copy)]
pub struct OperationInfo<'a> {
    /// Operation name, e.g. `"get_or_set"`.
    pub operation: &'static str,
    /// Key relative to the store prefix, when the operation has one.
    pub key: Option<&'a str>,
    /// Store label.
    pub store: &'a str,
}

/// Synchronous callbacks around every facade operation.
///
/// Called inline on the caller's task, so implementations should return
/// quickly. When no observer is attached nothing is built.
pub trait OperationObserver: Send + Sync {
    fn on_operation_start(&self, info: &OperationInfo<'_>);

    fn on_operation_end(&self, info: &OperationInfo<'_>, outcome: Result<(), &CacheError>);
}
