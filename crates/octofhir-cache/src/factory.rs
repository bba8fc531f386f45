//! Factory types.

use std::future::Future;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::BoxError;

/// Result of a factory run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactoryOutcome<T> {
    /// Cache and return this value.
    Value(T),
    /// Do not cache anything; the caller sees a miss.
    Skip,
}

impl<T> FactoryOutcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Skip => None,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }
}

/// What a factory knows about the key it computes.
#[derive(Debug, Clone)]
pub struct FactoryContext {
    key: String,
    stale: Option<Value>,
}

impl FactoryContext {
    pub fn new(key: impl Into<String>, stale: Option<Value>) -> Self {
        Self {
            key: key.into(),
            stale,
        }
    }

    /// Key relative to the store prefix.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn has_stale_value(&self) -> bool {
        self.stale.is_some()
    }

    /// The graced value being replaced, if any.
    pub fn stale_value<T: DeserializeOwned>(&self) -> Option<T> {
        self.stale
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// Type-erased factory handed to the get-or-set machinery.
pub type BoxFactory = Box<
    dyn FnOnce(FactoryContext) -> BoxFuture<'static, Result<FactoryOutcome<Value>, BoxError>>
        + Send,
>;

/// Box a factory closure.
pub fn boxed_factory<F, Fut>(factory: F) -> BoxFactory
where
    F: FnOnce(FactoryContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<FactoryOutcome<Value>, BoxError>> + Send + 'static,
{
    Box::new(move |ctx| Box::pin(factory(ctx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stale_value_deserializes() {
        let ctx = FactoryContext::new("k", Some(json!({"n": 1})));
        assert!(ctx.has_stale_value());
        assert_eq!(ctx.stale_value::<Value>(), Some(json!({"n": 1})));
        assert_eq!(ctx.stale_value::<String>(), None);
    }

    #[tokio::test]
    async fn test_boxed_factory_runs() {
        let factory = boxed_factory(|ctx: FactoryContext| async move {
            Ok(FactoryOutcome::Value(json!(ctx.key())))
        });
        let outcome = factory(FactoryContext::new("k", None)).await.unwrap();
        assert_eq!(outcome, FactoryOutcome::Value(json!("k")));
    }
}
