use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::cancellation::CancelSignal;
use crate::error::HandlerError;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

/// A host-registered RPC method.
///
/// `accepts_cancel` replaces the Python original's `inspect.signature`
/// reflection over a `cancel_event` parameter name: instead of guessing from
/// argument names, a handler declares up front whether dispatch should hand
/// it a [`CancelSignal`] (§4.6, REDESIGN FLAG).
pub trait Handler: Send + Sync {
    fn accepts_cancel(&self) -> bool {
        false
    }

    fn call(&self, request: Value, cancel: Option<CancelSignal>) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    fn call(&self, request: Value, _cancel: Option<CancelSignal>) -> HandlerFuture {
        Box::pin((self)(request))
    }
}

/// A handler that wants to observe cancellation, wrapped so it satisfies
/// [`Handler::accepts_cancel`] without the caller writing a manual `impl`.
pub struct CancellableHandler<F>(pub F);

impl<F, Fut> Handler for CancellableHandler<F>
where
    F: Fn(Value, CancelSignal) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    fn accepts_cancel(&self) -> bool {
        true
    }

    fn call(&self, request: Value, cancel: Option<CancelSignal>) -> HandlerFuture {
        let cancel = cancel.expect("dispatch must supply a CancelSignal to a cancellable handler");
        Box::pin((self.0)(request, cancel))
    }
}

/// The table of exposed methods, consulted once per request by the dispatch
/// task. Re-registering a name overwrites the previous entry and logs a
/// warning — the same behavior as the Python original's module-global
/// `_exposed_functions` dict under repeated `@expose` decoration.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in `health` method.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("health", crate::handlers::health::health_handler());
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, handler: impl Handler + 'static) {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            warn!(method = %name, "overwriting previously registered handler");
        }
        self.handlers.insert(name, Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

/// Registers a handler against a [`HandlerRegistry`] in a single expression,
/// mirroring the ergonomics of the Python original's `@expose` decorator
/// without needing a process-global table (§4.3, REDESIGN FLAG).
///
/// ```ignore
/// register!(registry, "health", |_req| async move { Ok(serde_json::json!({"ok": true})) });
/// register!(registry, "slow_op", cancellable |req, cancel| async move { ... });
/// ```
#[macro_export]
macro_rules! register {
    ($registry:expr, $name:expr, cancellable $handler:expr) => {
        $registry.register($name, $crate::CancellableHandler($handler))
    };
    ($registry:expr, $name:expr, $handler:expr) => {
        $registry.register($name, $handler)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_handler() -> impl Handler {
        |_req: Value| async move { Ok(json!({"ok": true})) }
    }

    #[test]
    fn health_is_registered_by_default() {
        let registry = HandlerRegistry::with_builtins();
        assert!(registry.contains("health"));
    }

    #[test]
    fn unregistered_method_is_absent() {
        let registry = HandlerRegistry::with_builtins();
        assert!(registry.get("does-not-exist").is_none());
    }

    #[test]
    fn re_registering_overwrites_without_panicking() {
        let mut registry = HandlerRegistry::new();
        registry.register("thing", noop_handler());
        registry.register("thing", noop_handler());
        assert!(registry.contains("thing"));
    }

    #[tokio::test]
    async fn registered_plain_handler_does_not_accept_cancel() {
        let mut registry = HandlerRegistry::new();
        registry.register("thing", noop_handler());
        let handler = registry.get("thing").unwrap();
        assert!(!handler.accepts_cancel());
        let result = handler.call(json!({}), None).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
    }
}
