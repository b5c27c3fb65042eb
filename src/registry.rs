//! Operation registry: the seam between the execution core and the
//! per-endpoint API methods.
//!
//! The surrounding system maps tool identifiers (`"create_commit"`,
//! `"update_merge_request"`, ...) to handlers; the orchestrator only ever
//! looks handlers up and invokes them. Handlers are expected to call the
//! remote API through the gated pipeline and to classify failures as
//! [`ApiFailure`]s. The registry is read-only during a batch run.

use crate::error::ApiFailure;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Ambient parameters a handler receives alongside its arguments.
#[derive(Debug, Clone, Default)]
pub struct HandlerContext {
    /// Identity the call is throttled and attributed under.
    pub client_id: String,
    /// Batch-level defaults (e.g. the target project) injected into steps
    /// that do not set them explicitly.
    pub defaults: Map<String, Value>,
}

impl HandlerContext {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self { client_id: client_id.into(), defaults: Map::new() }
    }

    pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }
}

/// One named remote operation.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn invoke(&self, ctx: &HandlerContext, args: Value) -> Result<Value, ApiFailure>;
}

/// Maps tool identifiers to handlers.
pub trait OperationRegistry: Send + Sync {
    fn lookup(&self, tool: &str) -> Option<Arc<dyn OperationHandler>>;
}

/// Plain in-memory registry.
#[derive(Default)]
pub struct InMemoryRegistry {
    handlers: HashMap<String, Arc<dyn OperationHandler>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the identifier.
    pub fn register(
        mut self,
        tool: impl Into<String>,
        handler: Arc<dyn OperationHandler>,
    ) -> Self {
        self.handlers.insert(tool.into(), handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl OperationRegistry for InMemoryRegistry {
    fn lookup(&self, tool: &str) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(tool).cloned()
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> OperationHandler for FnHandler<F>
where
    F: Fn(HandlerContext, Value) -> BoxFuture<'static, Result<Value, ApiFailure>> + Send + Sync,
{
    async fn invoke(&self, ctx: &HandlerContext, args: Value) -> Result<Value, ApiFailure> {
        (self.0)(ctx.clone(), args).await
    }
}

/// Wrap a closure as an [`OperationHandler`].
///
/// ```rust
/// use paceline::registry::{handler_fn, HandlerContext, OperationHandler};
/// use serde_json::json;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let handler = handler_fn(|_ctx, args| {
///     Box::pin(async move { Ok(json!({ "echo": args })) })
/// });
/// let out = handler.invoke(&HandlerContext::new("ci"), json!(1)).await.unwrap();
/// assert_eq!(out, json!({ "echo": 1 }));
/// # });
/// ```
pub fn handler_fn<F>(f: F) -> Arc<dyn OperationHandler>
where
    F: Fn(HandlerContext, Value) -> BoxFuture<'static, Result<Value, ApiFailure>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHandler(f))
}
