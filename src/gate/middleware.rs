//! Tower middleware that enforces the gate in front of a service.
//!
//! One layer instance gates one client identity; construct a layer per
//! connection/principal. A denial surfaces as [`ExecError::Throttled`] with
//! the wait hint, without ever invoking the inner service.

use crate::error::{ApiFailure, ExecError};
use crate::gate::{Decision, RequestGate};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Layer applying a [`RequestGate`] to every call for one client identity.
#[derive(Clone, Debug)]
pub struct GateLayer {
    gate: Arc<RequestGate>,
    client: String,
}

impl GateLayer {
    pub fn new(gate: Arc<RequestGate>, client: impl Into<String>) -> Self {
        Self { gate, client: client.into() }
    }
}

impl<S> Layer<S> for GateLayer {
    type Service = GateService<S>;

    fn layer(&self, service: S) -> Self::Service {
        GateService { inner: service, gate: self.gate.clone(), client: self.client.clone() }
    }
}

/// Middleware service produced by [`GateLayer`].
#[derive(Clone, Debug)]
pub struct GateService<S> {
    inner: S,
    gate: Arc<RequestGate>,
    client: String,
}

impl<S, Req> Service<Req> for GateService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Into<ApiFailure> + Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = ExecError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(|e| ExecError::Api(e.into()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let gate = self.gate.clone();
        let client = self.client.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match gate.admit(&client) {
                Decision::Allowed { .. } => {
                    inner.call(req).await.map_err(|e| ExecError::Api(e.into()))
                }
                Decision::Denied { wait, scope } => Err(ExecError::Throttled { scope, wait }),
            }
        })
    }
}
