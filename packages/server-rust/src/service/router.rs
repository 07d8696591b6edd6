//! Handler routing: dispatches a `HandlerRequest` to the service registered
//! for its (prefix-stripped) destination.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::util::BoxCloneService;
use tower::{Service, ServiceExt};
use tracing::warn;

use super::handler::{HandlerError, HandlerRequest, HandlerResponse};

/// A type-erased handler for one destination.
pub type BoxHandler = BoxCloneService<HandlerRequest, HandlerResponse, HandlerError>;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<HandlerResponse, HandlerError>> + Send>>;

// ---------------------------------------------------------------------------
// HandlerRouter
// ---------------------------------------------------------------------------

/// Registration table mapping destinations to handler services.
///
/// Keys are destinations relative to the application prefix: a handler
/// registered for `"hello"` receives SENDs to `/app/hello`. A leading `/` on
/// the registered name is ignored.
#[derive(Clone, Default)]
pub struct HandlerRouter {
    handlers: HashMap<String, BoxHandler>,
}

impl HandlerRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler service, replacing any previous one for `destination`.
    pub fn register<S>(&mut self, destination: impl Into<String>, service: S) -> &mut Self
    where
        S: Service<HandlerRequest, Response = HandlerResponse, Error = HandlerError>
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        let destination = normalize(destination.into());
        if self
            .handlers
            .insert(destination.clone(), BoxCloneService::new(service))
            .is_some()
        {
            warn!(destination, "handler replaced");
        }
        self
    }

    /// Registers an async closure as a handler.
    pub fn register_fn<F, Fut>(&mut self, destination: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(HandlerRequest) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<HandlerResponse, HandlerError>> + Send + 'static,
    {
        self.register(destination, tower::service_fn(handler))
    }

    /// Registered destinations, sorted.
    #[must_use]
    pub fn destinations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn normalize(destination: String) -> String {
    match destination.strip_prefix('/') {
        Some(rest) => rest.to_string(),
        None => destination,
    }
}

impl Service<HandlerRequest> for HandlerRouter {
    type Response = HandlerResponse;
    type Error = HandlerError;
    type Future = HandlerFuture;

    // Readiness is driven per handler inside `call`.
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: HandlerRequest) -> Self::Future {
        match self.handlers.get(&req.destination) {
            Some(handler) => Box::pin(handler.clone().oneshot(req)),
            None => Box::pin(async move {
                Err(HandlerError::NoHandler {
                    destination: req.destination,
                })
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
