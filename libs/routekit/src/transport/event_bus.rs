//! In-process event bus backing `#[consumer]` routes.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::context::{EventMessage, HandlerInput};
use crate::error::HandlerError;
use crate::wrapper::InvocableHandler;

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("no consumer registered for '{0}'")]
    NoConsumers(String),

    #[error("consumer of '{0}' finished without replying")]
    NoReply(String),

    #[error("consumer of '{address}' failed: {message}")]
    Failed { address: String, message: String },

    #[error("no reply from '{address}' within {after:?}")]
    Timeout { address: String, after: Duration },

    #[error("event body is not serializable: {0}")]
    Body(#[from] serde_json::Error),
}

#[derive(Default)]
struct Consumers {
    handlers: Vec<InvocableHandler>,
    next: AtomicUsize,
}

impl Consumers {
    fn pick(&self) -> Option<InvocableHandler> {
        if self.handlers.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.handlers.len();
        Some(self.handlers[i].clone())
    }
}

/// Cheap to clone; clones share consumers.
#[derive(Clone, Default)]
pub struct EventBus {
    consumers: Arc<DashMap<String, Consumers>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("addresses", &self.addresses())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: impl Into<String>, handler: InvocableHandler) {
        self.consumers
            .entry(address.into())
            .or_default()
            .handlers
            .push(handler);
    }

    /// Registers a closure consumer.
    pub fn consumer<F, Fut>(&self, address: impl Into<String>, f: F)
    where
        F: Fn(EventMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let address = address.into();
        let f = Arc::new(f);
        let handler = InvocableHandler::new(format!("consumer({address})"), move |input| {
            let f = f.clone();
            Box::pin(async move {
                let msg = match input {
                    HandlerInput::Event(m) => m,
                    other => {
                        return Err(HandlerError::InputMismatch {
                            expected: crate::context::InputKind::Event,
                            actual: other.kind(),
                        })
                    }
                };
                f(msg).await.map(|_| axum::response::IntoResponse::into_response(()))
            })
        });
        self.register(address, handler);
    }

    pub fn addresses(&self) -> Vec<String> {
        let mut out: Vec<String> = self.consumers.iter().map(|e| e.key().clone()).collect();
        out.sort();
        out
    }

    pub fn consumer_count(&self, address: &str) -> usize {
        self.consumers
            .get(address)
            .map(|c| c.handlers.len())
            .unwrap_or(0)
    }

    /// Delivers to every consumer of `address`; returns how many received it.
    pub fn publish(&self, address: &str, body: impl Serialize) -> Result<usize, EventBusError> {
        let body = serde_json::to_value(body)?;
        let handlers = self
            .consumers
            .get(address)
            .map(|c| c.handlers.clone())
            .unwrap_or_default();
        for handler in &handlers {
            spawn_delivery(handler.clone(), EventMessage::new(address, body.clone()));
        }
        Ok(handlers.len())
    }

    /// Point-to-point delivery without a reply. Consumers take turns.
    pub fn send(&self, address: &str, body: impl Serialize) -> Result<(), EventBusError> {
        let body = serde_json::to_value(body)?;
        let handler = self.pick(address)?;
        spawn_delivery(handler, EventMessage::new(address, body));
        Ok(())
    }

    /// Point-to-point delivery waiting for [`EventMessage::reply`].
    pub async fn request(
        &self,
        address: &str,
        body: impl Serialize,
        timeout: Duration,
    ) -> Result<Value, EventBusError> {
        let body = serde_json::to_value(body)?;
        let handler = self.pick(address)?;
        let (tx, rx) = oneshot::channel();
        let msg = EventMessage::new(address, body).with_reply(tx);
        let task = tokio::spawn(async move { handler.call(HandlerInput::Event(msg)).await });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(_)) => match task.await {
                Ok(Err(e)) => Err(EventBusError::Failed {
                    address: address.to_string(),
                    message: e.to_string(),
                }),
                _ => Err(EventBusError::NoReply(address.to_string())),
            },
            Err(_) => Err(EventBusError::Timeout {
                address: address.to_string(),
                after: timeout,
            }),
        }
    }

    fn pick(&self, address: &str) -> Result<InvocableHandler, EventBusError> {
        self.consumers
            .get(address)
            .and_then(|c| c.pick())
            .ok_or_else(|| EventBusError::NoConsumers(address.to_string()))
    }
}

fn spawn_delivery(handler: InvocableHandler, msg: EventMessage) {
    tokio::spawn(async move {
        let address = msg.address().to_string();
        if let Err(e) = handler.call(HandlerInput::Event(msg)).await {
            tracing::error!(%address, handler = handler.name(), error = %e, "event consumer failed");
        }
    });
}
