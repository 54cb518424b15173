//! Adapts a controller method into the call shape the transport expects.
//!
//! Shape problems (parameter count, parameter kind that the route can never
//! supply) are rejected here, at build time. Failures during a call, panics
//! included, come back as [`HandlerError`] so the transport can route them to
//! its failure handlers.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::context::{
    FromInput, HandlerInput, HandlerResult, InputKind, IntoHandlerOutcome, RoutingContext,
};
use crate::contracts::Instance;
use crate::error::{BuildError, HandlerError};
use crate::model::{HandlerDescriptor, HttpMethod, Role};

type CallFn = dyn Fn(HandlerInput) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// A ready-to-register handler.
#[derive(Clone)]
pub struct InvocableHandler {
    name: Arc<str>,
    call: Arc<CallFn>,
}

impl InvocableHandler {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HandlerInput) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
    {
        let name: String = name.into();
        Self {
            name: name.into(),
            call: Arc::new(f),
        }
    }

    /// Handler from an async closure over the HTTP context.
    pub fn from_fn<F, Fut, O>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(RoutingContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
        O: IntoHandlerOutcome,
    {
        let f = Arc::new(f);
        Self::new(name, move |input| {
            let f = f.clone();
            Box::pin(async move {
                match RoutingContext::from_input(input) {
                    Ok(ctx) => f(ctx).await.into_outcome(),
                    Err(e) => Err(e),
                }
            })
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name: String = name.into();
        self.name = name.into();
        self
    }

    pub fn call(&self, input: HandlerInput) -> BoxFuture<'static, HandlerResult> {
        (self.call)(input)
    }
}

impl fmt::Debug for InvocableHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InvocableHandler").field(&self.name).finish()
    }
}

/// Input kinds a route of this shape can supply.
fn supplied_input(descriptor: &HandlerDescriptor) -> InputKind {
    if descriptor.http_methods.contains(&HttpMethod::EventBus) {
        InputKind::Event
    } else if descriptor.role == Role::Socket {
        InputKind::Socket
    } else {
        InputKind::Http
    }
}

pub fn wrap(
    instance: Instance,
    descriptor: &HandlerDescriptor,
) -> Result<InvocableHandler, BuildError> {
    let method = &descriptor.method;
    match method.arity {
        0 => {}
        1 => {
            let input = method.input.unwrap_or(InputKind::Any);
            let supplied = supplied_input(descriptor);
            if input != InputKind::Any && input != supplied {
                return Err(BuildError::IncompatibleInput {
                    controller: descriptor.owner,
                    method: method.name,
                    input,
                    role: descriptor.role,
                });
            }
        }
        arity => {
            return Err(BuildError::UnsupportedArity {
                controller: descriptor.owner,
                method: method.name,
                arity,
            })
        }
    }

    let label: Arc<str> = format!("{}::{}", descriptor.owner, method.name).into();
    let invoker = method.invoker.clone();
    let off_loop = descriptor.role == Role::Blocking || descriptor.blocking;

    let name = label.to_string();
    let handler = if off_loop {
        InvocableHandler::new(name, move |input| {
            let invoker = invoker.clone();
            let instance = instance.clone();
            let label = label.clone();
            Box::pin(async move {
                let rt = tokio::runtime::Handle::current();
                let joined =
                    tokio::task::spawn_blocking(move || rt.block_on(invoker(instance, input)))
                        .await;
                match joined {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => Err(panicked(&label, e.into_panic())),
                    Err(e) => Err(HandlerError::Other(anyhow::Error::new(e))),
                }
            })
        })
    } else {
        InvocableHandler::new(name, move |input| {
            let fut = AssertUnwindSafe(invoker(instance.clone(), input)).catch_unwind();
            let label = label.clone();
            Box::pin(async move {
                match fut.await {
                    Ok(result) => result,
                    Err(payload) => Err(panicked(&label, payload)),
                }
            })
        })
    };
    Ok(handler)
}

fn panicked(label: &str, payload: Box<dyn Any + Send>) -> HandlerError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    tracing::error!(handler = label, %message, "handler panicked");
    HandlerError::Panicked {
        handler: label.to_string(),
        message,
    }
}
