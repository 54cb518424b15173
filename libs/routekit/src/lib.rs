//! # Routekit - Annotation-driven routing
//!
//! Declare handler methods on plain types with `#[controller]`, then let a
//! [`RouterBuilder`] collect, resolve, wrap and register them on a
//! [`WebRouter`] that axum can serve.
//!
//! ```rust,ignore
//! use routekit::{controller, HandlerRegistry, RouterBuilder, RoutingContext};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! pub struct UsersController;
//!
//! #[controller(sub_router)]
//! impl UsersController {
//!     #[get]
//!     async fn list(&self) -> &'static str {
//!         "[]"
//!     }
//!
//!     #[get(":id")]
//!     async fn find(&self, ctx: RoutingContext) -> String {
//!         format!("user {}", ctx.param("id").unwrap_or_default())
//!     }
//! }
//!
//! let registry = Arc::new(HandlerRegistry::new());
//! let router = RouterBuilder::create(registry)
//!     .add_route::<UsersController>()
//!     .build()?;
//! axum::serve(listener, router.into_axum()).await?;
//! ```
//!
//! `GET /users/list` and `GET /users/:id` are now served. Controllers can
//! also be discovered by package pattern with `add_route_package` or
//! `scan_classpath(true)`.

extern crate self as routekit;

pub use async_trait::async_trait;

// Re-export inventory for macro-generated code
pub use inventory;

pub use routekit_macros::controller;

pub mod builder;
pub mod collector;
pub mod config;
pub mod context;
pub mod contracts;
pub mod error;
pub mod model;
pub mod problem;
pub mod registry;
pub mod resolver;
pub mod transport;
pub mod wrapper;

pub use builder::{RouteDef, RouterBuilder};
pub use collector::{ControllerRegistration, ControllerScanner, InventoryScanner, ScanError};
pub use config::RouterConfig;
pub use context::{
    EventMessage, FromInput, HandlerInput, HandlerResult, InputKind, IntoHandlerOutcome,
    RoutingContext, SocketFrame, SocketSession,
};
pub use contracts::{
    invoker, AuthHandler, Controller, ControllerRef, Flow, GlobalHandler, Instance, Instances,
    Instantiator,
};
pub use error::{BuildError, HandlerError};
pub use model::{HttpMethod, Role, DEFAULT_AUTH_HANDLER_KEY};
pub use problem::Problem;
pub use registry::{HandlerRegistry, RegisteredHandlers, RegistryError};
pub use transport::{EventBus, EventBusError, SocketOptions, WebRouter};
pub use wrapper::InvocableHandler;

/// Items used by `#[controller]` expansions. Not a stable API.
#[doc(hidden)]
pub mod __private {
    pub use futures::future::BoxFuture;
    pub use std::sync::Arc;
}
