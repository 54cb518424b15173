//! The router that builds register against.
//!
//! `WebRouter` keeps its own ordered route table instead of axum's radix
//! router: evaluation is first-match-wins in registration order, identical
//! `(method, path)` pairs may coexist, and regex paths are supported. The
//! whole table is mounted as one axum fallback service.

mod event_bus;
mod matcher;
mod socket;

pub use event_bus::{EventBus, EventBusError};
pub use matcher::{PathMatcher, WILDCARD_PARAM};
pub use socket::SocketOptions;

use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::FromRequestParts;
use axum::response::{IntoResponse, Response};
use http::request::Parts;
use http::{Method, Request, StatusCode};

use crate::context::{HandlerInput, RoutingContext, SocketSession};
use crate::contracts::{AuthHandler, Flow, GlobalHandler};
use crate::error::HandlerError;
use crate::model::HttpMethod;
use crate::problem::Problem;
use crate::resolver::normalize;
use crate::wrapper::InvocableHandler;

pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// What a registered entry does, for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Http,
    Socket,
    Failure,
    Consumer,
}

/// One line of [`WebRouter::routes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub kind: RouteKind,
    pub methods: Vec<HttpMethod>,
    pub path: String,
    pub handler: String,
    pub protected: bool,
}

enum Target {
    Http(InvocableHandler),
    Socket {
        options: SocketOptions,
        handler: InvocableHandler,
    },
}

struct RouteEntry {
    methods: Vec<HttpMethod>,
    matcher: PathMatcher,
    target: Target,
    auth: Option<Arc<dyn AuthHandler>>,
}

impl RouteEntry {
    fn accepts(&self, method: &Method) -> bool {
        match self.target {
            Target::Socket { .. } => *method == Method::GET,
            Target::Http(_) => self.methods.iter().any(|m| match m {
                HttpMethod::Any => true,
                other => other.as_http().as_ref() == Some(method),
            }),
        }
    }
}

struct FailureEntry {
    matcher: PathMatcher,
    handler: InvocableHandler,
}

pub struct WebRouter {
    globals: Vec<Arc<dyn GlobalHandler>>,
    entries: Vec<RouteEntry>,
    failures: Vec<FailureEntry>,
    consumers: Vec<(String, String)>,
    event_bus: EventBus,
    body_limit: usize,
}

impl Default for WebRouter {
    fn default() -> Self {
        Self {
            globals: Vec::new(),
            entries: Vec::new(),
            failures: Vec::new(),
            consumers: Vec::new(),
            event_bus: EventBus::new(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl fmt::Debug for WebRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRouter")
            .field("globals", &self.globals.len())
            .field("routes", &self.entries.len())
            .field("failure_handlers", &self.failures.len())
            .field("consumers", &self.consumers.len())
            .field("body_limit", &self.body_limit)
            .finish()
    }
}

impl WebRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router delivering `#[consumer]` routes to an existing bus.
    pub fn with_event_bus(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            ..Self::default()
        }
    }

    pub fn set_body_limit(&mut self, bytes: usize) {
        self.body_limit = bytes;
    }

    pub fn body_limit(&self) -> usize {
        self.body_limit
    }

    pub fn event_bus(&self) -> EventBus {
        self.event_bus.clone()
    }

    pub fn register_global(&mut self, handler: Arc<dyn GlobalHandler>) {
        self.globals.push(handler);
    }

    pub fn register_route(
        &mut self,
        methods: Vec<HttpMethod>,
        path: PathMatcher,
        handler: InvocableHandler,
        auth: Option<Arc<dyn AuthHandler>>,
    ) {
        self.entries.push(RouteEntry {
            methods,
            matcher: path,
            target: Target::Http(handler),
            auth,
        });
    }

    pub fn register_failure_handler(&mut self, path: PathMatcher, handler: InvocableHandler) {
        self.failures.push(FailureEntry {
            matcher: path,
            handler,
        });
    }

    pub fn register_socket_bridge(
        &mut self,
        path: PathMatcher,
        options: SocketOptions,
        handler: InvocableHandler,
        auth: Option<Arc<dyn AuthHandler>>,
    ) {
        self.entries.push(RouteEntry {
            methods: vec![HttpMethod::Socket],
            matcher: path,
            target: Target::Socket { options, handler },
            auth,
        });
    }

    pub fn register_consumer(&mut self, address: impl Into<String>, handler: InvocableHandler) {
        let address = address.into();
        self.consumers
            .push((address.clone(), handler.name().to_string()));
        self.event_bus.register(address, handler);
    }

    /// Every registered entry in registration order, shadowed duplicates
    /// included.
    pub fn routes(&self) -> Vec<RouteInfo> {
        let mut out: Vec<RouteInfo> = self
            .entries
            .iter()
            .map(|e| {
                let (kind, handler) = match &e.target {
                    Target::Http(h) => (RouteKind::Http, h.name()),
                    Target::Socket { handler, .. } => (RouteKind::Socket, handler.name()),
                };
                RouteInfo {
                    kind,
                    methods: e.methods.clone(),
                    path: e.matcher.as_str().to_string(),
                    handler: handler.to_string(),
                    protected: e.auth.is_some(),
                }
            })
            .collect();
        out.extend(self.failures.iter().map(|f| RouteInfo {
            kind: RouteKind::Failure,
            methods: vec![HttpMethod::Any],
            path: f.matcher.as_str().to_string(),
            handler: f.handler.name().to_string(),
            protected: false,
        }));
        out.extend(self.consumers.iter().map(|(address, handler)| RouteInfo {
            kind: RouteKind::Consumer,
            methods: vec![HttpMethod::EventBus],
            path: address.clone(),
            handler: handler.clone(),
            protected: false,
        }));
        out
    }

    /// Mounts the table as the fallback of a fresh axum router.
    pub fn into_axum(self) -> axum::Router {
        let this = Arc::new(self);
        axum::Router::new().fallback(move |req: Request<Body>| {
            let this = this.clone();
            async move { this.dispatch(req).await }
        })
    }

    /// Serves one request.
    pub async fn dispatch(&self, req: Request<Body>) -> Response {
        let (mut parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, self.body_limit).await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(error = %e, limit = self.body_limit, "request body rejected");
                return Problem::from_status(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("request body exceeds {} bytes", self.body_limit),
                )
                .with_instance(parts.uri.path())
                .into_response();
            }
        };

        let mut ctx = RoutingContext::new(
            parts.method.clone(),
            parts.uri.clone(),
            parts.headers.clone(),
            bytes,
        );

        for global in &self.globals {
            match global.handle(&mut ctx).await {
                Ok(Flow::Next) => {}
                Ok(Flow::Respond(resp)) => return resp,
                Err(e) => return self.fail(ctx, e).await,
            }
        }

        let path = normalize(ctx.path());
        let mut path_matched = false;
        for entry in &self.entries {
            let Some(params) = entry.matcher.matches(&path) else {
                continue;
            };
            path_matched = true;
            if !entry.accepts(&parts.method) {
                continue;
            }
            ctx.set_params(params);
            if let Some(auth) = &entry.auth {
                if let Err(e) = auth.authenticate(&mut ctx).await {
                    return self.fail(ctx, e).await;
                }
            }
            return match &entry.target {
                Target::Http(handler) => match handler.call(HandlerInput::Http(ctx.clone())).await {
                    Ok(resp) => resp,
                    Err(e) => self.fail(ctx, e).await,
                },
                Target::Socket { options, handler } => {
                    upgrade(&mut parts, ctx, options, handler.clone()).await
                }
            };
        }

        if path_matched {
            Problem::from_status(
                StatusCode::METHOD_NOT_ALLOWED,
                format!("{} is not allowed on {}", parts.method, path),
            )
            .with_instance(path)
            .into_response()
        } else {
            Problem::from_status(StatusCode::NOT_FOUND, format!("no route for {path}"))
                .with_instance(path)
                .into_response()
        }
    }

    /// Failure path: first matching failure handler, else a problem body.
    async fn fail(&self, mut ctx: RoutingContext, error: HandlerError) -> Response {
        let error = Arc::new(error);
        let path = normalize(ctx.path());
        ctx.set_failure(error.clone());

        for entry in &self.failures {
            if entry.matcher.matches(&path).is_none() {
                continue;
            }
            match entry.handler.call(HandlerInput::Http(ctx)).await {
                Ok(resp) => return resp,
                Err(e) => {
                    tracing::warn!(
                        handler = entry.handler.name(),
                        error = %e,
                        original = %error,
                        "failure handler failed; using default failure response"
                    );
                    break;
                }
            }
        }

        let status = error.status_code();
        if status.is_server_error() {
            tracing::error!(%path, error = %error, "request failed");
        } else {
            tracing::debug!(%path, %status, error = %error, "request rejected");
        }
        error.to_problem().with_instance(path).into_response()
    }
}

async fn upgrade(
    parts: &mut Parts,
    ctx: RoutingContext,
    options: &SocketOptions,
    handler: InvocableHandler,
) -> Response {
    let ws = match WebSocketUpgrade::from_request_parts(parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let path = ctx.path().to_string();
    let params = ctx.params().clone();
    let user = ctx.user().map(str::to_string);
    options.apply(ws).on_upgrade(move |socket| async move {
        let session = SocketSession::new(socket, path.clone(), params, user);
        if let Err(e) = handler.call(HandlerInput::Socket(session)).await {
            tracing::error!(%path, handler = handler.name(), error = %e, "socket handler failed");
        }
    })
}
