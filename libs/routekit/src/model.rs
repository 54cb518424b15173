//! Declarative route metadata.
//!
//! These types are what `#[controller]` emits (and what a hand-written
//! [`Controller`](crate::Controller) impl returns). They carry no behavior
//! beyond small conversions; resolution happens in [`crate::resolver`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::InputKind;
use crate::contracts::Invoker;

/// Identity under which `#[auth]` (without an argument) looks up its handler.
pub const DEFAULT_AUTH_HANDLER_KEY: &str = "default-auth-handler";

/// HTTP verb or non-HTTP channel a route is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Connect,
    /// Matches every HTTP verb (`#[handler]` without a verb annotation).
    Any,
    /// WebSocket bridge.
    Socket,
    /// Local event-bus consumer.
    EventBus,
}

impl HttpMethod {
    /// The concrete HTTP method, if this is an HTTP verb.
    pub fn as_http(&self) -> Option<http::Method> {
        match self {
            HttpMethod::Get => Some(http::Method::GET),
            HttpMethod::Post => Some(http::Method::POST),
            HttpMethod::Put => Some(http::Method::PUT),
            HttpMethod::Delete => Some(http::Method::DELETE),
            HttpMethod::Patch => Some(http::Method::PATCH),
            HttpMethod::Head => Some(http::Method::HEAD),
            HttpMethod::Options => Some(http::Method::OPTIONS),
            HttpMethod::Trace => Some(http::Method::TRACE),
            HttpMethod::Connect => Some(http::Method::CONNECT),
            HttpMethod::Any | HttpMethod::Socket | HttpMethod::EventBus => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Any => "ANY",
            HttpMethod::Socket => "SOCKET",
            HttpMethod::EventBus => "EVENTBUS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution/registration category of a handler method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Normal,
    /// Runs on the blocking worker pool instead of the async executor.
    Blocking,
    /// Registered as a failure interceptor, not as a normal route.
    Failure,
    /// Registered against the WebSocket bridge.
    Socket,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Normal => "normal",
            Role::Blocking => "blocking",
            Role::Failure => "failure",
            Role::Socket => "socket",
        };
        f.write_str(s)
    }
}

/// A verb annotation such as `#[get("/items", regex = false)]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerbAnnotation {
    pub method: HttpMethod,
    /// Explicit path; empty means "use the method name".
    pub value: String,
    pub regex: bool,
}

impl VerbAnnotation {
    pub fn new(method: HttpMethod, value: impl Into<String>) -> Self {
        Self {
            method,
            value: value.into(),
            regex: false,
        }
    }

    pub fn regex(method: HttpMethod, pattern: impl Into<String>) -> Self {
        Self {
            method,
            value: pattern.into(),
            regex: true,
        }
    }
}

/// Every recognized annotation found on one method.
///
/// Role markers are flags rather than an enum: a method may carry several of
/// them and they are combined by the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodAnnotations {
    pub handler: bool,
    pub blocking: bool,
    pub failure: bool,
    /// `#[sockjs("path")]`; `Some("")` means "use the method name".
    pub socket: Option<String>,
    /// `#[consumer("address")]`.
    pub consumer: Option<String>,
    pub verbs: Vec<VerbAnnotation>,
    /// `#[auth]` / `#[auth("identity")]`.
    pub auth: Option<String>,
}

impl MethodAnnotations {
    /// True when at least one handler-bearing annotation is present.
    pub fn is_route(&self) -> bool {
        self.handler
            || self.blocking
            || self.failure
            || self.socket.is_some()
            || self.consumer.is_some()
            || !self.verbs.is_empty()
    }

    pub fn with_handler(mut self) -> Self {
        self.handler = true;
        self
    }

    pub fn with_blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.failure = true;
        self
    }

    pub fn with_socket(mut self, path: impl Into<String>) -> Self {
        self.socket = Some(path.into());
        self
    }

    pub fn with_consumer(mut self, address: impl Into<String>) -> Self {
        self.consumer = Some(address.into());
        self
    }

    pub fn with_verb(mut self, verb: VerbAnnotation) -> Self {
        self.verbs.push(verb);
        self
    }

    pub fn with_auth(mut self, identity: impl Into<String>) -> Self {
        self.auth = Some(identity.into());
        self
    }
}

/// Reference to a handler method: its name, its declared shape and the
/// type-erased invoker generated for it.
#[derive(Clone)]
pub struct MethodRef {
    pub name: &'static str,
    /// Number of declared parameters, receiver excluded.
    pub arity: usize,
    /// Kind of the single parameter, when `arity == 1`.
    pub input: Option<InputKind>,
    pub invoker: Invoker,
}

impl fmt::Debug for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRef")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("input", &self.input)
            .finish()
    }
}

/// One annotated method as declared on a controller.
#[derive(Debug, Clone)]
pub struct MethodSpec {
    pub method: MethodRef,
    pub annotations: MethodAnnotations,
}

/// Type-level `sub_router` metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubRouterDescriptor {
    /// Explicit prefix; empty means "derive from the type name".
    pub prefix: String,
}

impl SubRouterDescriptor {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// `#[controller(sub_router)]` without a value.
    pub fn by_convention() -> Self {
        Self::default()
    }
}

/// Path of a route before prefixing: either a literal or a raw pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    Literal(String),
    Regex(String),
}

/// A collected handler: immutable once built.
#[derive(Debug, Clone)]
pub struct HandlerDescriptor {
    /// Short type name of the owning controller.
    pub owner: &'static str,
    pub method: MethodRef,
    pub http_methods: Vec<HttpMethod>,
    pub path: PathPattern,
    pub role: Role,
    /// Failure handlers annotated `#[blocking]` keep that placement.
    pub blocking: bool,
    pub auth: Option<String>,
    /// Declaration order within the owner.
    pub order: usize,
}
