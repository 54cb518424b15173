//! Fluent assembly of a [`WebRouter`] from controllers, global handlers and
//! custom routes.
//!
//! A builder is single-use: after [`RouterBuilder::build`] every setter
//! panics and every further `build` fails with [`BuildError::AlreadyBuilt`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::collector::{collect, ControllerScanner, Exclusions, InventoryScanner};
use crate::config::RouterConfig;
use crate::context::{IntoHandlerOutcome, RoutingContext};
use crate::contracts::{
    AuthFactory, AuthHandler, Controller, ControllerRef, GlobalHandler, Instances, Instantiator,
};
use crate::error::BuildError;
use crate::model::{HttpMethod, Role, DEFAULT_AUTH_HANDLER_KEY};
use crate::registry::{HandlerRegistry, RegisteredHandlers};
use crate::resolver::resolve;
use crate::transport::{PathMatcher, SocketOptions, WebRouter};
use crate::wrapper::{wrap, InvocableHandler};

/// Pattern `scan_classpath(true)` installs.
pub const MATCH_ALL_PACKAGES: &str = ".*";

/// A route declared in code through [`RouterBuilder::route`].
#[derive(Debug, Default)]
pub struct RouteDef {
    methods: Vec<HttpMethod>,
    path: Option<String>,
    regex: bool,
    handler: Option<InvocableHandler>,
    auth: Option<String>,
    failure: bool,
}

impl RouteDef {
    pub fn method(mut self, method: HttpMethod) -> Self {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    pub fn get(self, path: impl Into<String>) -> Self {
        self.method(HttpMethod::Get).path(path)
    }

    pub fn post(self, path: impl Into<String>) -> Self {
        self.method(HttpMethod::Post).path(path)
    }

    pub fn put(self, path: impl Into<String>) -> Self {
        self.method(HttpMethod::Put).path(path)
    }

    pub fn delete(self, path: impl Into<String>) -> Self {
        self.method(HttpMethod::Delete).path(path)
    }

    /// Without a path the route matches every path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self.regex = false;
        self
    }

    pub fn path_regex(mut self, pattern: impl Into<String>) -> Self {
        self.path = Some(pattern.into());
        self.regex = true;
        self
    }

    pub fn handler<F, Fut, O>(mut self, f: F) -> Self
    where
        F: Fn(RoutingContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
        O: IntoHandlerOutcome,
    {
        self.handler = Some(InvocableHandler::from_fn("", f));
        self
    }

    pub fn invocable(mut self, handler: InvocableHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn auth(mut self, identity: impl Into<String>) -> Self {
        self.auth = Some(identity.into());
        self
    }

    pub fn default_auth(self) -> Self {
        self.auth(DEFAULT_AUTH_HANDLER_KEY)
    }

    /// Registers the handler as a failure handler instead of a route.
    pub fn failure(mut self) -> Self {
        self.failure = true;
        self
    }

    fn label(&self) -> String {
        let methods = if self.methods.is_empty() {
            HttpMethod::Any.as_str().to_string()
        } else {
            self.methods
                .iter()
                .map(HttpMethod::as_str)
                .collect::<Vec<_>>()
                .join("|")
        };
        format!("route({methods} {})", self.path.as_deref().unwrap_or("*"))
    }

    fn register(
        self,
        router: &mut WebRouter,
        auth_handlers: &HashMap<String, AuthFactory>,
    ) -> Result<(), BuildError> {
        let label = self.label();
        let path = self.path.clone().unwrap_or_else(|| "/*".to_string());
        let handler = match self.handler {
            Some(h) if h.name().is_empty() => h.with_name(label.clone()),
            Some(h) => h,
            None => return Err(BuildError::IncompleteRoute { path }),
        };
        let matcher = if self.regex {
            PathMatcher::regex(&path).map_err(|source| BuildError::InvalidPattern {
                controller: "route",
                method: "custom",
                pattern: path.clone(),
                source,
            })?
        } else {
            PathMatcher::literal(&path)
        };
        tracing::debug!("{label}");
        if self.failure {
            router.register_failure_handler(matcher, handler);
            return Ok(());
        }
        let auth = auth_for(auth_handlers, self.auth.as_deref(), || label.clone())?;
        let methods = if self.methods.is_empty() {
            vec![HttpMethod::Any]
        } else {
            self.methods
        };
        router.register_route(methods, matcher, handler, auth);
        Ok(())
    }
}

fn auth_for(
    handlers: &HashMap<String, AuthFactory>,
    identity: Option<&str>,
    route: impl FnOnce() -> String,
) -> Result<Option<Arc<dyn AuthHandler>>, BuildError> {
    let Some(identity) = identity else {
        return Ok(None);
    };
    let factory = handlers
        .get(identity)
        .ok_or_else(|| BuildError::UnknownAuthHandler {
            route: route(),
            identity: identity.to_string(),
        })?;
    Ok(Some(factory()))
}

struct RouterBuildConfig {
    name: String,
    globals: Vec<Arc<dyn GlobalHandler>>,
    controllers: Vec<ControllerRef>,
    excluded: Exclusions,
    packages: Vec<String>,
    default_role: Role,
    auth_handlers: HashMap<String, AuthFactory>,
    socket_options: SocketOptions,
    custom_routes: Vec<RouteDef>,
    instantiator: Arc<dyn Instantiator>,
    scanner: Arc<dyn ControllerScanner>,
    body_limit: Option<usize>,
}

impl Default for RouterBuildConfig {
    fn default() -> Self {
        Self {
            name: uuid::Uuid::new_v4().to_string(),
            globals: Vec::new(),
            controllers: Vec::new(),
            excluded: Exclusions::new(),
            packages: Vec::new(),
            default_role: Role::Normal,
            auth_handlers: HashMap::new(),
            socket_options: SocketOptions::default(),
            custom_routes: Vec::new(),
            instantiator: Arc::new(Instances::new()),
            scanner: Arc::new(InventoryScanner),
            body_limit: None,
        }
    }
}

enum State {
    Configuring(Box<RouterBuildConfig>),
    Built { name: String },
}

pub struct RouterBuilder {
    registry: Arc<HandlerRegistry>,
    router: Option<WebRouter>,
    state: State,
}

impl std::fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("name", &self.router_name())
            .field("built", &self.is_built())
            .finish_non_exhaustive()
    }
}

impl RouterBuilder {
    /// Builder producing a fresh [`WebRouter`].
    pub fn create(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            router: None,
            state: State::Configuring(Box::default()),
        }
    }

    /// Builder registering into an existing router.
    pub fn with_router(registry: Arc<HandlerRegistry>, router: WebRouter) -> Self {
        Self {
            router: Some(router),
            ..Self::create(registry)
        }
    }

    pub fn router_name(&self) -> &str {
        match &self.state {
            State::Configuring(cfg) => &cfg.name,
            State::Built { name, .. } => name,
        }
    }

    pub fn is_built(&self) -> bool {
        matches!(self.state, State::Built { .. })
    }

    /// # Panics
    ///
    /// When the builder was already built.
    fn configure(mut self, op: &'static str, f: impl FnOnce(&mut RouterBuildConfig)) -> Self {
        match &mut self.state {
            State::Configuring(cfg) => f(&mut **cfg),
            State::Built { name } => {
                tracing::error!(router = %name, operation = op, "router builder used after build()");
                panic!("RouterBuilder::{op} called after router '{name}' was built");
            }
        }
        self
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.configure("name", |c| c.name = name)
    }

    /// Global handler, run before every route in insertion order.
    pub fn add_handler<H: GlobalHandler>(self, handler: H) -> Self {
        self.add_shared_handler(Arc::new(handler))
    }

    pub fn add_shared_handler(self, handler: Arc<dyn GlobalHandler>) -> Self {
        self.configure("add_handler", |c| c.globals.push(handler))
    }

    pub fn add_route<T: Controller>(self) -> Self {
        self.add_route_ref(ControllerRef::of::<T>())
    }

    pub fn add_route_ref(self, controller: ControllerRef) -> Self {
        self.configure("add_route", |c| c.controllers.push(controller))
    }

    pub fn add_route_package(self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        self.configure("add_route_package", |c| {
            if !c.packages.contains(&pattern) {
                c.packages.push(pattern);
            }
        })
    }

    /// `true` replaces the package patterns with one that matches every
    /// registered controller.
    pub fn scan_classpath(self, scan: bool) -> Self {
        self.configure("scan_classpath", |c| {
            if scan {
                c.packages = vec![MATCH_ALL_PACKAGES.to_string()];
            }
        })
    }

    pub fn skip_route<T: Controller>(self) -> Self {
        self.configure("skip_route", |c| c.excluded.add::<T>())
    }

    /// Skips by qualified or short type name.
    pub fn skip_route_named(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.configure("skip_route", |c| c.excluded.add_name(name))
    }

    pub fn auth_handler<F>(self, identity: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn AuthHandler> + Send + Sync + 'static,
    {
        let identity = identity.into();
        let factory: AuthFactory = Arc::new(factory);
        self.configure("auth_handler", |c| {
            c.auth_handlers.insert(identity, factory);
        })
    }

    /// Auth handler used by `#[auth]` without an identity.
    pub fn default_auth_handler<F>(self, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn AuthHandler> + Send + Sync + 'static,
    {
        self.auth_handler(DEFAULT_AUTH_HANDLER_KEY, factory)
    }

    pub fn remove_auth_handler(self, identity: &str) -> Self {
        self.configure("remove_auth_handler", |c| {
            c.auth_handlers.remove(identity);
        })
    }

    /// Custom route, mounted after global handlers and before controller
    /// routes, in call order.
    pub fn route(self, define: impl FnOnce(RouteDef) -> RouteDef) -> Self {
        self.configure("route", |c| c.custom_routes.push(define(RouteDef::default())))
    }

    /// Role of methods that carry only verb annotations.
    pub fn default_role(self, role: Role) -> Self {
        self.configure("default_role", |c| c.default_role = role)
    }

    pub fn socket_options(self, options: SocketOptions) -> Self {
        self.configure("socket_options", |c| c.socket_options = options)
    }

    pub fn body_limit(self, bytes: usize) -> Self {
        self.configure("body_limit", |c| c.body_limit = Some(bytes))
    }

    pub fn instantiator(self, instantiator: impl Instantiator + 'static) -> Self {
        self.configure("instantiator", |c| c.instantiator = Arc::new(instantiator))
    }

    pub fn scanner(self, scanner: impl ControllerScanner + 'static) -> Self {
        self.configure("scanner", |c| c.scanner = Arc::new(scanner))
    }

    /// Applies file/env configuration on top of what was set so far.
    pub fn apply_config(self, config: &RouterConfig) -> anyhow::Result<Self> {
        let socket = config.socket_options()?;
        let mut b = self;
        if let Some(name) = &config.name {
            b = b.name(name.clone());
        }
        for pattern in &config.route_packages {
            b = b.add_route_package(pattern.clone());
        }
        if config.scan_classpath {
            b = b.scan_classpath(true);
        }
        for name in &config.skip_routes {
            b = b.skip_route_named(name.clone());
        }
        Ok(b.default_role(config.default_role)
            .body_limit(config.body_limit_bytes)
            .socket_options(socket))
    }

    pub fn build(&mut self) -> Result<WebRouter, BuildError> {
        let placeholder = State::Built {
            name: String::new(),
        };
        let config = match std::mem::replace(&mut self.state, placeholder) {
            State::Configuring(config) => *config,
            State::Built { name } => {
                tracing::error!(router = %name, "build() called on a built router");
                let err = BuildError::AlreadyBuilt { name: name.clone() };
                self.state = State::Built { name };
                return Err(err);
            }
        };
        self.state = State::Built {
            name: config.name.clone(),
        };

        let RouterBuildConfig {
            name,
            globals,
            controllers,
            excluded,
            packages,
            default_role,
            auth_handlers,
            socket_options,
            custom_routes,
            instantiator,
            scanner,
            body_limit,
        } = config;

        let mut router = self.router.take().unwrap_or_default();
        if let Some(limit) = body_limit {
            router.set_body_limit(limit);
        }
        let mut registered = RegisteredHandlers::default();
        // Bus consumers go live only once the build can no longer fail.
        let mut consumers = Vec::new();

        for handler in globals {
            tracing::debug!(router = %name, handler = handler.name(), "global handler");
            registered.add_global(handler.name());
            router.register_global(handler);
        }

        for def in custom_routes {
            def.register(&mut router, &auth_handlers)?;
        }

        let candidates = collect(&controllers, &excluded, &packages, scanner.as_ref());
        for controller in &candidates {
            let routes = resolve(controller, &excluded, default_role)?;
            if routes.is_empty() {
                continue;
            }
            let instance = instantiator.instantiate(controller).map_err(|source| {
                BuildError::Instantiate {
                    controller: controller.qualified_name(),
                    source,
                }
            })?;

            for route in routes {
                let handler = wrap(instance.clone(), &route.descriptor)?;
                let record = route.record();
                tracing::debug!(router = %name, "{}", record.to_line());
                let auth = match route.descriptor.role {
                    Role::Failure => None,
                    _ => auth_for(&auth_handlers, route.descriptor.auth.as_deref(), || {
                        format!("{}::{}", route.descriptor.owner, route.descriptor.method.name)
                    })?,
                };
                match (route.matcher, route.descriptor.role) {
                    (None, _) => consumers.push((route.path, handler)),
                    (Some(m), Role::Socket) => {
                        router.register_socket_bridge(m, socket_options.clone(), handler, auth)
                    }
                    (Some(m), Role::Failure) => router.register_failure_handler(m, handler),
                    (Some(m), _) => {
                        router.register_route(route.descriptor.http_methods, m, handler, auth)
                    }
                }
                registered.add_route(route.controller, record);
            }
        }

        let controllers = registered.controllers.len();
        let routes = registered.routes.len();
        self.registry.record(name.clone(), registered)?;
        for (address, handler) in consumers {
            router.register_consumer(address, handler);
        }
        tracing::info!(router = %name, controllers, routes, "router built");
        Ok(router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::ScanError;
    use crate::contracts::{invoker, Instance};
    use crate::transport::EventBus;
    use crate::model::{MethodAnnotations, MethodRef, MethodSpec, SubRouterDescriptor, VerbAnnotation};
    use axum::body::Body;
    use http::{Method, Request, StatusCode};

    fn get_spec(name: &'static str, path: &str, reply: &'static str) -> MethodSpec {
        MethodSpec {
            method: MethodRef {
                name,
                arity: 0,
                input: None,
                invoker: invoker(move |_i, _in| Box::pin(async move { reply.into_outcome() })),
            },
            annotations: MethodAnnotations::default()
                .with_verb(VerbAnnotation::new(HttpMethod::Get, path)),
        }
    }

    #[derive(Default)]
    struct UsersController;

    impl Controller for UsersController {
        fn sub_router() -> Option<SubRouterDescriptor> {
            Some(SubRouterDescriptor::by_convention())
        }

        fn describe_routes() -> Vec<MethodSpec> {
            vec![get_spec("list", "", "users")]
        }

        fn create() -> Option<Instance> {
            Some(Arc::new(UsersController))
        }
    }

    struct PingA;
    struct PingB;

    impl Controller for PingA {
        fn describe_routes() -> Vec<MethodSpec> {
            vec![get_spec("ping", "", "a")]
        }

        fn create() -> Option<Instance> {
            Some(Arc::new(PingA))
        }
    }

    impl Controller for PingB {
        fn describe_routes() -> Vec<MethodSpec> {
            vec![get_spec("ping", "", "b")]
        }

        fn create() -> Option<Instance> {
            Some(Arc::new(PingB))
        }
    }

    struct FixedScanner;

    impl ControllerScanner for FixedScanner {
        fn find(&self, _pattern: &str) -> Result<Vec<ControllerRef>, ScanError> {
            Ok(vec![ControllerRef::of::<PingB>(), ControllerRef::of::<UsersController>()])
        }
    }

    async fn call(router: &WebRouter, path: &str) -> (StatusCode, String) {
        let req = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let resp = router.dispatch(req).await;
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn builds_and_records_under_name() {
        let registry = Arc::new(HandlerRegistry::new());
        let mut b = RouterBuilder::create(registry.clone())
            .name("api")
            .add_route::<UsersController>();
        let router = b.build().unwrap();

        assert_eq!(call(&router, "/users/list").await, (StatusCode::OK, "users".into()));
        assert!(registry.contains("api", "UsersController"));
        assert_eq!(registry.get("api").unwrap().routes[0].path, "/users/list");
    }

    #[tokio::test]
    async fn first_discovered_controller_wins_duplicate_route() {
        let mut b = RouterBuilder::create(Arc::new(HandlerRegistry::new()))
            .add_route::<PingA>()
            .add_route::<PingB>();
        let router = b.build().unwrap();
        assert_eq!(call(&router, "/ping").await.1, "a");
        assert_eq!(router.routes().len(), 2);
    }

    #[test]
    fn second_build_fails() {
        let mut b = RouterBuilder::create(Arc::new(HandlerRegistry::new())).name("once");
        assert!(b.build().is_ok());
        match b.build() {
            Err(BuildError::AlreadyBuilt { name }) => assert_eq!(name, "once"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "RouterBuilder::name called after router 'once' was built")]
    fn setter_after_build_panics() {
        let mut b = RouterBuilder::create(Arc::new(HandlerRegistry::new())).name("once");
        b.build().unwrap();
        let _ = b.name("changed").add_route::<PingA>();
    }

    #[test]
    fn default_name_is_a_uuid() {
        let b = RouterBuilder::create(Arc::new(HandlerRegistry::new()));
        assert!(uuid::Uuid::parse_str(b.router_name()).is_ok());
    }

    #[tokio::test]
    async fn skip_route_beats_scanning() {
        let registry = Arc::new(HandlerRegistry::new());
        let mut b = RouterBuilder::create(registry.clone())
            .name("scan")
            .scanner(FixedScanner)
            .scan_classpath(true)
            .skip_route::<UsersController>();
        let router = b.build().unwrap();

        assert_eq!(call(&router, "/users/list").await.0, StatusCode::NOT_FOUND);
        assert_eq!(call(&router, "/ping").await.1, "b");
        assert_eq!(registry.handlers_of("scan").len(), 1);
    }

    #[tokio::test]
    async fn custom_routes_come_before_controller_routes() {
        let mut b = RouterBuilder::create(Arc::new(HandlerRegistry::new()))
            .add_route::<PingA>()
            .route(|r| r.get("/ping").handler(|_ctx| async { "custom" }));
        let router = b.build().unwrap();
        assert_eq!(call(&router, "/ping").await.1, "custom");
        assert_eq!(router.routes()[0].handler, "route(GET /ping)");
    }

    #[test]
    fn unknown_auth_identity_is_fatal() {
        let mut b = RouterBuilder::create(Arc::new(HandlerRegistry::new()))
            .route(|r| r.get("/secret").handler(|_ctx| async { "s" }).auth("jwt"));
        assert!(matches!(
            b.build(),
            Err(BuildError::UnknownAuthHandler { identity, .. }) if identity == "jwt"
        ));
    }

    #[test]
    fn route_without_handler_is_rejected() {
        let mut b = RouterBuilder::create(Arc::new(HandlerRegistry::new()))
            .route(|r| r.get("/nothing"));
        assert!(matches!(b.build(), Err(BuildError::IncompleteRoute { .. })));
    }

    #[test]
    fn duplicate_router_name_is_fatal() {
        let registry = Arc::new(HandlerRegistry::new());
        RouterBuilder::create(registry.clone())
            .name("dup")
            .build()
            .unwrap();
        let err = RouterBuilder::create(registry).name("dup").build().unwrap_err();
        assert!(matches!(err, BuildError::Registry(_)));
    }

    struct AuditConsumer;

    impl Controller for AuditConsumer {
        fn describe_routes() -> Vec<MethodSpec> {
            vec![MethodSpec {
                method: MethodRef {
                    name: "record",
                    arity: 0,
                    input: None,
                    invoker: invoker(|_i, _in| Box::pin(async { ().into_outcome() })),
                },
                annotations: MethodAnnotations::default().with_consumer("audit.record"),
            }]
        }

        fn create() -> Option<Instance> {
            Some(Arc::new(AuditConsumer))
        }
    }

    #[test]
    fn failed_build_leaves_shared_bus_untouched() {
        let registry = Arc::new(HandlerRegistry::new());
        let bus = EventBus::new();
        let build = |registry: &Arc<HandlerRegistry>| {
            RouterBuilder::with_router(registry.clone(), WebRouter::with_event_bus(bus.clone()))
                .name("dup")
                .add_route::<AuditConsumer>()
                .build()
        };

        build(&registry).unwrap();
        assert_eq!(bus.consumer_count("audit.record"), 1);

        assert!(matches!(build(&registry), Err(BuildError::Registry(_))));
        assert_eq!(bus.consumer_count("audit.record"), 1);
    }

    #[test]
    fn missing_instance_is_fatal() {
        struct Orphan;
        impl Controller for Orphan {
            fn describe_routes() -> Vec<MethodSpec> {
                vec![get_spec("x", "", "x")]
            }
        }
        let mut b = RouterBuilder::create(Arc::new(HandlerRegistry::new())).add_route::<Orphan>();
        assert!(matches!(b.build(), Err(BuildError::Instantiate { .. })));
    }

    #[test]
    fn apply_config_sets_packages_skips_and_name() {
        let cfg = RouterConfig {
            name: Some("from-config".into()),
            route_packages: vec!["app::web".into()],
            skip_routes: vec!["UsersController".into()],
            ..RouterConfig::default()
        };
        let b = RouterBuilder::create(Arc::new(HandlerRegistry::new()))
            .apply_config(&cfg)
            .unwrap();
        assert_eq!(b.router_name(), "from-config");
    }
}
