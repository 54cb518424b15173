use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::response::{IntoResponse, Response};
use http::{Method, Request, StatusCode};
use routekit::{
    async_trait, controller, AuthHandler, BuildError, EventMessage, Flow, GlobalHandler,
    HandlerError, HandlerRegistry, Instances, RouterBuilder, RoutingContext,
};
use tower::ServiceExt;

#[derive(Default)]
pub struct UsersController;

#[controller(sub_router)]
impl UsersController {
    #[get]
    async fn list(&self) -> &'static str {
        "alice,bob"
    }

    #[handler]
    #[blocking]
    fn report(&self) -> &'static str {
        "report"
    }

    #[get("/secret")]
    #[auth]
    async fn secret(&self, ctx: RoutingContext) -> String {
        format!("hello {}", ctx.user().unwrap_or("nobody"))
    }

    #[get(":id")]
    async fn find(&self, ctx: RoutingContext) -> Result<String, HandlerError> {
        match ctx.param("id") {
            Some("0") => Err(HandlerError::not_found("no user 0")),
            Some(id) => Ok(format!("user {id}")),
            None => Err(HandlerError::bad_request("missing id")),
        }
    }

    #[post("/files/(\\d+)", regex = true)]
    fn upload(&self, ctx: RoutingContext) -> String {
        format!("file {}", ctx.param("param0").unwrap_or_default())
    }

    #[failure]
    fn on_failure(&self, ctx: RoutingContext) -> Response {
        let status = ctx.status_code().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, format!("users failed with {}", status.as_u16())).into_response()
    }
}

#[derive(Default)]
pub struct FirstPing;

#[controller(scan = false)]
impl FirstPing {
    #[get("/ping")]
    async fn ping(&self) -> &'static str {
        "first"
    }
}

#[derive(Default)]
pub struct SecondPing;

#[controller(scan = false)]
impl SecondPing {
    #[get("/ping")]
    async fn ping(&self) -> &'static str {
        "second"
    }
}

pub struct AuditController {
    seen: AtomicUsize,
}

#[controller(provided, scan = false)]
impl AuditController {
    #[consumer("audit.record")]
    async fn record(&self, msg: EventMessage) {
        let n = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        msg.reply(serde_json::json!({ "seen": n, "echo": msg.body() }));
    }
}

pub mod scanned {
    use super::*;

    #[derive(Default)]
    pub struct HealthController;

    #[controller]
    impl HealthController {
        #[get("/health")]
        async fn health(&self) -> &'static str {
            "ok"
        }
    }

    #[derive(Default)]
    pub struct DebugController;

    #[controller]
    impl DebugController {
        #[get("/debug")]
        async fn debug(&self) -> &'static str {
            "debug"
        }
    }
}

struct BearerAuth;

#[async_trait]
impl AuthHandler for BearerAuth {
    async fn authenticate(&self, ctx: &mut RoutingContext) -> Result<(), HandlerError> {
        match ctx.header("authorization") {
            Some("Bearer alice") => {
                ctx.set_user("alice");
                Ok(())
            }
            _ => Err(HandlerError::unauthorized("missing bearer token")),
        }
    }
}

#[derive(Default)]
struct CallLog(Mutex<Vec<&'static str>>);

impl CallLog {
    fn push(&self, tag: &'static str) {
        self.0.lock().unwrap().push(tag);
    }

    fn snapshot(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }
}

struct Tagger {
    log: Arc<CallLog>,
    tag: &'static str,
}

#[async_trait]
impl GlobalHandler for Tagger {
    async fn handle(&self, ctx: &mut RoutingContext) -> Result<Flow, HandlerError> {
        self.log.push(self.tag);
        if ctx.path() == "/blocked" {
            return Ok(Flow::Respond(
                (StatusCode::FORBIDDEN, "blocked").into_response(),
            ));
        }
        Ok(Flow::Next)
    }

    fn name(&self) -> &'static str {
        self.tag
    }
}

async fn call(app: &axum::Router, method: Method, uri: &str) -> (StatusCode, String) {
    call_with(app, Request::builder().method(method).uri(uri)).await
}

async fn call_with(app: &axum::Router, req: http::request::Builder) -> (StatusCode, String) {
    let resp = app
        .clone()
        .oneshot(req.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

fn users_router() -> (Arc<HandlerRegistry>, axum::Router) {
    let registry = Arc::new(HandlerRegistry::new());
    let router = RouterBuilder::create(registry.clone())
        .name("users")
        .add_route::<UsersController>()
        .default_auth_handler(|| Arc::new(BearerAuth))
        .build()
        .unwrap();
    (registry, router.into_axum())
}

#[tokio::test]
async fn users_controller_is_served_under_its_prefix() {
    let (registry, app) = users_router();

    assert_eq!(
        call(&app, Method::GET, "/users/list").await,
        (StatusCode::OK, "alice,bob".to_string())
    );
    assert_eq!(
        call(&app, Method::GET, "/users/42").await,
        (StatusCode::OK, "user 42".to_string())
    );
    assert_eq!(
        call(&app, Method::POST, "/files/7").await,
        (StatusCode::OK, "file 7".to_string())
    );

    assert!(registry.contains("users", "UsersController"));
    let lines: Vec<String> = registry
        .get("users")
        .unwrap()
        .routes
        .iter()
        .map(|r| r.to_line())
        .collect();
    assert!(lines.contains(&"[normal] GET /users/list -> UsersController::list".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_handler_without_verb_matches_any_method() {
    let (registry, app) = users_router();
    for method in [Method::GET, Method::POST, Method::DELETE] {
        assert_eq!(
            call(&app, method, "/users/report").await,
            (StatusCode::OK, "report".to_string())
        );
    }
    let report_routes = registry
        .get("users")
        .unwrap()
        .routes
        .iter()
        .filter(|r| r.method == "report")
        .count();
    assert_eq!(report_routes, 1);
}

#[tokio::test]
async fn failures_reach_the_controller_failure_handler() {
    let (_, app) = users_router();
    let (status, body) = call(&app, Method::GET, "/users/0").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "users failed with 404");
}

#[tokio::test]
async fn protected_route_requires_credentials() {
    let (_, app) = users_router();
    let (status, _) = call(&app, Method::GET, "/users/secret").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call_with(
        &app,
        Request::builder()
            .uri("/users/secret")
            .header("authorization", "Bearer alice"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello alice");
}

#[tokio::test]
async fn first_registered_duplicate_wins() {
    let router = RouterBuilder::create(Arc::new(HandlerRegistry::new()))
        .add_route::<FirstPing>()
        .add_route::<SecondPing>()
        .build()
        .unwrap();
    assert_eq!(router.routes().len(), 2);
    let app = router.into_axum();
    assert_eq!(
        call(&app, Method::GET, "/ping").await,
        (StatusCode::OK, "first".to_string())
    );
}

#[test]
fn building_twice_is_refused() {
    let mut builder = RouterBuilder::create(Arc::new(HandlerRegistry::new())).add_route::<FirstPing>();
    assert!(builder.build().is_ok());
    assert!(builder.is_built());
    match builder.build() {
        Err(BuildError::AlreadyBuilt { .. }) => {}
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }
}

#[test]
fn package_scan_honors_skip_routes() {
    let registry = Arc::new(HandlerRegistry::new());
    let router = RouterBuilder::create(registry.clone())
        .name("scan")
        .add_route_package("builder_tests::scanned")
        .skip_route::<scanned::DebugController>()
        .build()
        .unwrap();

    let paths: Vec<String> = router.routes().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["/health".to_string()]);
    assert!(registry.contains("scan", "HealthController"));
    assert!(!registry.contains("scan", "DebugController"));
}

#[tokio::test]
async fn global_handlers_run_in_order_and_can_answer() {
    let log = Arc::new(CallLog::default());
    let router = RouterBuilder::create(Arc::new(HandlerRegistry::new()))
        .add_handler(Tagger {
            log: log.clone(),
            tag: "first",
        })
        .add_handler(Tagger {
            log: log.clone(),
            tag: "second",
        })
        .add_route::<FirstPing>()
        .build()
        .unwrap();
    let app = router.into_axum();

    assert_eq!(call(&app, Method::GET, "/ping").await.0, StatusCode::OK);
    assert_eq!(log.snapshot(), vec!["first", "second"]);

    assert_eq!(call(&app, Method::GET, "/blocked").await.0, StatusCode::FORBIDDEN);
    assert_eq!(log.snapshot(), vec!["first", "second", "first"]);
}

#[tokio::test]
async fn consumers_receive_event_bus_requests() {
    let audit = Arc::new(AuditController {
        seen: AtomicUsize::new(0),
    });
    let router = RouterBuilder::create(Arc::new(HandlerRegistry::new()))
        .instantiator(Instances::new().provide(audit.clone()))
        .add_route::<AuditController>()
        .build()
        .unwrap();

    let bus = router.event_bus();
    let reply = bus
        .request("audit.record", "login", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(reply, serde_json::json!({ "seen": 1, "echo": "login" }));
    assert_eq!(audit.seen.load(Ordering::SeqCst), 1);
}

#[test]
fn provided_controller_without_instance_fails_the_build() {
    let err = RouterBuilder::create(Arc::new(HandlerRegistry::new()))
        .add_route::<AuditController>()
        .build()
        .unwrap_err();
    assert!(matches!(err, BuildError::Instantiate { .. }));
}
