//! Controllers served by the demo binary. Discovered by package scan.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use parking_lot::RwLock;
use routekit::{
    controller, EventBus, EventMessage, HandlerError, RoutingContext, SocketFrame, SocketSession,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Event published after a user is created.
pub const USER_CREATED: &str = "users.created";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct NewUser {
    name: String,
}

pub struct UsersController {
    users: RwLock<BTreeMap<u64, User>>,
    next_id: AtomicU64,
    events: EventBus,
}

impl UsersController {
    pub fn new(events: EventBus) -> Self {
        Self {
            users: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            events,
        }
    }
}

#[controller(sub_router, provided)]
impl UsersController {
    #[get]
    async fn list(&self) -> Json<Vec<User>> {
        Json(self.users.read().values().cloned().collect())
    }

    #[post]
    #[auth]
    async fn create(&self, ctx: RoutingContext) -> Result<(StatusCode, Json<User>), HandlerError> {
        let new: NewUser = ctx.body_as_json()?;
        if new.name.trim().is_empty() {
            return Err(HandlerError::bad_request("name must not be empty"));
        }
        let user = User {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name: new.name,
        };
        self.users.write().insert(user.id, user.clone());
        if let Err(e) = self.events.publish(USER_CREATED, &user) {
            tracing::warn!(error = %e, "user.created not delivered");
        }
        Ok((StatusCode::CREATED, Json(user)))
    }

    #[get(":id")]
    async fn find(&self, ctx: RoutingContext) -> Result<Json<User>, HandlerError> {
        let id: u64 = ctx
            .param("id")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| HandlerError::bad_request("id must be a number"))?;
        self.users
            .read()
            .get(&id)
            .cloned()
            .map(Json)
            .ok_or_else(|| HandlerError::not_found(format!("user {id} not found")))
    }

    #[failure]
    fn failed(&self, ctx: RoutingContext) -> Response {
        let problem = match ctx.failure() {
            Some(err) => err.to_problem(),
            None => routekit::Problem::from_status(StatusCode::INTERNAL_SERVER_ERROR, ""),
        };
        problem.with_instance(ctx.path()).into_response()
    }
}

pub struct HealthController {
    started: Instant,
}

impl HealthController {
    fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

#[controller(ctor = HealthController::new())]
impl HealthController {
    #[get("/health")]
    async fn health(&self) -> Value {
        json!({ "status": "ok", "uptime_secs": self.started.elapsed().as_secs() })
    }

    #[get("/health/load")]
    #[blocking]
    fn load(&self) -> Result<String, HandlerError> {
        std::fs::read_to_string("/proc/loadavg")
            .map_err(|e| HandlerError::status(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
    }
}

#[derive(Default)]
pub struct ChatController;

#[controller(sub_router = "/ws")]
impl ChatController {
    /// Echoes every frame back to the peer.
    #[sockjs("echo")]
    async fn echo(&self, mut session: SocketSession) -> Result<(), HandlerError> {
        tracing::debug!(user = ?session.user(), "echo session opened");
        while let Some(frame) = session.recv().await {
            match frame? {
                SocketFrame::Text(text) => session.send_text(text).await?,
                SocketFrame::Binary(data) => session.send_binary(data).await?,
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct AuditController {
    created: AtomicU64,
}

#[controller]
impl AuditController {
    #[consumer("users.created")]
    async fn user_created(&self, msg: EventMessage) {
        let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(user = %msg.body(), total, "user created");
        msg.reply(json!({ "audited": total }));
    }
}
