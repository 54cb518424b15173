use std::sync::atomic::{AtomicU64, Ordering};

use routekit::{async_trait, AuthHandler, Flow, GlobalHandler, HandlerError, RoutingContext};

/// Tags every request with a sequence number and logs it.
#[derive(Default)]
pub struct RequestLogger {
    seq: AtomicU64,
}

#[async_trait]
impl GlobalHandler for RequestLogger {
    async fn handle(&self, ctx: &mut RoutingContext) -> Result<Flow, HandlerError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(seq, method = %ctx.method(), path = ctx.path(), "request");
        ctx.put("request_seq", seq);
        Ok(Flow::Next)
    }

    fn name(&self) -> &'static str {
        "RequestLogger"
    }
}

/// Accepts `Authorization: Bearer <token>` for one static token.
pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AuthHandler for BearerAuth {
    async fn authenticate(&self, ctx: &mut RoutingContext) -> Result<(), HandlerError> {
        let verdict = match ctx
            .header("authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
        {
            Some(token) if token == self.token => Ok(()),
            Some(_) => Err(HandlerError::unauthorized("invalid token")),
            None => Err(HandlerError::unauthorized("missing bearer token")),
        };
        if verdict.is_ok() {
            ctx.set_user("api-client");
        }
        verdict
    }
}
