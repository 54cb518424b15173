// Socket, consumer, failure and blocking handlers with an explicit constructor
use routekit::{controller, Controller, EventMessage, RoutingContext, SocketSession};

pub struct ChatController {
    greeting: String,
}

impl ChatController {
    fn new() -> Self {
        Self {
            greeting: "hello".into(),
        }
    }
}

#[controller(sub_router = "/chat", ctor = ChatController::new(), scan = false)]
impl ChatController {
    #[sockjs("room")]
    async fn room(&self, mut session: SocketSession) {
        let _ = session.send_text(self.greeting.clone()).await;
    }

    #[consumer("chat.joined")]
    async fn joined(&self, msg: EventMessage) {
        msg.reply(serde_json::json!({ "ok": true }));
    }

    #[failure]
    fn oops(&self, ctx: RoutingContext) -> String {
        format!("failed: {:?}", ctx.status_code())
    }

    #[handler]
    #[blocking]
    fn report(&self) -> String {
        self.greeting.clone()
    }
}

fn main() {
    assert_eq!(ChatController::describe_routes().len(), 4);
    assert!(ChatController::create().is_some());
}
