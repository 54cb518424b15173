// Verb routes under a conventional prefix
use routekit::{controller, Controller, HandlerError, RoutingContext};

#[derive(Default)]
pub struct UsersController;

#[controller(sub_router)]
impl UsersController {
    #[get]
    async fn list(&self) -> &'static str {
        "[]"
    }

    #[get(":id")]
    #[auth]
    async fn find(&self, ctx: RoutingContext) -> Result<String, HandlerError> {
        Ok(format!("user {}", ctx.param("id").unwrap_or_default()))
    }

    #[post("/files/(\\d+)", regex = true)]
    fn upload(&self) -> &'static str {
        "stored"
    }

    fn helper(&self) -> usize {
        1
    }
}

fn main() {
    assert_eq!(UsersController::describe_routes().len(), 3);
    assert!(UsersController::sub_router().is_some());
    assert_eq!(UsersController.helper(), 1);
}
