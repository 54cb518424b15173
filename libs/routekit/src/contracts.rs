use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;
use futures::future::BoxFuture;

use crate::context::{HandlerInput, HandlerResult, RoutingContext};
use crate::error::HandlerError;
use crate::model::{MethodSpec, SubRouterDescriptor};

/// Type-erased controller instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Type-erased call of one controller method on one instance.
pub type Invoker =
    Arc<dyn Fn(Instance, HandlerInput) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Builds an [`Invoker`] from a closure.
pub fn invoker<F>(f: F) -> Invoker
where
    F: Fn(Instance, HandlerInput) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A type that declares handler methods.
///
/// Usually generated by `#[controller]`; implementing it by hand yields the
/// same static table.
pub trait Controller: Send + Sync + 'static {
    /// Type-level prefix metadata; `None` mounts every route at the root.
    fn sub_router() -> Option<SubRouterDescriptor> {
        None
    }

    /// Annotated methods in declaration order.
    fn describe_routes() -> Vec<MethodSpec>;

    /// Instance used when the instantiator has none for this type.
    fn create() -> Option<Instance> {
        None
    }
}

/// Handle on a controller type, usable where the concrete type is unknown
/// (package scanning, configuration by name).
#[derive(Clone)]
pub struct ControllerRef {
    type_id: TypeId,
    qualified_name: &'static str,
    sub_router: fn() -> Option<SubRouterDescriptor>,
    describe: fn() -> Vec<MethodSpec>,
    create: fn() -> Option<Instance>,
    ctor: Option<fn() -> Instance>,
}

impl ControllerRef {
    pub fn of<T: Controller>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            qualified_name: std::any::type_name::<T>(),
            sub_router: T::sub_router,
            describe: T::describe_routes,
            create: T::create,
            ctor: None,
        }
    }

    /// Reference whose default instance comes from `T::default()`.
    pub fn with_default<T: Controller + Default>() -> Self {
        Self::with_ctor::<T>(|| Arc::new(T::default()) as Instance)
    }

    pub fn with_ctor<T: Controller>(ctor: fn() -> Instance) -> Self {
        Self {
            ctor: Some(ctor),
            ..Self::of::<T>()
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Fully-qualified path, e.g. `my_app::controllers::UsersController`.
    pub fn qualified_name(&self) -> &'static str {
        self.qualified_name
    }

    /// Last path segment, e.g. `UsersController`.
    pub fn type_name(&self) -> &'static str {
        self.qualified_name
            .rsplit("::")
            .next()
            .unwrap_or(self.qualified_name)
    }

    pub fn sub_router(&self) -> Option<SubRouterDescriptor> {
        (self.sub_router)()
    }

    pub fn describe_routes(&self) -> Vec<MethodSpec> {
        (self.describe)()
    }

    pub fn default_instance(&self) -> Option<Instance> {
        match self.ctor {
            Some(ctor) => Some(ctor()),
            None => (self.create)(),
        }
    }
}

impl PartialEq for ControllerRef {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ControllerRef {}

impl fmt::Debug for ControllerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerRef")
            .field("name", &self.qualified_name)
            .field("has_ctor", &self.ctor.is_some())
            .finish()
    }
}

/// Supplies controller instances to the builder.
pub trait Instantiator: Send + Sync {
    fn instantiate(&self, controller: &ControllerRef) -> anyhow::Result<Instance>;
}

impl<F> Instantiator for F
where
    F: Fn(&ControllerRef) -> anyhow::Result<Instance> + Send + Sync,
{
    fn instantiate(&self, controller: &ControllerRef) -> anyhow::Result<Instance> {
        self(controller)
    }
}

/// Default instantiator: explicitly provided instances first, then the
/// constructor recorded on the [`ControllerRef`].
#[derive(Clone, Default)]
pub struct Instances {
    provided: HashMap<TypeId, Instance>,
}

impl Instances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide<T: Controller>(mut self, instance: Arc<T>) -> Self {
        self.provided.insert(TypeId::of::<T>(), instance as Instance);
        self
    }
}

impl Instantiator for Instances {
    fn instantiate(&self, controller: &ControllerRef) -> anyhow::Result<Instance> {
        if let Some(inst) = self.provided.get(&controller.type_id()) {
            return Ok(inst.clone());
        }
        controller.default_instance().ok_or_else(|| {
            anyhow::anyhow!(
                "no instance provided and no constructor registered for '{}'",
                controller.qualified_name()
            )
        })
    }
}

/// Outcome of a global handler.
#[derive(Debug)]
pub enum Flow {
    /// Continue with the next global handler, then the route table.
    Next,
    /// Answer right away; nothing else runs.
    Respond(Response),
}

/// Handler installed ahead of every route.
#[async_trait]
pub trait GlobalHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: &mut RoutingContext) -> Result<Flow, HandlerError>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Authenticates a request before the protected route runs.
#[async_trait]
pub trait AuthHandler: Send + Sync + 'static {
    /// On success the handler typically calls [`RoutingContext::set_user`].
    async fn authenticate(&self, ctx: &mut RoutingContext) -> Result<(), HandlerError>;
}

/// Produces a fresh auth handler for each protected route.
pub type AuthFactory = Arc<dyn Fn() -> Arc<dyn AuthHandler> + Send + Sync>;
