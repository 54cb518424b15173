//! Router name → handlers registered by that router's build.
//!
//! Owned by the application (usually behind an `Arc`) and passed into every
//! [`RouterBuilder`](crate::RouterBuilder). Entries are written once per build
//! and are only read afterwards, for diagnostics.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::model::{HttpMethod, Role};

/// One route line as it was registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub controller: &'static str,
    pub method: &'static str,
    pub http_methods: Vec<HttpMethod>,
    pub path: String,
    pub role: Role,
}

impl RouteRecord {
    /// Single-line summary used in logs and the server's route listing.
    pub fn to_line(&self) -> String {
        let verbs = self
            .http_methods
            .iter()
            .map(HttpMethod::as_str)
            .collect::<Vec<_>>()
            .join("|");
        format!(
            "[{}] {} {} -> {}::{}",
            self.role, verbs, self.path, self.controller, self.method
        )
    }
}

/// Everything one build registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisteredHandlers {
    /// Type names of global handlers, in registration order.
    pub globals: Vec<&'static str>,
    /// Qualified names of controllers, in discovery order, without duplicates.
    pub controllers: Vec<&'static str>,
    pub routes: Vec<RouteRecord>,
}

impl RegisteredHandlers {
    pub fn add_global(&mut self, name: &'static str) {
        self.globals.push(name);
    }

    pub fn add_route(&mut self, controller_qualified: &'static str, record: RouteRecord) {
        if !self.controllers.contains(&controller_qualified) {
            self.controllers.push(controller_qualified);
        }
        self.routes.push(record);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.controllers.iter().any(|c| *c == name || short(c) == name)
            || self.globals.iter().any(|g| *g == name || short(g) == name)
    }
}

fn short(qualified: &str) -> &str {
    qualified.rsplit("::").next().unwrap_or(qualified)
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a router named '{0}' is already registered")]
    DuplicateName(String),
}

#[derive(Debug, Default)]
pub struct HandlerRegistry {
    routers: DashMap<String, RegisteredHandlers>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a build. The insert is atomic per name: of two concurrent
    /// builds using the same name exactly one succeeds.
    pub fn record(
        &self,
        name: impl Into<String>,
        handlers: RegisteredHandlers,
    ) -> Result<(), RegistryError> {
        match self.routers.entry(name.into()) {
            Entry::Occupied(e) => Err(RegistryError::DuplicateName(e.key().clone())),
            Entry::Vacant(v) => {
                v.insert(handlers);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<RegisteredHandlers> {
        self.routers.get(name).map(|e| e.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Whether router `name` registered the handler type `handler`
    /// (qualified or short name).
    pub fn contains(&self, name: &str, handler: &str) -> bool {
        self.routers
            .get(name)
            .map(|e| e.value().contains(handler))
            .unwrap_or(false)
    }

    /// Qualified controller names registered under `name`.
    pub fn handlers_of(&self, name: &str) -> Vec<&'static str> {
        self.routers
            .get(name)
            .map(|e| e.value().controllers.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.routers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(controller: &'static str, path: &str) -> RouteRecord {
        RouteRecord {
            controller,
            method: "list",
            http_methods: vec![HttpMethod::Get],
            path: path.to_string(),
            role: Role::Normal,
        }
    }

    #[test]
    fn records_and_queries_by_short_or_qualified_name() {
        let reg = HandlerRegistry::new();
        let mut h = RegisteredHandlers::default();
        h.add_global("app::web::RequestLogger");
        h.add_route("app::web::UsersController", record("UsersController", "/users/list"));
        h.add_route("app::web::UsersController", record("UsersController", "/users/find"));
        reg.record("main", h).unwrap();

        assert!(reg.contains("main", "UsersController"));
        assert!(reg.contains("main", "app::web::UsersController"));
        assert!(reg.contains("main", "RequestLogger"));
        assert!(!reg.contains("main", "OrdersController"));
        assert!(!reg.contains("other", "UsersController"));
        assert_eq!(reg.handlers_of("main"), vec!["app::web::UsersController"]);
        assert_eq!(reg.get("main").unwrap().routes.len(), 2);
    }

    #[test]
    fn duplicate_router_name_is_rejected() {
        let reg = HandlerRegistry::new();
        reg.record("api", RegisteredHandlers::default()).unwrap();
        let err = reg.record("api", RegisteredHandlers::default()).unwrap_err();
        match err {
            RegistryError::DuplicateName(name) => assert_eq!(name, "api"),
        }
    }

    #[test]
    fn concurrent_records_keep_one_winner_per_name() {
        let reg = Arc::new(HandlerRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    let shared = reg.record("shared", RegisteredHandlers::default()).is_ok();
                    reg.record(format!("own-{i}"), RegisteredHandlers::default())
                        .unwrap();
                    shared
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(reg.len(), 9);
    }

    #[test]
    fn route_line_is_readable() {
        let line = record("UsersController", "/users/list").to_line();
        assert_eq!(line, "[normal] GET /users/list -> UsersController::list");
    }
}
