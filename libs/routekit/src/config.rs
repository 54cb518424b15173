use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::Role;
use crate::transport::{SocketOptions, DEFAULT_BODY_LIMIT};

/// Builder settings that can come from configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    /// Router name; a random UUID when unset.
    pub name: Option<String>,
    /// Package patterns, e.g. `my_app::web`.
    pub route_packages: Vec<String>,
    /// Scan every registered controller.
    pub scan_classpath: bool,
    /// Controllers never mounted, by qualified or short type name.
    pub skip_routes: Vec<String>,
    pub default_role: Role,
    pub body_limit_bytes: usize,
    pub socket: SocketOptions,
    /// JSON file with socket options; takes precedence over `socket`.
    pub socket_options_file: Option<PathBuf>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            name: None,
            route_packages: Vec::new(),
            scan_classpath: false,
            skip_routes: Vec::new(),
            default_role: Role::Normal,
            body_limit_bytes: DEFAULT_BODY_LIMIT,
            socket: SocketOptions::default(),
            socket_options_file: None,
        }
    }
}

impl RouterConfig {
    pub fn socket_options(&self) -> anyhow::Result<SocketOptions> {
        match &self.socket_options_file {
            Some(path) => SocketOptions::from_json_file(path),
            None => Ok(self.socket.clone()),
        }
    }
}
