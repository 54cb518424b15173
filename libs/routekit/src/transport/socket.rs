use std::path::Path;

use anyhow::Context;
use axum::extract::ws::WebSocketUpgrade;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// WebSocket bridge settings applied to every `#[sockjs]` route of a router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketOptions {
    pub max_message_size: usize,
    pub max_frame_size: usize,
    pub write_buffer_size: usize,
    /// Keys this crate does not interpret, kept for the transport.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            max_message_size: 64 << 20,
            max_frame_size: 16 << 20,
            write_buffer_size: 128 << 10,
            extra: Map::new(),
        }
    }
}

impl SocketOptions {
    /// Reads options from a JSON object file. Missing keys keep defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read socket options {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid socket options in {}", path.display()))
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub(crate) fn apply(&self, ws: WebSocketUpgrade) -> WebSocketUpgrade {
        ws.max_message_size(self.max_message_size)
            .max_frame_size(self.max_frame_size)
            .write_buffer_size(self.write_buffer_size)
    }
}
