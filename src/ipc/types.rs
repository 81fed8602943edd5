use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request line: `{"id": "...", "method": "...", "params": {...}}`.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Daemon state. Everything except `health` and `workspace.select` needs an
/// open workspace database.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
        }
    }
}
