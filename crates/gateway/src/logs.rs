//! Debug-log sink and retrieval routes.
//!
//! `client_log` frames and per-request captures are written as individual
//! files in a flat debug directory. Writes are best-effort: a sink failure
//! is logged and never propagates into the request path. The retrieval
//! endpoints report failures in-band (`{"status": "error", ...}`) instead
//! of surfacing 5xx.

use std::path::{Path, PathBuf};

use {
    axum::{Json, extract::State, response::IntoResponse},
    serde_json::{Value, json},
    tracing::{debug, error},
};

use {
    switchboard_common::time::{file_stamp_now, rfc3339_now},
    switchboard_protocol::ClientLogFrame,
};

use crate::server::AppState;

// ── Store ────────────────────────────────────────────────────────────────────

/// File-backed sink for client logs and request/response captures.
#[derive(Debug, Clone)]
pub struct DebugLogStore {
    dir: PathBuf,
}

impl DebugLogStore {
    /// Create the store, ensuring the directory exists.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one JSON document. Best-effort; failures are logged.
    pub fn save(&self, filename: &str, value: &Value) {
        let path = self.dir.join(filename);
        let pretty = match serde_json::to_string_pretty(value) {
            Ok(s) => s,
            Err(e) => {
                error!(filename, error = %e, "failed to serialize debug file");
                return;
            },
        };
        if let Err(e) = std::fs::write(&path, pretty) {
            error!(path = %path.display(), error = %e, "failed to save debug file");
        } else {
            debug!(path = %path.display(), "debug file saved");
        }
    }

    /// Persist one `client_log` frame.
    pub fn save_client_log(&self, client_id: &str, frame: &ClientLogFrame) {
        let entry = json!({
            "timestamp": rfc3339_now(),
            "client_id": client_id,
            "level": frame.level,
            "category": frame.category,
            "message": frame.message,
            "data": frame.data,
        });
        self.save(&format!("{client_id}_{}.log", file_stamp_now()), &entry);
    }

    /// Capture one stage of a forwarded request (`request`, `forward`,
    /// `response`).
    pub fn capture(&self, request_id: &str, stage: &str, value: &Value) {
        self.save(&format!("{request_id}_{stage}.json"), value);
    }

    /// Names of all stored `.log` files.
    pub fn list(&self) -> std::io::Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".log") {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Contents of one stored log file. Rejects anything that is not a plain
    /// `.log` filename inside the debug directory.
    pub fn read(&self, filename: &str) -> Option<String> {
        if !is_safe_log_name(filename) {
            return None;
        }
        std::fs::read_to_string(self.dir.join(filename)).ok()
    }

    /// Delete every stored `.log` file. Returns how many were removed.
    pub fn clear(&self) -> std::io::Result<usize> {
        let mut removed = 0;
        for name in self.list()? {
            std::fs::remove_file(self.dir.join(&name))?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// A bare `.log` filename: no separators, no traversal.
fn is_safe_log_name(name: &str) -> bool {
    name.ends_with(".log")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
}

// ── Routes ───────────────────────────────────────────────────────────────────

pub async fn list_logs_handler(State(app): State<AppState>) -> impl IntoResponse {
    let Some(store) = &app.gateway.debug_logs else {
        return Json(json!({"status": "success", "count": 0, "files": []}));
    };
    match store.list() {
        Ok(files) => Json(json!({
            "status": "success",
            "count": files.len(),
            "files": files,
        })),
        Err(e) => Json(json!({"status": "error", "message": e.to_string()})),
    }
}

pub async fn read_log_handler(
    State(app): State<AppState>,
    axum::extract::Path(filename): axum::extract::Path<String>,
) -> impl IntoResponse {
    let Some(store) = &app.gateway.debug_logs else {
        return Json(json!({"status": "error", "message": "debug logs disabled"}));
    };
    match store.read(&filename) {
        Some(content) => Json(json!({
            "status": "success",
            "filename": filename,
            "content": content,
        })),
        None => Json(json!({"status": "error", "message": "File not found"})),
    }
}

pub async fn clear_logs_handler(State(app): State<AppState>) -> impl IntoResponse {
    let Some(store) = &app.gateway.debug_logs else {
        return Json(json!({"status": "success", "message": "Logs cleared"}));
    };
    match store.clear() {
        Ok(_) => Json(json!({"status": "success", "message": "Logs cleared"})),
        Err(e) => Json(json!({"status": "error", "message": e.to_string()})),
    }
}
