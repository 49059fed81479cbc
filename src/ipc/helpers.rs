use crate::db;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::model::{Snapshot, SnapshotWarning};
use rusqlite::Connection;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Non-empty, trimmed string param.
pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Absent, null and blank all read as `None`; any other non-string is an error.
pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => Ok(Some(s.trim().to_string())),
            None => Err(err(
                &req.id,
                "bad_params",
                format!("{} must be string or null", key),
                None,
            )),
        },
    }
}

pub fn require_exists(
    conn: &Connection,
    req: &Request,
    table: &str,
    id: &str,
    what: &str,
) -> Result<(), serde_json::Value> {
    match db::exists(conn, table, id) {
        Ok(true) => Ok(()),
        Ok(false) => Err(err(
            &req.id,
            "not_found",
            format!("{} not found", what),
            Some(serde_json::json!({ "id": id })),
        )),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

pub fn load_snapshot(conn: &Connection, req: &Request) -> Result<Snapshot, serde_json::Value> {
    db::load_snapshot(conn).map_err(|e| err(&req.id, "db_query_failed", format!("{e:#}"), None))
}

/// The engines only return warnings; reporting them is the caller's job.
pub fn report_warnings(req: &Request, warnings: &[SnapshotWarning]) {
    for w in warnings {
        tracing::warn!(method = %req.method, warning = ?w, "skipped or repaired row");
    }
}
