use crate::config::GRADING_SETTINGS_KEY;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::load_grading_settings(conn) {
        Ok(s) => ok(&req.id, json!({ "grading": s.to_json() })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .unwrap_or("grading");
    if section != "grading" {
        return err(&req.id, "bad_params", "unknown section", None);
    }
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match db::load_grading_settings(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = current.merge_patch(patch) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, GRADING_SETTINGS_KEY, &current.to_json()) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(
        resubmission_policy = current.resubmission_policy.as_str(),
        xp_per_level = current.xp_per_level,
        "grading settings updated"
    );
    ok(&req.id, json!({ "grading": current.to_json() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
