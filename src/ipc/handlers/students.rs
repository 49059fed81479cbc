use crate::calc;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, load_snapshot, optional_str, report_warnings, require_exists, required_str,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match optional_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let students = match db::load_students(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students: Vec<_> = students
        .into_iter()
        .filter(|s| class_id.as_deref().map_or(true, |c| s.class_id == c))
        .collect();
    ok(&req.id, json!({ "students": students }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match optional_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_exists(conn, req, "classes", &class_id, "class") {
        return e;
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, class_id, name, email, created_at) VALUES(?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &name,
            &email,
            chrono::Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    tracing::info!(student_id = %student_id, class_id = %class_id, "student enrolled");
    ok(
        &req.id,
        json!({ "studentId": student_id, "classId": class_id, "name": name }),
    )
}

/// A student belongs to exactly one class; moving replaces the membership.
fn handle_students_move(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_exists(conn, req, "students", &student_id, "student") {
        return e;
    }
    if let Err(e) = require_exists(conn, req, "classes", &class_id, "class") {
        return e;
    }

    if let Err(e) = conn.execute(
        "UPDATE students SET class_id = ? WHERE id = ?",
        (&class_id, &student_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "studentId": student_id, "classId": class_id }),
    )
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_exists(conn, req, "students", &student_id, "student") {
        return e;
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("DELETE FROM submissions WHERE student_id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "submissions" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }
    tracing::info!(student_id = %student_id, "student deleted");
    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_activities(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if snap.student(&student_id).is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }
    report_warnings(req, &snap.warnings);

    let rows = calc::assigned_activities(&student_id, &snap.activities, &snap.submissions);
    ok(&req.id, json!({ "studentId": student_id, "activities": rows }))
}

fn handle_students_portfolio(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if snap.student(&student_id).is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }
    report_warnings(req, &snap.warnings);
    report_warnings(
        req,
        &calc::reference_warnings(&snap.submissions, &snap.activities),
    );

    let entries = calc::portfolio(&student_id, &snap.submissions, &snap.activities);
    ok(&req.id, json!({ "studentId": student_id, "entries": entries }))
}

fn handle_students_progress(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match db::load_grading_settings(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if snap.student(&student_id).is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let progress = calc::student_progress(
        &student_id,
        &snap.submissions,
        &snap.activities,
        settings.xp_per_level,
    );
    ok(&req.id, json!(progress))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.move" => Some(handle_students_move(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.activities" => Some(handle_students_activities(state, req)),
        "students.portfolio" => Some(handle_students_portfolio(state, req)),
        "students.progress" => Some(handle_students_progress(state, req)),
        _ => None,
    }
}
