use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, load_snapshot, optional_str, report_warnings};
use crate::ipc::types::{AppState, Request};
use crate::model::{Snapshot, SnapshotWarning, Student, Submission};
use serde_json::json;

/// Every warning a report over `snap` carries: rows repaired while loading
/// plus submissions skipped for pointing at an unknown activity.
fn collect_warnings(req: &Request, snap: &Snapshot, submissions: &[Submission]) -> Vec<SnapshotWarning> {
    let mut warnings = snap.warnings.clone();
    warnings.extend(calc::reference_warnings(submissions, &snap.activities));
    report_warnings(req, &warnings);
    warnings
}

/// Optional class scope. `None` means the whole school.
fn class_scope(
    req: &Request,
    snap: &Snapshot,
) -> Result<(Option<String>, Vec<Student>, Vec<Submission>), serde_json::Value> {
    let class_id = optional_str(req, "classId")?;
    match class_id {
        None => Ok((None, snap.students.clone(), snap.submissions.clone())),
        Some(id) => {
            if !snap.classes.iter().any(|c| c.id == id) {
                return Err(err(
                    &req.id,
                    "not_found",
                    "class not found",
                    Some(json!({ "id": id })),
                ));
            }
            let (students, submissions) = snap.scoped_to_class(&id);
            Ok((Some(id), students, submissions))
        }
    }
}

fn handle_reports_dashboard(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (class_id, students, submissions) = match class_scope(req, &snap) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let warnings = collect_warnings(req, &snap, &submissions);

    let stats = calc::compute_stats(&students, &submissions, &snap.activities);
    ok(
        &req.id,
        json!({
            "classId": class_id,
            "stats": stats,
            "warnings": warnings,
        }),
    )
}

fn handle_reports_grade_distribution(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let activity_id = match optional_str(req, "activityId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (class_id, _, submissions) = match class_scope(req, &snap) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(a) = activity_id.as_deref() {
        if snap.activity(a).is_none() {
            return err(
                &req.id,
                "not_found",
                "activity not found",
                Some(json!({ "id": a })),
            );
        }
    }
    let warnings = collect_warnings(req, &snap, &submissions);

    let (known, _) = calc::known_submissions(&submissions, &snap.activities);
    let scoped: Vec<Submission> = known
        .into_iter()
        .filter(|s| activity_id.as_deref().map_or(true, |a| s.activity_id == a))
        .cloned()
        .collect();
    let counts = calc::grade_distribution(&scoped);
    let total: u32 = counts.iter().sum();
    ok(
        &req.id,
        json!({
            "classId": class_id,
            "activityId": activity_id,
            "buckets": calc::labeled_distribution(counts),
            "total": total,
            "warnings": warnings,
        }),
    )
}

fn handle_reports_classes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let warnings = collect_warnings(req, &snap, &snap.submissions);

    let rows = calc::per_class_stats(
        &snap.classes,
        &snap.students,
        &snap.submissions,
        &snap.activities,
    );
    ok(&req.id, json!({ "classes": rows, "warnings": warnings }))
}

fn handle_reports_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (class_id, students, submissions) = match class_scope(req, &snap) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let warnings = collect_warnings(req, &snap, &submissions);

    let rows = calc::per_student_stats(&students, &submissions, &snap.activities);
    ok(
        &req.id,
        json!({ "classId": class_id, "students": rows, "warnings": warnings }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.dashboard" => Some(handle_reports_dashboard(state, req)),
        "reports.gradeDistribution" => Some(handle_reports_grade_distribution(state, req)),
        "reports.classes" => Some(handle_reports_classes(state, req)),
        "reports.students" => Some(handle_reports_students(state, req)),
        _ => None,
    }
}
