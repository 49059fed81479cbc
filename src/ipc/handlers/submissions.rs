use crate::config::ResubmissionPolicy;
use crate::db;
use crate::grading::{apply_outcome, auto_grade, manual_grade, stamp};
use crate::ipc::error::{err, grading_err, ok};
use crate::ipc::helpers::{
    db_conn, load_snapshot, optional_str, report_warnings, require_exists, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{answer_map_from_value, Activity, Comments, Submission, SubmissionStatus};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

/// Builds the comments for a new submission. Structured `answers` win over a
/// raw `comments` string; either way an activity with questions that receives
/// something other than an answer map stores it as text.
fn comments_from_params(req: &Request, activity: &Activity) -> Result<Comments, Value> {
    let raw = match optional_str(req, "comments") {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return Err(e),
    };
    match req.params.get("answers") {
        None | Some(Value::Null) => Ok(Comments::decode(&raw, Some(activity))),
        Some(_) if !activity.has_questions() => Err(err(
            &req.id,
            "bad_params",
            "activity has no questions; send comments instead of answers",
            None,
        )),
        Some(v) => Ok(match answer_map_from_value(v) {
            Ok(map) => Comments::Answers(map),
            Err(e) => {
                tracing::debug!(error = %e, "answers kept as text");
                Comments::FreeText(v.to_string())
            }
        }),
    }
}

fn insert_submission(conn: &Connection, s: &Submission) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO submissions(id, activity_id, student_id, status, grade, feedback, file_url, comments, submitted_at, graded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &s.id,
            &s.activity_id,
            &s.student_id,
            s.status.as_str(),
            s.grade,
            &s.feedback,
            &s.file_url,
            s.comments.encode(),
            &s.submitted_at,
            &s.graded_at,
        ),
    )
}

fn handle_submissions_create(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let activity_id = match required_str(req, "activityId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let file_url = match optional_str(req, "fileUrl") {
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
    let Some(activity) = snap.activity(&activity_id) else {
        return err(
            &req.id,
            "not_found",
            "activity not found",
            Some(json!({ "id": activity_id })),
        );
    };
    if snap.student(&student_id).is_none() {
        return err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "id": student_id })),
        );
    }
    let comments = match comments_from_params(req, activity) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let earlier: Vec<&Submission> = snap
        .submissions
        .iter()
        .filter(|s| s.activity_id == activity_id && s.student_id == student_id)
        .collect();
    if settings.resubmission_policy == ResubmissionPolicy::Reject && !earlier.is_empty() {
        return err(
            &req.id,
            "already_submitted",
            "this activity was already submitted",
            Some(json!({ "submissionId": earlier[earlier.len() - 1].id })),
        );
    }

    let now = chrono::Utc::now();
    let mut submission = Submission {
        id: Uuid::new_v4().to_string(),
        activity_id: activity_id.clone(),
        student_id: student_id.clone(),
        status: SubmissionStatus::Pending,
        grade: None,
        feedback: None,
        file_url,
        comments,
        submitted_at: stamp(now),
        graded_at: None,
    };
    let outcome = match auto_grade(activity, &submission) {
        Ok(v) => v,
        Err(e) => return grading_err(&req.id, &e),
    };
    apply_outcome(&mut submission, outcome, now);

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let mut replaced = Vec::new();
    if settings.resubmission_policy == ResubmissionPolicy::Replace {
        for prev in &earlier {
            if let Err(e) = tx.execute("DELETE FROM submissions WHERE id = ?", [&prev.id]) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_delete_failed",
                    e.to_string(),
                    Some(json!({ "table": "submissions" })),
                );
            }
            replaced.push(prev.id.clone());
        }
    }
    if let Err(e) = insert_submission(&tx, &submission) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "submissions" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    let auto_graded = submission.status == SubmissionStatus::Graded;
    tracing::info!(
        submission_id = %submission.id,
        activity_id = %activity_id,
        status = submission.status.as_str(),
        grade = ?submission.grade,
        replaced = replaced.len(),
        "submission stored"
    );
    ok(
        &req.id,
        json!({
            "submission": submission,
            "autoGraded": auto_graded,
            "replacedSubmissionIds": replaced,
        }),
    )
}

/// Teacher grading. Concurrent graders overwrite each other; the last write
/// wins.
fn handle_submissions_grade(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let submission_id = match required_str(req, "submissionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(grade) = req.params.get("grade").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "grade must be a number", None);
    };
    let feedback = match optional_str(req, "feedback") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(current) = snap.submission(&submission_id) else {
        return err(
            &req.id,
            "not_found",
            "submission not found",
            Some(json!({ "id": submission_id })),
        );
    };

    let updated = match manual_grade(current, grade, feedback.as_deref(), chrono::Utc::now()) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(submission_id = %submission_id, grade, "rejected manual grade");
            return grading_err(&req.id, &e);
        }
    };

    if let Err(e) = conn.execute(
        "UPDATE submissions SET status = ?, grade = ?, feedback = ?, graded_at = ? WHERE id = ?",
        (
            updated.status.as_str(),
            updated.grade,
            &updated.feedback,
            &updated.graded_at,
            &updated.id,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(submission_id = %submission_id, grade = ?updated.grade, "submission graded");
    ok(&req.id, json!({ "submission": updated }))
}

fn handle_submissions_list(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let activity_id = match optional_str(req, "activityId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match optional_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match optional_str(req, "status") {
        Ok(None) => None,
        Ok(Some(s)) => match SubmissionStatus::parse(&s) {
            Some(v) => Some(v),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "status must be one of: pending, delivered, graded",
                    None,
                )
            }
        },
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    report_warnings(req, &snap.warnings);

    let rows: Vec<&Submission> = snap
        .submissions
        .iter()
        .filter(|s| activity_id.as_deref().map_or(true, |a| s.activity_id == a))
        .filter(|s| student_id.as_deref().map_or(true, |st| s.student_id == st))
        .filter(|s| status.map_or(true, |st| s.status == st))
        .collect();
    ok(&req.id, json!({ "submissions": rows }))
}

fn handle_submissions_delete(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let submission_id = match required_str(req, "submissionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_exists(conn, req, "submissions", &submission_id, "submission") {
        return e;
    }
    if let Err(e) = conn.execute("DELETE FROM submissions WHERE id = ?", [&submission_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "submissions" })),
        );
    }
    tracing::info!(submission_id = %submission_id, "submission deleted");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "submissions.create" => Some(handle_submissions_create(state, req)),
        "submissions.grade" => Some(handle_submissions_grade(state, req)),
        "submissions.list" => Some(handle_submissions_list(state, req)),
        "submissions.delete" => Some(handle_submissions_delete(state, req)),
        _ => None,
    }
}
