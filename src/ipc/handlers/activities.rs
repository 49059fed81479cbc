use crate::db;
use crate::grading::{answers_match, stamp};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_exists, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{Activity, Question};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
}

impl HandlerErr {
    fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
        }
    }

    fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, None)
    }
}

fn parse_nullable_string(v: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    if v.is_null() {
        return Ok(None);
    }
    let s = v
        .as_str()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string or null", key)))?;
    let s = s.trim();
    Ok(if s.is_empty() { None } else { Some(s.to_string()) })
}

fn parse_points(v: &Value) -> Result<u32, HandlerErr> {
    let n = v
        .as_i64()
        .ok_or_else(|| HandlerErr::bad_params("points must be integer"))?;
    if !(1..=100_000).contains(&n) {
        return Err(HandlerErr::bad_params("points must be in 1..=100000"));
    }
    Ok(n as u32)
}

/// Validates a question list. Ids default to `q1`, `q2`, ... by position and
/// must be unique; a multiple-choice answer must be one of its options.
fn parse_questions(v: &Value) -> Result<Vec<Question>, HandlerErr> {
    if v.is_null() {
        return Ok(Vec::new());
    }
    let items = v
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params("questions must be an array"))?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            return Err(HandlerErr::bad_params(format!(
                "questions[{}] must be an object",
                i
            )));
        };
        let id = match obj.get("id") {
            None | Some(Value::Null) => format!("q{}", i + 1),
            Some(v) => v
                .as_str()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    HandlerErr::bad_params(format!("questions[{}].id must be a string", i))
                })?,
        };
        if !seen.insert(id.clone()) {
            return Err(HandlerErr::bad_params(format!(
                "duplicate question id: {}",
                id
            )));
        }

        let prompt = obj
            .get("prompt")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        let options = match obj.get("options") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(opts)) => opts
                .iter()
                .map(|o| {
                    o.as_str().map(|s| s.trim().to_string()).ok_or_else(|| {
                        HandlerErr::bad_params(format!(
                            "questions[{}].options must be strings",
                            i
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(HandlerErr::bad_params(format!(
                    "questions[{}].options must be an array",
                    i
                )))
            }
        };
        let answer = obj
            .get("answer")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                HandlerErr::bad_params(format!("questions[{}].answer must not be empty", i))
            })?
            .to_string();

        let q = Question {
            id,
            prompt,
            options,
            answer,
        };
        if q.is_multiple_choice() && !q.options.iter().any(|o| answers_match(o, &q.answer)) {
            return Err(HandlerErr::bad_params(format!(
                "questions[{}].answer must be one of its options",
                i
            )));
        }
        out.push(q);
    }
    Ok(out)
}

fn apply_patch(activity: &mut Activity, patch: &Map<String, Value>) -> Result<(), HandlerErr> {
    for (k, v) in patch {
        match k.as_str() {
            "title" => {
                activity.title = parse_nullable_string(v, k)?
                    .ok_or_else(|| HandlerErr::bad_params("title must not be empty"))?;
            }
            "description" => {
                activity.description = parse_nullable_string(v, k)?.unwrap_or_default();
            }
            "points" => activity.points = parse_points(v)?,
            "deadline" => activity.deadline = parse_nullable_string(v, k)?,
            "discipline" => activity.discipline = parse_nullable_string(v, k)?,
            "icon" => activity.icon = parse_nullable_string(v, k)?,
            "color" => activity.color = parse_nullable_string(v, k)?,
            "questions" => activity.questions = parse_questions(v)?,
            // Identity is not patchable.
            "activityId" | "id" => {}
            _ => return Err(HandlerErr::bad_params(format!("unknown activity field: {}", k))),
        }
    }
    Ok(())
}

fn encode_questions(questions: &[Question]) -> Option<String> {
    if questions.is_empty() {
        None
    } else {
        serde_json::to_string(questions).ok()
    }
}

fn write_activity(conn: &Connection, a: &Activity, insert: bool) -> rusqlite::Result<usize> {
    let questions = encode_questions(&a.questions);
    if insert {
        conn.execute(
            "INSERT INTO activities(id, title, description, points, deadline, discipline, icon, color, questions, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &a.id,
                &a.title,
                &a.description,
                i64::from(a.points),
                &a.deadline,
                &a.discipline,
                &a.icon,
                &a.color,
                &questions,
                stamp(chrono::Utc::now()),
            ),
        )
    } else {
        conn.execute(
            "UPDATE activities
             SET title = ?, description = ?, points = ?, deadline = ?, discipline = ?,
                 icon = ?, color = ?, questions = ?
             WHERE id = ?",
            (
                &a.title,
                &a.description,
                i64::from(a.points),
                &a.deadline,
                &a.discipline,
                &a.icon,
                &a.color,
                &questions,
                &a.id,
            ),
        )
    }
}

fn handle_activities_list(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "activities": [] }));
    };
    match db::load_activities(conn) {
        Ok(activities) => ok(&req.id, json!({ "activities": activities })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_activities_create(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(params) = req.params.as_object() else {
        return err(&req.id, "bad_params", "params must be an object", None);
    };
    if params.get("title").and_then(|v| v.as_str()).is_none() {
        return err(&req.id, "bad_params", "missing title", None);
    }
    if params.get("points").is_none() {
        return err(&req.id, "bad_params", "missing points", None);
    }

    let mut activity = Activity {
        id: Uuid::new_v4().to_string(),
        title: String::new(),
        description: String::new(),
        points: 0,
        deadline: None,
        discipline: None,
        icon: None,
        color: None,
        questions: Vec::new(),
    };
    if let Err(e) = apply_patch(&mut activity, params) {
        return e.response(&req.id);
    }

    if let Err(e) = write_activity(conn, &activity, true) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "activities" })),
        );
    }
    tracing::info!(
        activity_id = %activity.id,
        questions = activity.questions.len(),
        "activity created"
    );
    ok(&req.id, json!({ "activityId": activity.id, "activity": activity }))
}

fn handle_activities_update(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let activity_id = match required_str(req, "activityId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let activities = match db::load_activities(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(mut activity) = activities.into_iter().find(|a| a.id == activity_id) else {
        return err(&req.id, "not_found", "activity not found", None);
    };
    if let Err(e) = apply_patch(&mut activity, patch) {
        return e.response(&req.id);
    }
    if let Err(e) = write_activity(conn, &activity, false) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "activity": activity }))
}

fn handle_activities_delete(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let activity_id = match required_str(req, "activityId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_exists(conn, req, "activities", &activity_id, "activity") {
        return e;
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM submissions WHERE activity_id = ?",
        [&activity_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "submissions" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM activities WHERE id = ?", [&activity_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "activities" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }
    tracing::info!(activity_id = %activity_id, "activity deleted");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "activities.list" => Some(handle_activities_list(state, req)),
        "activities.create" => Some(handle_activities_create(state, req)),
        "activities.update" => Some(handle_activities_update(state, req)),
        "activities.delete" => Some(handle_activities_delete(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_ids_default_by_position() {
        let qs = parse_questions(&json!([
            { "prompt": "2+2?", "options": ["3", "4"], "answer": "4" },
            { "prompt": "Capital?", "answer": "Brasília" }
        ]))
        .unwrap_or_else(|e| panic!("{}", e.message));
        assert_eq!(qs[0].id, "q1");
        assert_eq!(qs[1].id, "q2");
        assert!(qs[0].is_multiple_choice());
        assert!(!qs[1].is_multiple_choice());
    }

    #[test]
    fn multiple_choice_answer_must_be_an_option() {
        let e = parse_questions(&json!([
            { "id": "a", "options": ["x", "y"], "answer": "z" }
        ]))
        .err()
        .map(|e| e.message);
        assert_eq!(
            e.as_deref(),
            Some("questions[0].answer must be one of its options")
        );
    }

    #[test]
    fn duplicate_ids_and_blank_answers_are_rejected() {
        assert!(parse_questions(&json!([
            { "id": "a", "answer": "1" },
            { "id": "a", "answer": "2" }
        ]))
        .is_err());
        assert!(parse_questions(&json!([{ "id": "a", "answer": "  " }])).is_err());
    }

    #[test]
    fn patch_rejects_non_positive_points() {
        let mut a = Activity {
            id: "x".into(),
            title: "t".into(),
            description: String::new(),
            points: 10,
            deadline: None,
            discipline: None,
            icon: None,
            color: None,
            questions: Vec::new(),
        };
        let patch = json!({ "points": 0 });
        assert!(apply_patch(&mut a, patch.as_object().unwrap()).is_err());
        let patch = json!({ "points": 25, "deadline": "2024-06-30" });
        assert!(apply_patch(&mut a, patch.as_object().unwrap()).is_ok());
        assert_eq!(a.points, 25);
        assert_eq!(a.deadline.as_deref(), Some("2024-06-30"));
    }
}
