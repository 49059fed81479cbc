use crate::grading::GradingError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn grading_err(id: &str, e: &GradingError) -> serde_json::Value {
    let details = match e {
        GradingError::InvalidGrade(g) => json!({ "grade": g, "min": 0, "max": 10 }),
        GradingError::ReferenceMismatch {
            submission_activity,
            activity,
        } => json!({ "submissionActivityId": submission_activity, "activityId": activity }),
    };
    err(id, e.code(), e.to_string(), Some(details))
}
