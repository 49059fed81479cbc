use crate::model::{Activity, AnswerMap, Submission, SubmissionStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

pub const MAX_GRADE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GradingError {
    #[error("grade must be between 0 and 10, got {0}")]
    InvalidGrade(f64),

    #[error("submission references activity {submission_activity}, not {activity}")]
    ReferenceMismatch {
        submission_activity: String,
        activity: String,
    },
}

impl GradingError {
    /// IPC error code.
    pub fn code(&self) -> &'static str {
        match self {
            GradingError::InvalidGrade(_) => "invalid_grade",
            GradingError::ReferenceMismatch { .. } => "reference_mismatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeOutcome {
    pub status: SubmissionStatus,
    pub grade: Option<f64>,
    pub feedback: Option<String>,
}

impl GradeOutcome {
    /// Accepted, waiting for a teacher.
    pub fn delivered() -> Self {
        Self {
            status: SubmissionStatus::Delivered,
            grade: None,
            feedback: None,
        }
    }
}

/// Half-up rounding to one decimal, the granularity grades are shown with.
pub fn round_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

fn normalize_answer(s: &str) -> String {
    s.trim().to_lowercase()
}

pub fn answers_match(given: &str, expected: &str) -> bool {
    normalize_answer(given) == normalize_answer(expected)
}

pub fn auto_feedback(matches: usize, total: usize) -> String {
    format!("Autocorreção: acertou {} de {} questões", matches, total)
}

/// Decides whether `submission` can be graded without a teacher and, if so,
/// grades it against the activity's answer key.
///
/// Activities without questions, and submissions whose comments are not an
/// answer map, come back as `delivered` with no grade. Only a submission that
/// belongs to a different activity is an error.
pub fn auto_grade(activity: &Activity, submission: &Submission) -> Result<GradeOutcome, GradingError> {
    if submission.activity_id != activity.id {
        return Err(GradingError::ReferenceMismatch {
            submission_activity: submission.activity_id.clone(),
            activity: activity.id.clone(),
        });
    }
    if !activity.has_questions() {
        return Ok(GradeOutcome::delivered());
    }
    let Some(answers) = submission.comments.answers() else {
        return Ok(GradeOutcome::delivered());
    };
    Ok(grade_answers(activity, answers))
}

fn grade_answers(activity: &Activity, answers: &AnswerMap) -> GradeOutcome {
    let total = activity.questions.len();
    debug_assert!(total > 0, "grade_answers needs at least one question");
    if total == 0 {
        return GradeOutcome::delivered();
    }

    let matches = activity
        .questions
        .iter()
        .filter(|q| {
            answers
                .get(&q.id)
                .map(|given| answers_match(given, &q.answer))
                .unwrap_or(false)
        })
        .count();

    let grade = round_1_decimal((matches as f64 / total as f64) * MAX_GRADE);
    GradeOutcome {
        status: SubmissionStatus::Graded,
        grade: Some(grade),
        feedback: Some(auto_feedback(matches, total)),
    }
}

pub fn validate_grade(grade: f64) -> Result<f64, GradingError> {
    if !grade.is_finite() || !(0.0..=MAX_GRADE).contains(&grade) {
        return Err(GradingError::InvalidGrade(grade));
    }
    Ok(grade)
}

/// Submission timestamps: UTC, microseconds, `Z` suffix. Fixed width, so
/// stored values sort as text.
pub fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Stores the outcome of an automatic grading pass on a freshly built
/// submission.
pub fn apply_outcome(submission: &mut Submission, outcome: GradeOutcome, now: DateTime<Utc>) {
    submission.graded_at = match outcome.status {
        SubmissionStatus::Graded => Some(stamp(now)),
        _ => None,
    };
    submission.status = outcome.status;
    submission.grade = outcome.grade;
    submission.feedback = outcome.feedback;
}

/// Teacher grading. Overwrites any previous grade; no history is kept.
///
/// Returns the updated submission and leaves the input untouched, so a
/// rejected grade never reaches the store.
pub fn manual_grade(
    submission: &Submission,
    grade: f64,
    feedback: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Submission, GradingError> {
    let grade = validate_grade(grade)?;
    let mut updated = submission.clone();
    updated.status = SubmissionStatus::Graded;
    updated.grade = Some(round_1_decimal(grade));
    updated.feedback = feedback
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string);
    updated.graded_at = Some(stamp(now));
    Ok(updated)
}
