use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Answer map keyed by question id.
pub type AnswerMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    #[serde(default)]
    pub prompt: String,
    /// Empty means free-text.
    #[serde(default)]
    pub options: Vec<String>,
    pub answer: String,
}

impl Question {
    pub fn is_multiple_choice(&self) -> bool {
        !self.options.is_empty()
    }
}

/// A mission assigned by a teacher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub points: u32,
    pub deadline: Option<String>,
    pub discipline: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl Activity {
    pub fn has_questions(&self) -> bool {
        !self.questions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Delivered,
    Graded,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Delivered => "delivered",
            SubmissionStatus::Graded => "graded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "delivered" => Some(Self::Delivered),
            "graded" => Some(Self::Graded),
            _ => None,
        }
    }
}

/// The comments column could not be read as an answer map.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("comments are not a JSON answer map: {0}")]
pub struct UnparsableAnswers(pub String);

/// What a student wrote with a submission.
///
/// Activities with questions carry an answer map; every other activity carries
/// prose. The persisted column holds either the JSON encoding of the map or the
/// prose itself, so the owning activity decides how a stored value is read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Comments {
    FreeText(String),
    Answers(AnswerMap),
}

impl Comments {
    /// Reads a persisted comments value in the context of its activity.
    ///
    /// When the activity has questions but the value is not a JSON object the
    /// text is kept as prose, and the submission will wait for a teacher.
    pub fn decode(raw: &str, activity: Option<&Activity>) -> Self {
        match activity {
            Some(a) if a.has_questions() => match parse_answer_map(raw) {
                Ok(answers) => Comments::Answers(answers),
                Err(_) => Comments::FreeText(raw.to_string()),
            },
            _ => Comments::FreeText(raw.to_string()),
        }
    }

    /// Persisted form: JSON for answer maps, the text itself otherwise.
    pub fn encode(&self) -> String {
        match self {
            Comments::FreeText(s) => s.clone(),
            Comments::Answers(map) => serde_json::to_string(map).unwrap_or_default(),
        }
    }

    pub fn answers(&self) -> Option<&AnswerMap> {
        match self {
            Comments::Answers(map) => Some(map),
            Comments::FreeText(_) => None,
        }
    }
}

/// Parses `{"questionId": "answer", ...}`.
///
/// Numbers and booleans are kept as their JSON text; `null` entries are dropped
/// so they count as unanswered.
pub fn parse_answer_map(raw: &str) -> Result<AnswerMap, UnparsableAnswers> {
    let value: serde_json::Value =
        serde_json::from_str(raw.trim()).map_err(|e| UnparsableAnswers(e.to_string()))?;
    answer_map_from_value(&value)
}

pub fn answer_map_from_value(value: &serde_json::Value) -> Result<AnswerMap, UnparsableAnswers> {
    let Some(obj) = value.as_object() else {
        return Err(UnparsableAnswers("expected a JSON object".to_string()));
    };
    let mut out = AnswerMap::new();
    for (k, v) in obj {
        let text = match v {
            serde_json::Value::Null => continue,
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(_) | serde_json::Value::Bool(_) => v.to_string(),
            _ => {
                return Err(UnparsableAnswers(format!(
                    "answer for {} must be a string",
                    k
                )))
            }
        };
        out.insert(k.clone(), text);
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub activity_id: String,
    pub student_id: String,
    pub status: SubmissionStatus,
    pub grade: Option<f64>,
    pub feedback: Option<String>,
    pub file_url: Option<String>,
    pub comments: Comments,
    pub submitted_at: String,
    pub graded_at: Option<String>,
}

impl Submission {
    pub fn graded_grade(&self) -> Option<f64> {
        if self.status == SubmissionStatus::Graded {
            self.grade
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolClass {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub class_id: String,
    pub name: String,
    pub email: Option<String>,
}

/// Data-quality problems found while reading a snapshot. None of them abort a
/// computation; the affected row is repaired or skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "code",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum SnapshotWarning {
    ReferenceMismatch {
        submission_id: String,
        activity_id: String,
    },
    GradedWithoutGrade {
        submission_id: String,
    },
    GradeOnUngraded {
        submission_id: String,
    },
    UnknownStatus {
        submission_id: String,
        status: String,
    },
}

/// Submission exactly as stored (snake_case columns, comments still encoded).
#[derive(Debug, Clone)]
pub struct SubmissionRow {
    pub id: String,
    pub activity_id: String,
    pub student_id: String,
    pub status: String,
    pub grade: Option<f64>,
    pub feedback: Option<String>,
    pub file_url: Option<String>,
    pub comments: String,
    pub submitted_at: String,
    pub graded_at: Option<String>,
}

impl SubmissionRow {
    /// Converts a stored row into a [`Submission`], enforcing the status/grade
    /// pairing: graded rows must carry a grade and other rows must not.
    ///
    /// A row whose activity is gone keeps its comments as text; the
    /// aggregations skip it by activity id.
    pub fn normalize(self, activity: Option<&Activity>) -> (Submission, Vec<SnapshotWarning>) {
        let mut warnings = Vec::new();

        let mut status = match SubmissionStatus::parse(&self.status) {
            Some(s) => s,
            None => {
                warnings.push(SnapshotWarning::UnknownStatus {
                    submission_id: self.id.clone(),
                    status: self.status.clone(),
                });
                SubmissionStatus::Delivered
            }
        };
        let mut grade = self.grade.filter(|g| g.is_finite());
        match (status, grade) {
            (SubmissionStatus::Graded, None) => {
                warnings.push(SnapshotWarning::GradedWithoutGrade {
                    submission_id: self.id.clone(),
                });
                status = SubmissionStatus::Delivered;
            }
            (SubmissionStatus::Pending | SubmissionStatus::Delivered, Some(_)) => {
                warnings.push(SnapshotWarning::GradeOnUngraded {
                    submission_id: self.id.clone(),
                });
                grade = None;
            }
            _ => {}
        }

        let comments = Comments::decode(&self.comments, activity);
        (
            Submission {
                id: self.id,
                activity_id: self.activity_id,
                student_id: self.student_id,
                status,
                grade,
                feedback: self.feedback,
                file_url: self.file_url,
                comments,
                submitted_at: self.submitted_at,
                graded_at: self.graded_at,
            },
            warnings,
        )
    }
}

/// Everything the reporting views need, loaded in one pass.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub classes: Vec<SchoolClass>,
    pub students: Vec<Student>,
    pub activities: Vec<Activity>,
    pub submissions: Vec<Submission>,
    pub warnings: Vec<SnapshotWarning>,
}

impl Snapshot {
    pub fn activity(&self, id: &str) -> Option<&Activity> {
        self.activities.iter().find(|a| a.id == id)
    }

    pub fn student(&self, id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn submission(&self, id: &str) -> Option<&Submission> {
        self.submissions.iter().find(|s| s.id == id)
    }

    /// Students of one class plus the submissions they made.
    pub fn scoped_to_class(&self, class_id: &str) -> (Vec<Student>, Vec<Submission>) {
        let students: Vec<Student> = self
            .students
            .iter()
            .filter(|s| s.class_id == class_id)
            .cloned()
            .collect();
        let submissions = self
            .submissions
            .iter()
            .filter(|sub| students.iter().any(|s| s.id == sub.student_id))
            .cloned()
            .collect();
        (students, submissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiz() -> Activity {
        Activity {
            id: "a1".to_string(),
            title: "Frações".to_string(),
            description: String::new(),
            points: 50,
            deadline: None,
            discipline: Some("Matemática".to_string()),
            icon: None,
            color: None,
            questions: vec![Question {
                id: "q1".to_string(),
                prompt: "1/2 + 1/2?".to_string(),
                options: vec!["1".to_string(), "2".to_string()],
                answer: "1".to_string(),
            }],
        }
    }

    fn row(status: &str, grade: Option<f64>, comments: &str) -> SubmissionRow {
        SubmissionRow {
            id: "s1".to_string(),
            activity_id: "a1".to_string(),
            student_id: "st1".to_string(),
            status: status.to_string(),
            grade,
            feedback: None,
            file_url: None,
            comments: comments.to_string(),
            submitted_at: "2024-05-01T10:00:00+00:00".to_string(),
            graded_at: None,
        }
    }

    #[test]
    fn comments_follow_owning_activity() {
        let a = quiz();
        let decoded = Comments::decode(r#"{"q1":"1"}"#, Some(&a));
        assert_eq!(decoded.answers().map(|m| m.len()), Some(1));

        let mut essay = quiz();
        essay.questions.clear();
        let prose = Comments::decode(r#"{"q1":"1"}"#, Some(&essay));
        assert_eq!(prose, Comments::FreeText(r#"{"q1":"1"}"#.to_string()));
    }

    #[test]
    fn malformed_answers_stay_as_text() {
        let a = quiz();
        assert!(matches!(
            Comments::decode("{not json", Some(&a)),
            Comments::FreeText(_)
        ));
        assert!(matches!(
            Comments::decode("[\"1\"]", Some(&a)),
            Comments::FreeText(_)
        ));
    }

    #[test]
    fn answer_values_are_stringified_and_nulls_dropped() {
        let map = parse_answer_map(r#"{"q1": 2, "q2": null, "q3": true}"#).expect("parse");
        assert_eq!(map.get("q1").map(String::as_str), Some("2"));
        assert_eq!(map.get("q2"), None);
        assert_eq!(map.get("q3").map(String::as_str), Some("true"));
        assert!(parse_answer_map(r#"{"q1": ["a"]}"#).is_err());
    }

    #[test]
    fn encode_roundtrips_through_decode() {
        let a = quiz();
        let mut map = AnswerMap::new();
        map.insert("q1".to_string(), "2".to_string());
        let c = Comments::Answers(map);
        assert_eq!(Comments::decode(&c.encode(), Some(&a)), c);
    }

    #[test]
    fn normalize_repairs_status_grade_pairing() {
        let a = quiz();
        let (s, w) = row("graded", None, "").normalize(Some(&a));
        assert_eq!(s.status, SubmissionStatus::Delivered);
        assert_eq!(
            w,
            vec![SnapshotWarning::GradedWithoutGrade {
                submission_id: "s1".to_string()
            }]
        );

        let (s, w) = row("delivered", Some(7.0), "").normalize(Some(&a));
        assert_eq!(s.grade, None);
        assert_eq!(w.len(), 1);

        let (s, w) = row("graded", Some(7.5), r#"{"q1":"1"}"#).normalize(Some(&a));
        assert_eq!(s.graded_grade(), Some(7.5));
        assert!(w.is_empty());
    }

    #[test]
    fn normalize_without_activity_keeps_text() {
        let (s, w) = row("Delivered", None, r#"{"q1":"1"}"#).normalize(None);
        assert_eq!(s.status, SubmissionStatus::Delivered);
        assert_eq!(s.comments, Comments::FreeText(r#"{"q1":"1"}"#.to_string()));
        assert!(w.is_empty());

        let (s, w) = row("archived", None, "").normalize(None);
        assert_eq!(s.status, SubmissionStatus::Delivered);
        assert!(matches!(w.as_slice(), [SnapshotWarning::UnknownStatus { .. }]));
    }
}
