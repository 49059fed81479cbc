use crate::grading::{round_1_decimal, MAX_GRADE};
use crate::model::{Activity, SchoolClass, SnapshotWarning, Student, Submission, SubmissionStatus};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Histogram ranges. Lower bounds are inclusive; the last range also holds 10.
pub const GRADE_BUCKETS: [(&str, f64, f64); 5] = [
    ("0-2", 0.0, 2.0),
    ("2-4", 2.0, 4.0),
    ("4-6", 4.0, 6.0),
    ("6-8", 6.0, 8.0),
    ("8-10", 8.0, 10.0),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeAverage {
    pub avg: f64,
    pub graded_count: usize,
}

/// Mean grade over graded submissions; anything else is left out.
pub fn grade_average<'a, I>(submissions: I) -> GradeAverage
where
    I: IntoIterator<Item = &'a Submission>,
{
    let mut sum = 0.0;
    let mut graded_count = 0usize;
    for g in submissions.into_iter().filter_map(Submission::graded_grade) {
        sum += g;
        graded_count += 1;
    }
    let avg = if graded_count > 0 {
        sum / (graded_count as f64)
    } else {
        0.0
    };
    GradeAverage { avg, graded_count }
}

/// Submissions made as a percentage of `students * activities`.
pub fn engagement_ratio(submission_count: usize, student_count: usize, activity_count: usize) -> f64 {
    if student_count == 0 {
        return 0.0;
    }
    let possible = (student_count * activity_count.max(1)) as f64;
    (submission_count as f64 / possible) * 100.0
}

/// Splits off submissions whose activity is not in `activities`.
pub fn known_submissions<'a>(
    submissions: &'a [Submission],
    activities: &[Activity],
) -> (Vec<&'a Submission>, Vec<SnapshotWarning>) {
    let ids: HashSet<&str> = activities.iter().map(|a| a.id.as_str()).collect();
    let mut known = Vec::with_capacity(submissions.len());
    let mut warnings = Vec::new();
    for s in submissions {
        if ids.contains(s.activity_id.as_str()) {
            known.push(s);
        } else {
            warnings.push(SnapshotWarning::ReferenceMismatch {
                submission_id: s.id.clone(),
                activity_id: s.activity_id.clone(),
            });
        }
    }
    (known, warnings)
}

/// Every submission the aggregations below will skip.
pub fn reference_warnings(submissions: &[Submission], activities: &[Activity]) -> Vec<SnapshotWarning> {
    known_submissions(submissions, activities).1
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_students: usize,
    pub total_activities: usize,
    pub total_submissions: usize,
    pub graded_count: usize,
    pub pending_review: usize,
    pub avg_grade: f64,
    pub engagement: u32,
}

pub fn compute_stats(
    students: &[Student],
    submissions: &[Submission],
    activities: &[Activity],
) -> DashboardStats {
    let (known, _) = known_submissions(submissions, activities);
    let avg = grade_average(known.iter().copied());
    let pending_review = known
        .iter()
        .filter(|s| s.status == SubmissionStatus::Delivered)
        .count();
    let ratio = engagement_ratio(known.len(), students.len(), activities.len());

    DashboardStats {
        total_students: students.len(),
        total_activities: activities.len(),
        total_submissions: known.len(),
        graded_count: avg.graded_count,
        pending_review,
        avg_grade: round_1_decimal(avg.avg),
        engagement: ratio.round().min(100.0) as u32,
    }
}

/// Bucket index for a grade, or `None` when it is outside 0..=10.
pub fn bucket_index(grade: f64) -> Option<usize> {
    if !grade.is_finite() || !(0.0..=MAX_GRADE).contains(&grade) {
        return None;
    }
    if grade == MAX_GRADE {
        return Some(GRADE_BUCKETS.len() - 1);
    }
    GRADE_BUCKETS
        .iter()
        .position(|(_, min, max)| grade >= *min && grade < *max)
}

pub fn grade_distribution(submissions: &[Submission]) -> [u32; 5] {
    let mut counts = [0u32; 5];
    for g in submissions.iter().filter_map(Submission::graded_grade) {
        if let Some(i) = bucket_index(g) {
            counts[i] += 1;
        }
    }
    counts
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBucket {
    pub label: &'static str,
    pub min: f64,
    pub max: f64,
    pub count: u32,
}

pub fn labeled_distribution(counts: [u32; 5]) -> Vec<GradeBucket> {
    GRADE_BUCKETS
        .iter()
        .zip(counts)
        .map(|((label, min, max), count)| GradeBucket {
            label: *label,
            min: *min,
            max: *max,
            count,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStats {
    pub class_id: String,
    pub class_name: String,
    pub student_count: usize,
    pub submission_count: usize,
    pub avg_grade: f64,
    /// Not capped: students may submit the same activity more than once.
    pub engagement_rate: f64,
}

pub fn per_class_stats(
    classes: &[SchoolClass],
    students: &[Student],
    submissions: &[Submission],
    activities: &[Activity],
) -> Vec<ClassStats> {
    let (known, _) = known_submissions(submissions, activities);
    let mut class_of: HashMap<&str, &str> = HashMap::new();
    for s in students {
        class_of.insert(s.id.as_str(), s.class_id.as_str());
    }

    classes
        .iter()
        .map(|c| {
            let student_count = students.iter().filter(|s| s.class_id == c.id).count();
            let class_subs: Vec<&Submission> = known
                .iter()
                .copied()
                .filter(|s| class_of.get(s.student_id.as_str()) == Some(&c.id.as_str()))
                .collect();
            let avg = grade_average(class_subs.iter().copied());
            ClassStats {
                class_id: c.id.clone(),
                class_name: c.name.clone(),
                student_count,
                submission_count: class_subs.len(),
                avg_grade: round_1_decimal(avg.avg),
                engagement_rate: round_1_decimal(engagement_ratio(
                    class_subs.len(),
                    student_count,
                    activities.len(),
                )),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    pub student_id: String,
    pub name: String,
    pub class_id: String,
    pub submission_count: usize,
    pub graded_count: usize,
    pub avg_grade: f64,
}

pub fn per_student_stats(
    students: &[Student],
    submissions: &[Submission],
    activities: &[Activity],
) -> Vec<StudentStats> {
    let (known, _) = known_submissions(submissions, activities);
    students
        .iter()
        .map(|st| {
            let mine: Vec<&Submission> = known
                .iter()
                .copied()
                .filter(|s| s.student_id == st.id)
                .collect();
            let avg = grade_average(mine.iter().copied());
            StudentStats {
                student_id: st.id.clone(),
                name: st.name.clone(),
                class_id: st.class_id.clone(),
                submission_count: mine.len(),
                graded_count: avg.graded_count,
                avg_grade: round_1_decimal(avg.avg),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    pub student_id: String,
    pub xp: u64,
    pub level: u64,
    pub xp_into_level: u64,
    pub xp_for_next_level: u64,
    pub completed_activities: usize,
}

/// XP counts each activity once, as soon as it has been delivered or graded.
pub fn student_progress(
    student_id: &str,
    submissions: &[Submission],
    activities: &[Activity],
    xp_per_level: u32,
) -> StudentProgress {
    let done: HashSet<&str> = submissions
        .iter()
        .filter(|s| s.student_id == student_id)
        .filter(|s| {
            matches!(
                s.status,
                SubmissionStatus::Delivered | SubmissionStatus::Graded
            )
        })
        .map(|s| s.activity_id.as_str())
        .collect();

    let xp: u64 = activities
        .iter()
        .filter(|a| done.contains(a.id.as_str()))
        .map(|a| u64::from(a.points))
        .sum();
    let per_level = u64::from(xp_per_level.max(1));
    let xp_into_level = xp % per_level;

    StudentProgress {
        student_id: student_id.to_string(),
        xp,
        level: xp / per_level + 1,
        xp_into_level,
        xp_for_next_level: per_level - xp_into_level,
        completed_activities: activities
            .iter()
            .filter(|a| done.contains(a.id.as_str()))
            .count(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedActivity {
    pub activity_id: String,
    pub title: String,
    pub points: u32,
    pub deadline: Option<String>,
    pub discipline: Option<String>,
    pub question_count: usize,
    pub status: SubmissionStatus,
    pub grade: Option<f64>,
    pub submission_id: Option<String>,
}

fn latest<'a>(mut subs: Vec<&'a Submission>) -> Option<&'a Submission> {
    subs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
    subs.pop()
}

/// The student's view of every activity; the latest submission decides the
/// status and an activity with no submission is `pending`.
pub fn assigned_activities(
    student_id: &str,
    activities: &[Activity],
    submissions: &[Submission],
) -> Vec<AssignedActivity> {
    activities
        .iter()
        .map(|a| {
            let last = latest(
                submissions
                    .iter()
                    .filter(|s| s.student_id == student_id && s.activity_id == a.id)
                    .collect(),
            );
            AssignedActivity {
                activity_id: a.id.clone(),
                title: a.title.clone(),
                points: a.points,
                deadline: a.deadline.clone(),
                discipline: a.discipline.clone(),
                question_count: a.questions.len(),
                status: last.map(|s| s.status).unwrap_or(SubmissionStatus::Pending),
                grade: last.and_then(Submission::graded_grade),
                submission_id: last.map(|s| s.id.clone()),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioEntry {
    pub submission: Submission,
    pub activity_title: String,
    pub discipline: Option<String>,
    pub points: u32,
}

/// Past submissions of one student, newest first.
pub fn portfolio(
    student_id: &str,
    submissions: &[Submission],
    activities: &[Activity],
) -> Vec<PortfolioEntry> {
    let by_id: HashMap<&str, &Activity> =
        activities.iter().map(|a| (a.id.as_str(), a)).collect();
    let mut entries: Vec<PortfolioEntry> = submissions
        .iter()
        .filter(|s| s.student_id == student_id)
        .filter_map(|s| {
            let a = by_id.get(s.activity_id.as_str())?;
            Some(PortfolioEntry {
                submission: s.clone(),
                activity_title: a.title.clone(),
                discipline: a.discipline.clone(),
                points: a.points,
            })
        })
        .collect();
    entries.sort_by(|a, b| b.submission.submitted_at.cmp(&a.submission.submitted_at));
    entries
}
