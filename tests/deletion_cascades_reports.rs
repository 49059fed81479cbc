mod test_support;

use serde_json::json;
use test_support::{request_err_code, request_ok, seed_school, spawn_sidecar, str_field};

fn submission_count(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    id: &str,
) -> usize {
    request_ok(stdin, reader, id, "submissions.list", json!({}))
        .get("submissions")
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .expect("submissions")
}

#[test]
fn deleting_an_activity_drops_its_submissions_from_reports() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader, "inovatec-delete-activity", 1);
    let student = school.student_ids[0].clone();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "submissions.create",
        json!({
            "activityId": school.quiz_id,
            "studentId": student,
            "answers": { "q1": "B", "q2": "C" }
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "submissions.create",
        json!({ "activityId": school.essay_id, "studentId": student, "comments": "ok" }),
    );
    assert_eq!(submission_count(&mut stdin, &mut reader, "3"), 2);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "activities.delete",
        json!({ "activityId": school.quiz_id }),
    );
    assert_eq!(submission_count(&mut stdin, &mut reader, "5"), 1);

    let dash = request_ok(&mut stdin, &mut reader, "6", "reports.dashboard", json!({}));
    let stats = dash.get("stats").expect("stats");
    assert_eq!(stats.get("totalActivities").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(stats.get("totalSubmissions").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(stats.get("gradedCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(stats.get("avgGrade").and_then(|v| v.as_f64()), Some(0.0));

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "7",
        "activities.delete",
        json!({ "activityId": school.quiz_id }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn deleting_a_submission_removes_it_from_reports() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader, "inovatec-delete-submission", 1);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "submissions.create",
        json!({
            "activityId": school.quiz_id,
            "studentId": school.student_ids[0],
            "answers": { "q1": "B", "q2": "C" }
        }),
    );
    let submission_id = str_field(created.get("submission").expect("submission"), "id");

    let dash = request_ok(&mut stdin, &mut reader, "2", "reports.dashboard", json!({}));
    let stats = dash.get("stats").expect("stats");
    assert_eq!(stats.get("totalSubmissions").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(stats.get("gradedCount").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(stats.get("avgGrade").and_then(|v| v.as_f64()), Some(10.0));

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "submissions.delete",
        json!({ "submissionId": submission_id }),
    );
    assert_eq!(deleted.get("ok").and_then(|v| v.as_bool()), Some(true));

    let dash = request_ok(&mut stdin, &mut reader, "4", "reports.dashboard", json!({}));
    let stats = dash.get("stats").expect("stats");
    assert_eq!(stats.get("totalSubmissions").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(stats.get("gradedCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(stats.get("avgGrade").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(submission_count(&mut stdin, &mut reader, "5"), 0);

    for (i, id) in [submission_id.as_str(), "missing"].into_iter().enumerate() {
        let code = request_err_code(
            &mut stdin,
            &mut reader,
            &format!("gone-{}", i),
            "submissions.delete",
            json!({ "submissionId": id }),
        );
        assert_eq!(code, "not_found", "{}", id);
    }
    let code = request_err_code(&mut stdin, &mut reader, "6", "submissions.delete", json!({}));
    assert_eq!(code, "bad_params");
}

#[test]
fn deleting_a_student_or_class_cascades() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader, "inovatec-delete-class", 3);

    for (i, student) in school.student_ids.iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("sub-{}", i),
            "submissions.create",
            json!({ "activityId": school.essay_id, "studentId": student, "comments": "ok" }),
        );
    }
    assert_eq!(submission_count(&mut stdin, &mut reader, "1"), 3);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.delete",
        json!({ "studentId": school.student_ids[0] }),
    );
    assert_eq!(submission_count(&mut stdin, &mut reader, "3"), 2);

    let classes = request_ok(&mut stdin, &mut reader, "4", "classes.list", json!({}));
    let row = classes
        .get("classes")
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .cloned()
        .expect("class row");
    assert_eq!(row.get("studentCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(row.get("submissionCount").and_then(|v| v.as_u64()), Some(2));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classes.delete",
        json!({ "classId": school.class_id }),
    );
    assert_eq!(submission_count(&mut stdin, &mut reader, "6"), 0);
    let students = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    assert_eq!(
        students.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    // Activities outlive classes.
    let acts = request_ok(&mut stdin, &mut reader, "8", "activities.list", json!({}));
    let ids: Vec<String> = acts
        .get("activities")
        .and_then(|v| v.as_array())
        .expect("activities")
        .iter()
        .map(|a| str_field(a, "id"))
        .collect();
    assert_eq!(ids, vec![school.quiz_id.clone(), school.essay_id.clone()]);
}
