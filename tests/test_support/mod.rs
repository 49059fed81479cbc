#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_sidecar_with_env(&[])
}

pub fn spawn_sidecar_with_env(env: &[(&str, String)]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_inovatecd");
    let mut cmd = Command::new(exe);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("INOVATECD_WORKSPACE");
    for (k, v) in env {
        cmd.env(k, v);
    }
    let mut child = cmd.spawn().expect("spawn inovatecd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_line(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_line(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(json!({}))
}

/// Sends a request that must fail and returns its error code.
pub fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

pub fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

/// A selected workspace with one class, `students` students and the two-question
/// quiz used across the grading tests.
pub struct School {
    pub class_id: String,
    pub student_ids: Vec<String>,
    pub quiz_id: String,
    pub essay_id: String,
}

pub fn seed_school(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
    students: usize,
) -> School {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(stdin, reader, "seed-class", "classes.create", json!({ "name": "7A" }));
    let class_id = str_field(&class, "classId");

    let mut student_ids = Vec::with_capacity(students);
    for i in 0..students {
        let s = request_ok(
            stdin,
            reader,
            &format!("seed-student-{}", i),
            "students.create",
            json!({ "classId": class_id, "name": format!("Aluno {}", i + 1) }),
        );
        student_ids.push(str_field(&s, "studentId"));
    }

    let quiz = request_ok(
        stdin,
        reader,
        "seed-quiz",
        "activities.create",
        json!({
            "title": "Frações",
            "points": 50,
            "discipline": "Matemática",
            "questions": [
                { "id": "q1", "prompt": "1/2 + 1/2?", "options": ["A", "B", "C"], "answer": "B" },
                { "id": "q2", "prompt": "2/4 = ?", "options": ["A", "B", "C"], "answer": "C" }
            ]
        }),
    );
    let essay = request_ok(
        stdin,
        reader,
        "seed-essay",
        "activities.create",
        json!({ "title": "Redação", "points": 30, "discipline": "Português" }),
    );

    School {
        class_id,
        student_ids,
        quiz_id: str_field(&quiz, "activityId"),
        essay_id: str_field(&essay, "activityId"),
    }
}
