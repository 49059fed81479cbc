use crate::config::{GradingSettings, GRADING_SETTINGS_KEY};
use crate::model::{Activity, Question, SchoolClass, Snapshot, Student, SubmissionRow};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

pub const DB_FILE: &str = "inovatec.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            email TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    // questions holds a JSON array of {id, prompt, options, answer}.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            points INTEGER NOT NULL,
            deadline TEXT,
            discipline TEXT,
            icon TEXT,
            color TEXT,
            questions TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    ensure_activities_presentation_columns(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions(
            id TEXT PRIMARY KEY,
            activity_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            grade REAL,
            feedback TEXT,
            file_url TEXT,
            comments TEXT NOT NULL DEFAULT '',
            submitted_at TEXT NOT NULL,
            graded_at TEXT,
            FOREIGN KEY(activity_id) REFERENCES activities(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    ensure_submissions_file_url(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_activity ON submissions(activity_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_student ON submissions(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

// Workspaces from before missions carried a question set or visual hints.
fn ensure_activities_presentation_columns(conn: &Connection) -> anyhow::Result<()> {
    for column in ["icon", "color", "questions"] {
        if !table_has_column(conn, "activities", column)? {
            conn.execute(&format!("ALTER TABLE activities ADD COLUMN {} TEXT", column), [])?;
        }
    }
    Ok(())
}

fn ensure_submissions_file_url(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "submissions", "file_url")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE submissions ADD COLUMN file_url TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("settings {} is not JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

pub fn load_grading_settings(conn: &Connection) -> anyhow::Result<GradingSettings> {
    let saved = settings_get_json(conn, GRADING_SETTINGS_KEY)?;
    Ok(GradingSettings::from_stored(saved.as_ref()))
}

pub fn exists(conn: &Connection, table: &str, id: &str) -> anyhow::Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let hit: Option<i64> = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
    Ok(hit.is_some())
}

pub fn load_classes(conn: &Connection) -> anyhow::Result<Vec<SchoolClass>> {
    let mut stmt = conn.prepare("SELECT id, name FROM classes ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SchoolClass {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_students(conn: &Connection) -> anyhow::Result<Vec<Student>> {
    let mut stmt =
        conn.prepare("SELECT id, class_id, name, email FROM students ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Student {
                id: row.get(0)?,
                class_id: row.get(1)?,
                name: row.get(2)?,
                email: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Reads the questions column. NULL, empty or unreadable values mean no
/// questions, which routes the activity to manual grading.
pub fn decode_questions(raw: Option<&str>) -> Vec<Question> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<Question>>(raw) {
        Ok(qs) => qs,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable questions column");
            Vec::new()
        }
    }
}

pub fn load_activities(conn: &Connection) -> anyhow::Result<Vec<Activity>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, description, points, deadline, discipline, icon, color, questions
         FROM activities
         ORDER BY created_at, id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let points: i64 = row.get(3)?;
            let questions: Option<String> = row.get(8)?;
            Ok(Activity {
                id: row.get(0)?,
                title: row.get(1)?,
                description: row.get(2)?,
                points: u32::try_from(points.max(0)).unwrap_or(u32::MAX),
                deadline: row.get(4)?,
                discipline: row.get(5)?,
                icon: row.get(6)?,
                color: row.get(7)?,
                questions: decode_questions(questions.as_deref()),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_submission_rows(conn: &Connection) -> anyhow::Result<Vec<SubmissionRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, activity_id, student_id, status, grade, feedback, file_url, comments,
                submitted_at, graded_at
         FROM submissions
         ORDER BY submitted_at, id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SubmissionRow {
                id: row.get(0)?,
                activity_id: row.get(1)?,
                student_id: row.get(2)?,
                status: row.get(3)?,
                grade: row.get(4)?,
                feedback: row.get(5)?,
                file_url: row.get(6)?,
                comments: row.get(7)?,
                submitted_at: row.get(8)?,
                graded_at: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Fresh copy of everything, with submissions normalized against their
/// activities. Callers reload after every write instead of patching.
pub fn load_snapshot(conn: &Connection) -> anyhow::Result<Snapshot> {
    let classes = load_classes(conn)?;
    let students = load_students(conn)?;
    let activities = load_activities(conn)?;
    let by_id: HashMap<&str, &Activity> =
        activities.iter().map(|a| (a.id.as_str(), a)).collect();

    let mut submissions = Vec::new();
    let mut warnings = Vec::new();
    for row in load_submission_rows(conn)? {
        let activity = by_id.get(row.activity_id.as_str()).copied();
        let (s, w) = row.normalize(activity);
        submissions.push(s);
        warnings.extend(w);
    }

    Ok(Snapshot {
        classes,
        students,
        activities,
        submissions,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SubmissionStatus;

    fn temp_workspace(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn old_workspace_gains_missing_columns() {
        let ws = temp_workspace("inovatec-db-backfill");
        {
            let conn = Connection::open(ws.join(DB_FILE)).expect("open raw");
            conn.execute_batch(
                "CREATE TABLE activities(
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    points INTEGER NOT NULL,
                    deadline TEXT,
                    discipline TEXT,
                    created_at TEXT NOT NULL
                 );
                 INSERT INTO activities(id, title, points, created_at)
                 VALUES('a1', 'Leitura', 20, '2024-01-01T00:00:00Z');",
            )
            .expect("seed old schema");
        }

        let conn = open_db(&ws).expect("open_db");
        assert!(table_has_column(&conn, "activities", "questions").expect("table_info"));
        let acts = load_activities(&conn).expect("load");
        assert_eq!(acts.len(), 1);
        assert!(acts[0].questions.is_empty());
        assert_eq!(acts[0].color, None);

        // Running again is a no-op.
        drop(conn);
        open_db(&ws).expect("reopen");
    }

    #[test]
    fn snapshot_repairs_inconsistent_rows() {
        let ws = temp_workspace("inovatec-db-snapshot");
        let conn = open_db(&ws).expect("open_db");
        conn.execute_batch(
            "INSERT INTO classes(id, name, created_at) VALUES('c1', '7A', 'x');
             INSERT INTO students(id, class_id, name, created_at) VALUES('s1', 'c1', 'Ana', 'x');
             INSERT INTO activities(id, title, points, questions, created_at)
             VALUES('a1', 'Quiz', 10, '[{\"id\":\"q1\",\"prompt\":\"?\",\"options\":[],\"answer\":\"x\"}]', 'x');
             INSERT INTO submissions(id, activity_id, student_id, status, grade, comments, submitted_at)
             VALUES('sub1', 'a1', 's1', 'graded', NULL, '{\"q1\":\"x\"}', '2024-01-01T00:00:00Z'),
                   ('sub2', 'a1', 's1', 'lost', NULL, 'texto', '2024-01-02T00:00:00Z');",
        )
        .expect("seed");

        let snap = load_snapshot(&conn).expect("snapshot");
        assert_eq!(snap.submissions.len(), 2);
        assert!(snap
            .submissions
            .iter()
            .all(|s| s.status == SubmissionStatus::Delivered));
        assert_eq!(snap.warnings.len(), 2);
        assert!(snap.submissions[0].comments.answers().is_some());
        assert!(snap.submissions[1].comments.answers().is_none());
    }

    #[test]
    fn unreadable_questions_column_means_no_questions() {
        assert!(decode_questions(Some("not json")).is_empty());
        assert!(decode_questions(Some("  ")).is_empty());
        assert!(decode_questions(None).is_empty());
        assert_eq!(
            decode_questions(Some(r#"[{"id":"q1","prompt":"p","options":["a"],"answer":"a"}]"#)).len(),
            1
        );
    }
}
