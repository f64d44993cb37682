#![allow(dead_code)]

use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

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

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_markbook-calcd");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn markbook-calcd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Sidecar {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    /// Spawns a sidecar with `workspace` already selected.
    pub fn with_workspace(workspace: &Path) -> Self {
        let mut sc = Sidecar::spawn();
        sc.ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        sc
    }

    pub fn send_line(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let value = self.send_line(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Asserts failure and returns the error code.
    pub fn fail(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value["error"]["code"]
            .as_str()
            .expect("error code")
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn open_workspace_db(workspace: &Path) -> Connection {
    let conn = Connection::open(workspace.join("markbook.sqlite3")).expect("open db");
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .expect("enable foreign keys");
    conn
}

pub fn insert_class(conn: &Connection, name: &str) -> String {
    let id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO classes(id, name) VALUES(?, ?)", (&id, name))
        .expect("insert class");
    id
}

pub fn insert_student(
    conn: &Connection,
    class_id: &str,
    last: &str,
    first: &str,
    sort_order: i64,
    active: bool,
    mask: &str,
) -> String {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, active, sort_order, raw_line, mark_set_mask)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            class_id,
            last,
            first,
            active as i64,
            sort_order,
            "",
            mask,
        ),
    )
    .expect("insert student");
    id
}

pub fn insert_mark_set(
    conn: &Connection,
    class_id: &str,
    code: &str,
    sort_order: i64,
    weight: f64,
    weight_method: i64,
    calc_method: i64,
) -> String {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO mark_sets(id, class_id, code, file_prefix, description, weight, sort_order, weight_method, calc_method)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            class_id,
            code,
            code,
            format!("{} description", code),
            weight,
            sort_order,
            weight_method,
            calc_method,
        ),
    )
    .expect("insert mark set");
    id
}

pub fn insert_category(conn: &Connection, mark_set_id: &str, name: &str, weight: f64, sort_order: i64) {
    conn.execute(
        "INSERT INTO categories(id, mark_set_id, name, weight, sort_order) VALUES(?, ?, ?, ?, ?)",
        (Uuid::new_v4().to_string(), mark_set_id, name, weight, sort_order),
    )
    .expect("insert category");
}

pub fn insert_assessment(
    conn: &Connection,
    mark_set_id: &str,
    idx: i64,
    category: Option<&str>,
    weight: f64,
    out_of: f64,
) -> String {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO assessments(id, mark_set_id, idx, category_name, title, term, legacy_type, weight, out_of)
         VALUES(?, ?, ?, ?, ?, 1, 0, ?, ?)",
        (
            &id,
            mark_set_id,
            idx,
            category,
            format!("A{}", idx + 1),
            weight,
            out_of,
        ),
    )
    .expect("insert assessment");
    id
}

pub fn insert_score(conn: &Connection, assessment_id: &str, student_id: &str, raw: f64) {
    let status = if raw > 0.0 { "scored" } else { "zero" };
    insert_score_status(conn, assessment_id, student_id, raw, status);
}

pub fn insert_score_status(
    conn: &Connection,
    assessment_id: &str,
    student_id: &str,
    raw: f64,
    status: &str,
) {
    conn.execute(
        "INSERT INTO scores(id, assessment_id, student_id, raw_value, status) VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(assessment_id, student_id) DO UPDATE SET raw_value = excluded.raw_value, status = excluded.status",
        (Uuid::new_v4().to_string(), assessment_id, student_id, raw, status),
    )
    .expect("insert score");
}

pub fn student_row<'a>(summary: &'a serde_json::Value, display_name: &str) -> &'a serde_json::Value {
    summary["perStudent"]
        .as_array()
        .and_then(|arr| {
            arr.iter()
                .find(|s| s.get("displayName").and_then(|v| v.as_str()) == Some(display_name))
        })
        .unwrap_or_else(|| panic!("no perStudent row for {}", display_name))
}

pub fn final_mark(summary: &serde_json::Value, display_name: &str) -> Option<f64> {
    student_row(summary, display_name)
        .get("finalMark")
        .and_then(|v| v.as_f64())
}

pub fn assert_close(actual: Option<f64>, expected: f64, what: &str) {
    let a = actual.unwrap_or_else(|| panic!("{}: expected {}, got null", what, expected));
    assert!(
        (a - expected).abs() < 1e-6,
        "{}: expected {}, got {}",
        what,
        expected,
        a
    );
}
