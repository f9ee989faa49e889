#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_activityd");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .env_remove("ACTIVITYD_WORKSPACE")
            .spawn()
            .expect("spawn activityd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    /// Spawns and selects `workspace`.
    pub fn open(workspace: &Path) -> Self {
        let mut sidecar = Self::spawn();
        sidecar.ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        sidecar
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
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
        value
            .pointer("/error/code")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join("activity.sqlite3")
}

pub fn admin(id: &str) -> serde_json::Value {
    json!({ "userId": id, "role": "admin" })
}

pub fn student(id: &str) -> serde_json::Value {
    json!({ "userId": id, "role": "student" })
}

pub fn teacher(id: &str) -> serde_json::Value {
    json!({ "userId": id, "role": "teacher" })
}

pub fn str_field(value: &serde_json::Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", pointer, value))
        .to_string()
}

pub fn i64_field(value: &serde_json::Value, pointer: &str) -> i64 {
    value
        .pointer(pointer)
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| panic!("missing {} in {}", pointer, value))
}

pub fn f64_field(value: &serde_json::Value, pointer: &str) -> f64 {
    value
        .pointer(pointer)
        .and_then(|v| v.as_f64())
        .unwrap_or_else(|| panic!("missing {} in {}", pointer, value))
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}

/// A school (active semester 1 of 2567) with junior room "1/1", senior room
/// "5/1", two students in each and one teacher.
pub struct School {
    pub id: String,
    pub junior: Vec<String>,
    pub senior: Vec<String>,
    pub teacher: String,
}

pub fn seed_school(sidecar: &mut Sidecar) -> School {
    let school = sidecar.ok(
        "schools.create",
        json!({ "name": "Wat Suthiwararam", "activeSemester": 1, "activeSchoolYear": 2567 }),
    );
    let school_id = str_field(&school, "/schoolId");
    for label in ["1/1", "5/1"] {
        sidecar.ok(
            "classrooms.create",
            json!({ "schoolId": school_id, "label": label }),
        );
    }
    let mut junior = Vec::new();
    let mut senior = Vec::new();
    for (label, out) in [("1/1", &mut junior), ("5/1", &mut senior)] {
        for n in 0..2 {
            let created = sidecar.ok(
                "students.create",
                json!({ "schoolId": school_id, "classroom": label, "name": format!("{label}-{n}") }),
            );
            out.push(str_field(&created, "/studentId"));
        }
    }
    let teacher = sidecar.ok(
        "teachers.create",
        json!({ "schoolId": school_id, "name": "Kru Somchai" }),
    );
    School {
        id: school_id,
        junior,
        senior,
        teacher: str_field(&teacher, "/teacherId"),
    }
}

/// Creates an activity as admin "admin-1" and returns its id.
pub fn create_activity(sidecar: &mut Sidecar, school_id: &str, extra: serde_json::Value) -> i64 {
    let mut params = json!({
        "actor": admin("admin-1"),
        "schoolId": school_id,
        "name": "Volunteer hours",
    });
    if let (Some(base), Some(more)) = (params.as_object_mut(), extra.as_object()) {
        for (k, v) in more {
            base.insert(k.clone(), v.clone());
        }
    }
    let result = sidecar.ok("activities.create", params);
    i64_field(&result, "/activity/id")
}

pub fn create_record(sidecar: &mut Sidecar, student_id: &str, activity_id: i64, amount: f64) -> i64 {
    let result = sidecar.ok(
        "records.create",
        json!({ "actor": student(student_id), "activityId": activity_id, "amount": amount }),
    );
    i64_field(&result, "/record/id")
}
