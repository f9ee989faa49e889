mod common;

use common::*;
use serde_json::json;

fn history_statuses(record: &serde_json::Value) -> Vec<String> {
    record
        .get("history")
        .and_then(|v| v.as_array())
        .expect("history array")
        .iter()
        .map(|e| str_field(e, "/status"))
        .collect()
}

#[test]
fn send_unsend_round_trip_grows_history() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let student_id = school.junior[0].clone();
    let activity = create_activity(&mut sidecar, &school.id, json!({ "targetAmount": 3 }));
    let record_id = create_record(&mut sidecar, &student_id, activity, 1.0);

    let sent = sidecar.ok(
        "records.send",
        json!({ "actor": student(&student_id), "recordId": record_id, "teacherId": school.teacher }),
    );
    assert_eq!(str_field(&sent, "/record/status"), "SENDED");
    assert_eq!(str_field(&sent, "/record/teacherId"), school.teacher);

    let back = sidecar.ok(
        "records.unsend",
        json!({ "actor": student(&student_id), "recordId": record_id }),
    );
    assert_eq!(str_field(&back, "/record/status"), "CREATED");
    assert!(back["record"]["teacherId"].is_null());
    assert_eq!(history_statuses(&back["record"]), vec!["CREATED", "SENDED", "CREATED"]);

    let history = sidecar.ok(
        "records.history",
        json!({ "actor": teacher(&school.teacher), "recordId": record_id }),
    );
    assert_eq!(history_statuses(&history), vec!["CREATED", "SENDED", "CREATED"]);
    assert_eq!(str_field(&history, "/status"), "CREATED");
}

#[test]
fn approve_on_created_is_rejected_and_history_untouched() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let student_id = school.senior[0].clone();
    let activity = create_activity(&mut sidecar, &school.id, json!({}));
    let record_id = create_record(&mut sidecar, &student_id, activity, 1.0);

    let response = sidecar.request(
        "records.approve",
        json!({ "actor": admin("admin-1"), "recordId": record_id, "advice": "well done" }),
    );
    assert_eq!(response["ok"], json!(false));
    assert_eq!(str_field(&response, "/error/code"), "invalid_transition");
    assert_eq!(str_field(&response, "/error/details/currentStatus"), "CREATED");
    assert_eq!(str_field(&response, "/error/details/event"), "approve");

    let record = sidecar.ok(
        "records.get",
        json!({ "actor": admin("admin-1"), "recordId": record_id }),
    );
    assert_eq!(history_statuses(&record["record"]), vec!["CREATED"]);
    assert!(record["record"]["advice"].is_null());
}

#[test]
fn guards_follow_role_and_relationship() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let owner = school.junior[0].clone();
    let classmate = school.junior[1].clone();
    let other_teacher = str_field(
        &sidecar.ok("teachers.create", json!({ "schoolId": school.id, "name": "Kru Malee" })),
        "/teacherId",
    );
    let activity = create_activity(&mut sidecar, &school.id, json!({}));
    let record_id = create_record(&mut sidecar, &owner, activity, 1.0);

    let code = sidecar.fail(
        "records.send",
        json!({ "actor": student(&classmate), "recordId": record_id, "teacherId": school.teacher }),
    );
    assert_eq!(code, "permission_denied");

    let code = sidecar.fail(
        "records.send",
        json!({ "actor": admin("admin-1"), "recordId": record_id, "teacherId": school.teacher }),
    );
    assert_eq!(code, "permission_denied");

    sidecar.ok(
        "records.send",
        json!({ "actor": student(&owner), "recordId": record_id, "teacherId": school.teacher }),
    );

    let code = sidecar.fail(
        "records.approve",
        json!({ "actor": teacher(&other_teacher), "recordId": record_id }),
    );
    assert_eq!(code, "permission_denied");

    let code = sidecar.fail(
        "records.approve",
        json!({ "actor": student(&owner), "recordId": record_id }),
    );
    assert_eq!(code, "permission_denied");

    let rejected = sidecar.ok(
        "records.reject",
        json!({ "actor": teacher(&school.teacher), "recordId": record_id, "advice": "needs a photo" }),
    );
    assert_eq!(str_field(&rejected, "/record/status"), "REJECTED");
    assert_eq!(str_field(&rejected, "/record/advice"), "needs a photo");

    let code = sidecar.fail(
        "records.unsend",
        json!({ "actor": student(&owner), "recordId": record_id }),
    );
    assert_eq!(code, "invalid_transition");
}

#[test]
fn send_requires_a_teacher_of_the_same_school() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let elsewhere = seed_school(&mut sidecar);
    let student_id = school.senior[1].clone();
    let activity = create_activity(&mut sidecar, &school.id, json!({}));
    let record_id = create_record(&mut sidecar, &student_id, activity, 1.0);

    let code = sidecar.fail(
        "records.send",
        json!({ "actor": student(&student_id), "recordId": record_id, "teacherId": elsewhere.teacher }),
    );
    assert_eq!(code, "invalid_argument");

    let code = sidecar.fail(
        "records.send",
        json!({ "actor": student(&student_id), "recordId": record_id, "teacherId": "ghost" }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn edits_and_deletes_only_while_created() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let student_id = school.junior[0].clone();
    let activity = create_activity(&mut sidecar, &school.id, json!({ "unit": "HOURS" }));
    let record_id = create_record(&mut sidecar, &student_id, activity, 1.5);

    let edited = sidecar.ok(
        "records.update",
        json!({ "actor": student(&student_id), "recordId": record_id, "amount": 2.5 }),
    );
    assert_eq!(f64_field(&edited, "/record/amount"), 2.5);
    assert_eq!(i64_field(&edited, "/record/version"), 2);
    assert_eq!(history_statuses(&edited["record"]), vec!["CREATED"]);

    sidecar.ok(
        "records.send",
        json!({ "actor": student(&student_id), "recordId": record_id, "teacherId": school.teacher }),
    );
    let code = sidecar.fail(
        "records.update",
        json!({ "actor": student(&student_id), "recordId": record_id, "amount": 3 }),
    );
    assert_eq!(code, "invalid_transition");
    let code = sidecar.fail(
        "records.delete",
        json!({ "actor": student(&student_id), "recordId": record_id }),
    );
    assert_eq!(code, "invalid_transition");

    sidecar.ok(
        "records.delete",
        json!({ "actor": admin("admin-1"), "recordId": record_id }),
    );
    let code = sidecar.fail(
        "records.get",
        json!({ "actor": admin("admin-1"), "recordId": record_id }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn every_transition_writes_one_history_row() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let student_id = school.junior[0].clone();
    let activity = create_activity(&mut sidecar, &school.id, json!({}));
    let record_id = create_record(&mut sidecar, &student_id, activity, 1.0);

    sidecar.ok(
        "records.send",
        json!({ "actor": student(&student_id), "recordId": record_id, "teacherId": school.teacher }),
    );
    sidecar.ok(
        "records.approve",
        json!({ "actor": teacher(&school.teacher), "recordId": record_id }),
    );

    let conn = rusqlite::Connection::open(db_path(workspace.path())).expect("open db");
    let rows: Vec<(i64, String)> = conn
        .prepare("SELECT seq, status FROM record_status_history WHERE record_id = ? ORDER BY seq")
        .expect("prepare")
        .query_map([record_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("rows");
    let statuses: Vec<&str> = rows.iter().map(|(_, s)| s.as_str()).collect();
    assert_eq!(statuses, vec!["CREATED", "SENDED", "APPROVED"]);
    let (version, status): (i64, String) = conn
        .query_row(
            "SELECT version, status FROM records WHERE id = ?",
            [record_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("record row");
    assert_eq!(version, 3);
    assert_eq!(status, "APPROVED");
}

#[test]
fn send_checks_state_and_owner_before_the_teacher() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let owner = school.junior[0].clone();
    let activity = create_activity(&mut sidecar, &school.id, json!({}));

    let pending = create_record(&mut sidecar, &owner, activity, 1.0);
    let code = sidecar.fail(
        "records.send",
        json!({ "actor": student(&school.junior[1]), "recordId": pending, "teacherId": "nobody" }),
    );
    assert_eq!(code, "permission_denied");

    let approved = create_record(&mut sidecar, &owner, activity, 1.0);
    sidecar.ok(
        "records.send",
        json!({ "actor": student(&owner), "recordId": approved, "teacherId": school.teacher }),
    );
    sidecar.ok(
        "records.approve",
        json!({ "actor": teacher(&school.teacher), "recordId": approved }),
    );
    let code = sidecar.fail(
        "records.send",
        json!({ "actor": student(&owner), "recordId": approved, "teacherId": "nobody" }),
    );
    assert_eq!(code, "invalid_transition");
}

#[test]
fn lost_version_race_reports_conflict_and_keeps_history() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let student_id = school.senior[0].clone();
    let activity = create_activity(&mut sidecar, &school.id, json!({}));
    let record_id = create_record(&mut sidecar, &student_id, activity, 1.0);

    {
        let conn = rusqlite::Connection::open(db_path(workspace.path())).expect("open db");
        conn.execute_batch(
            "CREATE TRIGGER swallow_record_updates BEFORE UPDATE ON records
             BEGIN SELECT RAISE(IGNORE); END;",
        )
        .expect("create trigger");
    }

    let code = sidecar.fail(
        "records.send",
        json!({ "actor": student(&student_id), "recordId": record_id, "teacherId": school.teacher }),
    );
    assert_eq!(code, "conflict");

    let record = sidecar.ok(
        "records.get",
        json!({ "actor": admin("admin-1"), "recordId": record_id }),
    );
    assert_eq!(str_field(&record, "/record/status"), "CREATED");
    assert_eq!(i64_field(&record, "/record/version"), 1);
    assert_eq!(history_statuses(&record["record"]), vec!["CREATED"]);
}
