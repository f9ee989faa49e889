mod common;

use common::*;
use serde_json::json;

fn approved_record(sidecar: &mut Sidecar, school: &School, activity: i64, amount: f64) -> i64 {
    let student_id = school.senior[0].clone();
    let record_id = create_record(sidecar, &student_id, activity, amount);
    sidecar.ok(
        "records.send",
        json!({ "actor": student(&student_id), "recordId": record_id, "teacherId": school.teacher }),
    );
    sidecar.ok(
        "records.approve",
        json!({ "actor": teacher(&school.teacher), "recordId": record_id }),
    );
    record_id
}

fn load(sidecar: &mut Sidecar, record_id: i64) -> serde_json::Value {
    sidecar.ok(
        "records.get",
        json!({ "actor": admin("admin-1"), "recordId": record_id }),
    )["record"]
        .clone()
}

fn history_len(record: &serde_json::Value) -> usize {
    record["history"].as_array().map(|h| h.len()).unwrap_or(0)
}

#[test]
fn template_edit_resets_records_when_protocol_says_so() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let activity = create_activity(
        &mut sidecar,
        &school.id,
        json!({
            "unit": "HOURS",
            "targetAmount": 10,
            "updateProtocol": "RE_EVALUATE_ALL_RECORDS",
            "template": { "fields": ["place"] },
        }),
    );
    let record_id = approved_record(&mut sidecar, &school, activity, 10.0);
    let before = load(&mut sidecar, record_id);
    assert_eq!(str_field(&before, "/status"), "APPROVED");

    let update = sidecar.ok(
        "activities.update",
        json!({
            "actor": admin("admin-1"),
            "activityId": activity,
            "template": { "fields": ["place", "photo"] },
        }),
    );
    assert_eq!(i64_field(&update, "/recordsReset"), 1);
    assert_eq!(update["activity"]["template"], json!({ "fields": ["place", "photo"] }));

    let after = load(&mut sidecar, record_id);
    assert_eq!(str_field(&after, "/status"), "CREATED");
    assert_eq!(history_len(&after), history_len(&before) + 1);
    let history = after["history"].as_array().expect("history");
    assert_eq!(str_field(&history[history.len() - 1], "/status"), "CREATED");
    assert_eq!(str_field(&history[history.len() - 2], "/status"), "APPROVED");
}

#[test]
fn unchanged_template_or_ignore_protocol_leaves_records_alone() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);

    let reevaluating = create_activity(
        &mut sidecar,
        &school.id,
        json!({ "updateProtocol": "RE_EVALUATE_ALL_RECORDS", "template": { "a": 1, "b": 2 } }),
    );
    let first = approved_record(&mut sidecar, &school, reevaluating, 1.0);
    let update = sidecar.ok(
        "activities.update",
        json!({
            "actor": admin("admin-1"),
            "activityId": reevaluating,
            "template": { "b": 2, "a": 1 },
            "name": "Renamed",
        }),
    );
    assert_eq!(i64_field(&update, "/recordsReset"), 0);
    assert_eq!(str_field(&load(&mut sidecar, first), "/status"), "APPROVED");

    let ignoring = create_activity(
        &mut sidecar,
        &school.id,
        json!({ "updateProtocol": "IGNORE_PAST_RECORDS", "template": { "a": 1 } }),
    );
    let second = approved_record(&mut sidecar, &school, ignoring, 1.0);
    let before = load(&mut sidecar, second);
    let update = sidecar.ok(
        "activities.update",
        json!({ "actor": admin("admin-1"), "activityId": ignoring, "template": { "a": 2 } }),
    );
    assert_eq!(i64_field(&update, "/recordsReset"), 0);
    assert_eq!(load(&mut sidecar, second), before);
}

#[test]
fn failed_reset_rolls_back_the_template_edit() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let activity = create_activity(
        &mut sidecar,
        &school.id,
        json!({ "updateProtocol": "RE_EVALUATE_ALL_RECORDS", "template": { "v": 1 } }),
    );
    let record_id = approved_record(&mut sidecar, &school, activity, 1.0);
    let before = load(&mut sidecar, record_id);

    {
        let conn = rusqlite::Connection::open(db_path(workspace.path())).expect("open db");
        conn.execute_batch(
            "CREATE TRIGGER block_history BEFORE INSERT ON record_status_history
             BEGIN SELECT RAISE(ABORT, 'history locked'); END;",
        )
        .expect("create trigger");
    }

    let code = sidecar.fail(
        "activities.update",
        json!({ "actor": admin("admin-1"), "activityId": activity, "template": { "v": 2 } }),
    );
    assert_eq!(code, "db_error");

    let stored = sidecar.ok(
        "activities.get",
        json!({ "activityId": activity }),
    );
    assert_eq!(stored["activity"]["template"], json!({ "v": 1 }));
    assert_eq!(load(&mut sidecar, record_id), before);
}

#[test]
fn only_admins_edit_activities() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let activity = create_activity(&mut sidecar, &school.id, json!({}));

    let code = sidecar.fail(
        "activities.update",
        json!({ "actor": teacher(&school.teacher), "activityId": activity, "name": "Mine now" }),
    );
    assert_eq!(code, "permission_denied");

    let code = sidecar.fail(
        "activities.create",
        json!({ "actor": student(&school.junior[0]), "schoolId": school.id, "name": "Self-assigned" }),
    );
    assert_eq!(code, "permission_denied");

    let code = sidecar.fail(
        "activities.update",
        json!({ "actor": admin("admin-1"), "activityId": activity, "targetAmount": -1 }),
    );
    assert_eq!(code, "invalid_argument");
}

#[test]
fn deleting_an_activity_removes_its_records() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let activity = create_activity(&mut sidecar, &school.id, json!({}));
    let record_id = approved_record(&mut sidecar, &school, activity, 1.0);

    let deleted = sidecar.ok(
        "activities.delete",
        json!({ "actor": admin("admin-1"), "activityId": activity }),
    );
    assert_eq!(i64_field(&deleted, "/recordsRemoved"), 1);

    let code = sidecar.fail(
        "records.get",
        json!({ "actor": admin("admin-1"), "recordId": record_id }),
    );
    assert_eq!(code, "not_found");

    let conn = rusqlite::Connection::open(db_path(workspace.path())).expect("open db");
    let orphans: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM record_status_history WHERE record_id = ?",
            [record_id],
            |r| r.get(0),
        )
        .expect("count history");
    assert_eq!(orphans, 0);
}

#[test]
fn reset_releases_the_teacher_binding() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let student_id = school.senior[0].clone();
    let activity = create_activity(
        &mut sidecar,
        &school.id,
        json!({ "updateProtocol": "RE_EVALUATE_ALL_RECORDS", "template": { "v": 1 } }),
    );
    let record_id = create_record(&mut sidecar, &student_id, activity, 1.0);
    sidecar.ok(
        "records.send",
        json!({ "actor": student(&student_id), "recordId": record_id, "teacherId": school.teacher }),
    );

    sidecar.ok(
        "activities.update",
        json!({ "actor": admin("admin-1"), "activityId": activity, "template": { "v": 2 } }),
    );
    let after = load(&mut sidecar, record_id);
    assert_eq!(str_field(&after, "/status"), "CREATED");
    assert!(after["teacherId"].is_null());
}

#[test]
fn reset_losing_a_version_race_conflicts_and_rolls_back() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let activity = create_activity(
        &mut sidecar,
        &school.id,
        json!({ "updateProtocol": "RE_EVALUATE_ALL_RECORDS", "template": { "v": 1 } }),
    );
    let record_id = approved_record(&mut sidecar, &school, activity, 1.0);
    let before = load(&mut sidecar, record_id);

    {
        let conn = rusqlite::Connection::open(db_path(workspace.path())).expect("open db");
        conn.execute_batch(
            "CREATE TRIGGER swallow_record_updates BEFORE UPDATE ON records
             BEGIN SELECT RAISE(IGNORE); END;",
        )
        .expect("create trigger");
    }

    let code = sidecar.fail(
        "activities.update",
        json!({ "actor": admin("admin-1"), "activityId": activity, "template": { "v": 2 } }),
    );
    assert_eq!(code, "conflict");

    let stored = sidecar.ok("activities.get", json!({ "activityId": activity }));
    assert_eq!(stored["activity"]["template"], json!({ "v": 1 }));
    assert_eq!(load(&mut sidecar, record_id), before);
}

#[test]
fn exclusive_students_must_exist_in_the_school() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = Sidecar::open(workspace.path());
    let school = seed_school(&mut sidecar);
    let other = seed_school(&mut sidecar);

    let code = sidecar.fail(
        "activities.create",
        json!({
            "actor": admin("admin-1"),
            "schoolId": school.id,
            "name": "Ghost hunt",
            "exclusiveStudents": ["ghost-student"],
        }),
    );
    assert_eq!(code, "not_found");

    let code = sidecar.fail(
        "activities.create",
        json!({
            "actor": admin("admin-1"),
            "schoolId": school.id,
            "name": "Exchange visit",
            "exclusiveStudents": [other.junior[0]],
        }),
    );
    assert_eq!(code, "invalid_argument");

    let activity = create_activity(&mut sidecar, &school.id, json!({}));
    let code = sidecar.fail(
        "activities.update",
        json!({ "actor": admin("admin-1"), "activityId": activity, "exclusiveStudents": ["ghost-student"] }),
    );
    assert_eq!(code, "not_found");
    let stored = sidecar.ok("activities.get", json!({ "activityId": activity }));
    assert_eq!(stored["activity"]["exclusiveStudents"], json!([]));
}
