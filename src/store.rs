//! Row-level persistence for activities and records.
//!
//! Every function takes a plain `&Connection` so callers decide the
//! transaction boundary; a `Transaction` derefs to `Connection`.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{EngineError, EngineResult};
use crate::model::{
    Activity, CompletionUnit, CoverageType, Record, RecordStatus, Scope, StatusEntry,
    UpdateProtocol,
};

const ACTIVITY_COLUMNS: &str = "id, school_id, name, template, coverage, required, active,
    deadline, unit, target_amount, update_protocol, semester, school_year, owner_id";

struct ActivityRow {
    id: i64,
    school_id: String,
    name: String,
    template: String,
    coverage: String,
    required: bool,
    active: bool,
    deadline: Option<String>,
    unit: String,
    target_amount: f64,
    update_protocol: String,
    semester: i64,
    school_year: i64,
    owner_id: String,
}

fn activity_row(row: &Row<'_>) -> rusqlite::Result<ActivityRow> {
    Ok(ActivityRow {
        id: row.get(0)?,
        school_id: row.get(1)?,
        name: row.get(2)?,
        template: row.get(3)?,
        coverage: row.get(4)?,
        required: row.get::<_, i64>(5)? != 0,
        active: row.get::<_, i64>(6)? != 0,
        deadline: row.get(7)?,
        unit: row.get(8)?,
        target_amount: row.get(9)?,
        update_protocol: row.get(10)?,
        semester: row.get(11)?,
        school_year: row.get(12)?,
        owner_id: row.get(13)?,
    })
}

fn hydrate_activity(conn: &Connection, raw: ActivityRow) -> EngineResult<Activity> {
    let template = serde_json::from_str(&raw.template).map_err(|e| {
        EngineError::dependency(
            "activity_template",
            format!("activity {} has a corrupt stored template: {e}", raw.id),
        )
    })?;
    Ok(Activity {
        id: raw.id,
        school_id: raw.school_id,
        name: raw.name,
        template,
        coverage: CoverageType::parse(&raw.coverage)?,
        exclusive_classrooms: load_exclusive_classrooms(conn, raw.id)?,
        exclusive_students: load_exclusive_students(conn, raw.id)?,
        required: raw.required,
        active: raw.active,
        deadline: raw.deadline,
        unit: CompletionUnit::parse(&raw.unit)?,
        target_amount: raw.target_amount,
        update_protocol: UpdateProtocol::parse(&raw.update_protocol)?,
        semester: raw.semester,
        school_year: raw.school_year,
        owner_id: raw.owner_id,
    })
}

fn load_exclusive_classrooms(conn: &Connection, activity_id: i64) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT classroom_label FROM activity_classrooms
         WHERE activity_id = ? ORDER BY classroom_label",
    )?;
    let labels = stmt
        .query_map([activity_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(labels)
}

fn load_exclusive_students(conn: &Connection, activity_id: i64) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT student_id FROM activity_students WHERE activity_id = ? ORDER BY student_id",
    )?;
    let ids = stmt
        .query_map([activity_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn load_activity(conn: &Connection, activity_id: i64) -> EngineResult<Activity> {
    let sql = format!("SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = ?");
    let raw = conn
        .query_row(&sql, [activity_id], activity_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("activity", activity_id))?;
    hydrate_activity(conn, raw)
}

/// Activities of one school in one scope, ascending by id.
pub fn list_activities(
    conn: &Connection,
    school_id: &str,
    scope: Scope,
) -> EngineResult<Vec<Activity>> {
    let sql = format!(
        "SELECT {ACTIVITY_COLUMNS} FROM activities
         WHERE school_id = ? AND semester = ? AND school_year = ?
         ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![school_id, scope.semester, scope.school_year], activity_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|raw| hydrate_activity(conn, raw))
        .collect()
}

pub fn insert_activity(conn: &Connection, activity: &Activity, now: &str) -> EngineResult<i64> {
    conn.execute(
        "INSERT INTO activities(
            school_id, name, template, coverage, required, active, deadline, unit,
            target_amount, update_protocol, semester, school_year, owner_id,
            created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            activity.school_id,
            activity.name,
            activity.template.to_string(),
            activity.coverage.as_str(),
            activity.required as i64,
            activity.active as i64,
            activity.deadline,
            activity.unit.as_str(),
            activity.target_amount,
            activity.update_protocol.as_str(),
            activity.semester,
            activity.school_year,
            activity.owner_id,
            now,
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();
    replace_exclusive_lists(conn, id, activity)?;
    Ok(id)
}

pub fn write_activity(conn: &Connection, activity: &Activity, now: &str) -> EngineResult<()> {
    let changed = conn.execute(
        "UPDATE activities SET
            name = ?, template = ?, coverage = ?, required = ?, active = ?, deadline = ?,
            unit = ?, target_amount = ?, update_protocol = ?, semester = ?, school_year = ?,
            updated_at = ?
         WHERE id = ?",
        params![
            activity.name,
            activity.template.to_string(),
            activity.coverage.as_str(),
            activity.required as i64,
            activity.active as i64,
            activity.deadline,
            activity.unit.as_str(),
            activity.target_amount,
            activity.update_protocol.as_str(),
            activity.semester,
            activity.school_year,
            now,
            activity.id,
        ],
    )?;
    if changed == 0 {
        return Err(EngineError::not_found("activity", activity.id));
    }
    replace_exclusive_lists(conn, activity.id, activity)
}

fn replace_exclusive_lists(conn: &Connection, activity_id: i64, activity: &Activity) -> EngineResult<()> {
    conn.execute(
        "DELETE FROM activity_classrooms WHERE activity_id = ?",
        [activity_id],
    )?;
    conn.execute(
        "DELETE FROM activity_students WHERE activity_id = ?",
        [activity_id],
    )?;
    for label in &activity.exclusive_classrooms {
        conn.execute(
            "INSERT OR IGNORE INTO activity_classrooms(activity_id, classroom_label) VALUES(?, ?)",
            params![activity_id, label],
        )?;
    }
    for student_id in &activity.exclusive_students {
        conn.execute(
            "INSERT OR IGNORE INTO activity_students(activity_id, student_id) VALUES(?, ?)",
            params![activity_id, student_id],
        )?;
    }
    Ok(())
}

/// Removes an activity and everything hanging off it, children first.
pub fn delete_activity(conn: &Connection, activity_id: i64) -> EngineResult<usize> {
    conn.execute(
        "DELETE FROM record_status_history
         WHERE record_id IN (SELECT id FROM records WHERE activity_id = ?)",
        [activity_id],
    )?;
    let records = conn.execute("DELETE FROM records WHERE activity_id = ?", [activity_id])?;
    conn.execute(
        "DELETE FROM activity_classrooms WHERE activity_id = ?",
        [activity_id],
    )?;
    conn.execute(
        "DELETE FROM activity_students WHERE activity_id = ?",
        [activity_id],
    )?;
    let removed = conn.execute("DELETE FROM activities WHERE id = ?", [activity_id])?;
    if removed == 0 {
        return Err(EngineError::not_found("activity", activity_id));
    }
    Ok(records)
}

const RECORD_COLUMNS: &str = "id, activity_id, student_id, teacher_id, semester, school_year,
    amount, data, advice, status, version";

struct RecordRow {
    id: i64,
    activity_id: i64,
    student_id: String,
    teacher_id: Option<String>,
    semester: i64,
    school_year: i64,
    amount: f64,
    data: String,
    advice: Option<String>,
    status: String,
    version: i64,
}

fn record_row(row: &Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        activity_id: row.get(1)?,
        student_id: row.get(2)?,
        teacher_id: row.get(3)?,
        semester: row.get(4)?,
        school_year: row.get(5)?,
        amount: row.get(6)?,
        data: row.get(7)?,
        advice: row.get(8)?,
        status: row.get(9)?,
        version: row.get(10)?,
    })
}

fn hydrate_record(conn: &Connection, raw: RecordRow) -> EngineResult<Record> {
    let data = serde_json::from_str(&raw.data).map_err(|e| {
        EngineError::dependency(
            "record_data",
            format!("record {} has corrupt stored data: {e}", raw.id),
        )
    })?;
    Ok(Record {
        id: raw.id,
        activity_id: raw.activity_id,
        student_id: raw.student_id,
        teacher_id: raw.teacher_id,
        semester: raw.semester,
        school_year: raw.school_year,
        amount: raw.amount,
        data,
        advice: raw.advice,
        status: RecordStatus::parse(&raw.status)?,
        version: raw.version,
        history: load_history(conn, raw.id)?,
    })
}

pub fn load_record(conn: &Connection, record_id: i64) -> EngineResult<Record> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?");
    let raw = conn
        .query_row(&sql, [record_id], record_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("record", record_id))?;
    hydrate_record(conn, raw)
}

pub fn load_history(conn: &Connection, record_id: i64) -> EngineResult<Vec<StatusEntry>> {
    let mut stmt = conn.prepare(
        "SELECT status, at FROM record_status_history WHERE record_id = ? ORDER BY seq",
    )?;
    let rows = stmt
        .query_map([record_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(status, at)| {
            Ok(StatusEntry {
                status: RecordStatus::parse(&status)?,
                at,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub activity_id: Option<i64>,
    pub student_id: Option<String>,
    pub status: Option<RecordStatus>,
}

pub fn list_records(conn: &Connection, query: &RecordQuery) -> EngineResult<Vec<Record>> {
    let mut sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE 1 = 1");
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(activity_id) = query.activity_id {
        sql.push_str(" AND activity_id = ?");
        binds.push(activity_id.into());
    }
    if let Some(student_id) = &query.student_id {
        sql.push_str(" AND student_id = ?");
        binds.push(student_id.clone().into());
    }
    if let Some(status) = query.status {
        sql.push_str(" AND status = ?");
        binds.push(status.as_str().to_string().into());
    }
    sql.push_str(" ORDER BY id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds), record_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|raw| hydrate_record(conn, raw))
        .collect()
}

pub struct NewRecord<'a> {
    pub activity_id: i64,
    pub student_id: &'a str,
    pub scope: Scope,
    pub amount: f64,
    pub data: &'a serde_json::Value,
}

pub fn insert_record(conn: &Connection, record: &NewRecord<'_>, now: &str) -> EngineResult<i64> {
    conn.execute(
        "INSERT INTO records(
            activity_id, student_id, teacher_id, semester, school_year, amount, data,
            advice, status, version, created_at, updated_at)
         VALUES(?, ?, NULL, ?, ?, ?, ?, NULL, ?, 1, ?, ?)",
        params![
            record.activity_id,
            record.student_id,
            record.scope.semester,
            record.scope.school_year,
            record.amount,
            record.data.to_string(),
            RecordStatus::Created.as_str(),
            now,
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();
    append_history(conn, id, RecordStatus::Created, now)?;
    Ok(id)
}

/// Appends one audit entry. Sequence numbers continue from the current maximum.
pub fn append_history(
    conn: &Connection,
    record_id: i64,
    status: RecordStatus,
    at: &str,
) -> EngineResult<i64> {
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM record_status_history WHERE record_id = ?",
        [record_id],
        |r| r.get(0),
    )?;
    conn.execute(
        "INSERT INTO record_status_history(record_id, seq, status, at) VALUES(?, ?, ?, ?)",
        params![record_id, next, status.as_str(), at],
    )?;
    Ok(next)
}

/// Compare-and-swap on `version`. Returns false when another writer got there first.
pub fn write_record_state(
    conn: &Connection,
    record: &Record,
    expected_version: i64,
    now: &str,
) -> EngineResult<bool> {
    let changed = conn.execute(
        "UPDATE records SET
            status = ?, teacher_id = ?, advice = ?, amount = ?, data = ?,
            version = version + 1, updated_at = ?
         WHERE id = ? AND version = ?",
        params![
            record.status.as_str(),
            record.teacher_id,
            record.advice,
            record.amount,
            record.data.to_string(),
            now,
            record.id,
            expected_version,
        ],
    )?;
    Ok(changed == 1)
}

pub fn delete_record(conn: &Connection, record_id: i64) -> EngineResult<()> {
    conn.execute(
        "DELETE FROM record_status_history WHERE record_id = ?",
        [record_id],
    )?;
    let removed = conn.execute("DELETE FROM records WHERE id = ?", [record_id])?;
    if removed == 0 {
        return Err(EngineError::not_found("record", record_id));
    }
    Ok(())
}

/// Ids of records bound to an activity inside one semester/year.
pub fn record_ids_in_scope(
    conn: &Connection,
    activity_id: i64,
    scope: Scope,
) -> EngineResult<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM records
         WHERE activity_id = ? AND semester = ? AND school_year = ?
         ORDER BY id",
    )?;
    let ids = stmt
        .query_map(
            params![activity_id, scope.semester, scope.school_year],
            |r| r.get::<_, i64>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Per-status amount totals of one student's records on one activity.
pub fn student_amounts_by_status(
    conn: &Connection,
    activity_id: i64,
    student_id: &str,
    scope: Scope,
) -> EngineResult<Vec<(RecordStatus, f64, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT status, COALESCE(SUM(amount), 0), COUNT(*) FROM records
         WHERE activity_id = ? AND student_id = ? AND semester = ? AND school_year = ?
         GROUP BY status",
    )?;
    let rows = stmt
        .query_map(
            params![activity_id, student_id, scope.semester, scope.school_year],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, f64>(1)?,
                    r.get::<_, i64>(2)?,
                ))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(status, amount, count)| Ok((RecordStatus::parse(&status)?, amount, count)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster;

    fn seeded() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let school = roster::create_school(&conn, "School", Scope::new(1, 2567)).unwrap();
        conn.execute(
            "INSERT INTO activities(school_id, name, template, coverage, required, active, unit,
                target_amount, update_protocol, semester, school_year, owner_id, created_at, updated_at)
             VALUES(?, 'Reading', '{}', 'ALL', 0, 1, 'TIMES', 1, 'IGNORE_PAST_RECORDS', 1, 2567,
                'admin', 't0', 't0')",
            [&school],
        )
        .unwrap();
        (conn, 1)
    }

    #[test]
    fn corrupt_template_is_a_storage_side_failure() {
        let (conn, activity_id) = seeded();
        conn.execute("UPDATE activities SET template = '{oops' WHERE id = ?", [activity_id])
            .unwrap();
        let err = load_activity(&conn, activity_id).unwrap_err();
        assert_eq!(err.code(), "dependency");
    }

    #[test]
    fn history_sequence_and_corrupt_record_data() {
        let (conn, activity_id) = seeded();
        conn.execute("PRAGMA foreign_keys = OFF", []).unwrap();
        let data = serde_json::json!({});
        let record_id = insert_record(
            &conn,
            &NewRecord {
                activity_id,
                student_id: "stu",
                scope: Scope::new(1, 2567),
                amount: 1.0,
                data: &data,
            },
            "t0",
        )
        .unwrap();
        assert_eq!(append_history(&conn, record_id, RecordStatus::Sended, "t1").unwrap(), 2);

        conn.execute("UPDATE records SET data = 'nope' WHERE id = ?", [record_id])
            .unwrap();
        assert_eq!(load_record(&conn, record_id).unwrap_err().code(), "dependency");
    }
}
