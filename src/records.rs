//! Record lifecycle outside the status workflow: creation, edits while
//! still CREATED, deletion and reads.

use rusqlite::Connection;

use crate::coverage;
use crate::error::{EngineError, EngineResult};
use crate::model::{now_rfc3339, Actor, CompletionUnit, Record, RecordStatus, Role};
use crate::roster::{RosterLookup, SqliteRoster};
use crate::store::{self, NewRecord, RecordQuery};

fn validate_amount(amount: f64, unit: CompletionUnit) -> EngineResult<f64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(EngineError::invalid_argument(format!(
            "amount must be a positive number, got {amount}"
        )));
    }
    if unit == CompletionUnit::Times && amount.fract() != 0.0 {
        return Err(EngineError::invalid_argument(format!(
            "amount for a TIMES activity must be a whole number, got {amount}"
        )));
    }
    Ok(amount)
}

fn deadline_passed(deadline: Option<&str>) -> EngineResult<bool> {
    let Some(raw) = deadline else {
        return Ok(false);
    };
    let deadline = chrono::DateTime::parse_from_rfc3339(raw)
        .map_err(|e| EngineError::invalid_argument(format!("stored deadline {raw:?}: {e}")))?;
    Ok(chrono::Utc::now() > deadline)
}

pub fn create_record(
    conn: &Connection,
    actor: &Actor,
    activity_id: i64,
    amount: f64,
    data: serde_json::Value,
) -> EngineResult<Record> {
    if actor.role != Role::Student {
        return Err(EngineError::permission_denied("records.create", "a student"));
    }

    let tx = conn.unchecked_transaction()?;
    let activity = store::load_activity(&tx, activity_id)?;
    if !activity.active {
        return Err(EngineError::invalid_argument(format!(
            "activity {activity_id} is not active"
        )));
    }
    if deadline_passed(activity.deadline.as_deref())? {
        return Err(EngineError::invalid_argument(format!(
            "deadline of activity {activity_id} has passed"
        )));
    }
    let roster = SqliteRoster::new(&tx);
    if !coverage::is_assigned(&roster, &activity, &actor.user_id)? {
        return Err(EngineError::permission_denied(
            "records.create",
            format!("activity {activity_id} to be assigned to the student"),
        ));
    }
    let amount = validate_amount(amount, activity.unit)?;

    let record_id = store::insert_record(
        &tx,
        &NewRecord {
            activity_id,
            student_id: &actor.user_id,
            scope: activity.scope(),
            amount,
            data: &data,
        },
        &now_rfc3339(),
    )?;
    let record = store::load_record(&tx, record_id)?;
    tx.commit()?;

    tracing::info!(record_id, activity_id, student_id = %actor.user_id, "record created");
    Ok(record)
}

/// Edits amount and data. Only the owner, and only while CREATED; no history entry.
pub fn update_record(
    conn: &Connection,
    actor: &Actor,
    record_id: i64,
    amount: Option<f64>,
    data: Option<serde_json::Value>,
) -> EngineResult<Record> {
    let tx = conn.unchecked_transaction()?;
    let mut record = store::load_record(&tx, record_id)?;
    if !(actor.role == Role::Student && record.is_owned_by(&actor.user_id)) {
        return Err(EngineError::permission_denied("records.update", "the owning student"));
    }
    if record.status != RecordStatus::Created {
        return Err(EngineError::InvalidTransition {
            record_id,
            current: record.status,
            event: "update",
        });
    }
    let activity = store::load_activity(&tx, record.activity_id)?;
    if let Some(amount) = amount {
        record.amount = validate_amount(amount, activity.unit)?;
    }
    if let Some(data) = data {
        record.data = data;
    }

    let expected_version = record.version;
    if !store::write_record_state(&tx, &record, expected_version, &now_rfc3339())? {
        return Err(EngineError::Conflict {
            entity: "record",
            id: record_id.to_string(),
        });
    }
    tx.commit()?;
    record.version = expected_version + 1;
    Ok(record)
}

/// Hard delete. Owners may delete while CREATED; administrators at any time.
pub fn delete_record(conn: &Connection, actor: &Actor, record_id: i64) -> EngineResult<()> {
    let tx = conn.unchecked_transaction()?;
    let record = store::load_record(&tx, record_id)?;
    let owner = actor.role == Role::Student && record.is_owned_by(&actor.user_id);
    if !owner && !actor.is_admin() {
        return Err(EngineError::permission_denied(
            "records.delete",
            "the owning student or an administrator",
        ));
    }
    if owner && record.status != RecordStatus::Created {
        return Err(EngineError::InvalidTransition {
            record_id,
            current: record.status,
            event: "delete",
        });
    }
    store::delete_record(&tx, record_id)?;
    tx.commit()?;
    tracing::info!(record_id, actor = %actor.user_id, "record deleted");
    Ok(())
}

/// Owner, any teacher of the student's school, or an administrator.
pub fn get_record(conn: &Connection, actor: &Actor, record_id: i64) -> EngineResult<Record> {
    let record = store::load_record(conn, record_id)?;
    ensure_can_read(conn, actor, &record.student_id)?;
    Ok(record)
}

pub fn list_records(conn: &Connection, actor: &Actor, query: RecordQuery) -> EngineResult<Vec<Record>> {
    match actor.role {
        Role::Admin => {
            if query.activity_id.is_none() && query.student_id.is_none() {
                return Err(EngineError::invalid_argument(
                    "records.list needs an activityId or a studentId",
                ));
            }
        }
        Role::Student => {
            if query.student_id.as_deref() != Some(actor.user_id.as_str()) {
                return Err(EngineError::permission_denied(
                    "records.list",
                    "students to list only their own records",
                ));
            }
        }
        Role::Teacher => {
            let roster = SqliteRoster::new(conn);
            let teacher_school = roster
                .teacher_school(&actor.user_id)?
                .ok_or_else(|| EngineError::not_found("teacher", &actor.user_id))?;
            let target_school = match (&query.student_id, query.activity_id) {
                (Some(student_id), _) => roster.student_school(student_id)?,
                (None, Some(activity_id)) => store::load_activity(conn, activity_id)?.school_id,
                (None, None) => {
                    return Err(EngineError::invalid_argument(
                        "records.list needs an activityId or a studentId",
                    ))
                }
            };
            if teacher_school != target_school {
                return Err(EngineError::permission_denied(
                    "records.list",
                    "a teacher of the same school",
                ));
            }
        }
    }
    store::list_records(conn, &query)
}

fn ensure_can_read(conn: &Connection, actor: &Actor, student_id: &str) -> EngineResult<()> {
    let allowed = match actor.role {
        Role::Admin => true,
        Role::Student => actor.user_id == student_id,
        Role::Teacher => {
            let roster = SqliteRoster::new(conn);
            match roster.teacher_school(&actor.user_id)? {
                Some(school) => school == roster.student_school(student_id)?,
                None => false,
            }
        }
    };
    if !allowed {
        return Err(EngineError::permission_denied(
            "records.get",
            "the owning student, a teacher of the school, or an administrator",
        ));
    }
    Ok(())
}
