//! Record approval state machine.
//!
//! ```text
//! CREATED --send--> SENDED --approve--> APPROVED
//!    ^                |   \
//!    +-----unsend-----+    --reject---> REJECTED
//! ```
//!
//! `Guard` decides who may fire an event; `transition` decides whether the
//! current state allows it. The two are checked independently so either can
//! be tested without the other. Every accepted event appends one entry to the
//! record's status history.

use rusqlite::Connection;

use crate::error::{EngineError, EngineResult};
use crate::model::{now_rfc3339, Actor, Record, RecordStatus, Role, StatusEntry};
use crate::roster::{RosterLookup, SqliteRoster};
use crate::store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Send { teacher_id: String },
    Unsend,
    Approve { advice: Option<String> },
    Reject { advice: Option<String> },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Send { .. } => "send",
            Event::Unsend => "unsend",
            Event::Approve { .. } => "approve",
            Event::Reject { .. } => "reject",
        }
    }
}

/// Actor role crossed with the relationship the actor must hold to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    OwningStudent,
    OwningStudentOrAdmin,
    AssignedTeacherOrAdmin,
}

impl Guard {
    pub fn for_event(event: &Event) -> Guard {
        match event {
            Event::Send { .. } => Guard::OwningStudent,
            Event::Unsend => Guard::OwningStudentOrAdmin,
            Event::Approve { .. } | Event::Reject { .. } => Guard::AssignedTeacherOrAdmin,
        }
    }

    pub fn permits(self, actor: &Actor, record: &Record) -> bool {
        let owning_student = actor.role == Role::Student && record.is_owned_by(&actor.user_id);
        match self {
            Guard::OwningStudent => owning_student,
            Guard::OwningStudentOrAdmin => owning_student || actor.is_admin(),
            Guard::AssignedTeacherOrAdmin => {
                (actor.role == Role::Teacher && record.is_assigned_to(&actor.user_id))
                    || actor.is_admin()
            }
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Guard::OwningStudent => "the owning student",
            Guard::OwningStudentOrAdmin => "the owning student or an administrator",
            Guard::AssignedTeacherOrAdmin => "the assigned teacher or an administrator",
        }
    }
}

/// Target state for `event` fired from `from`, or `InvalidTransition`.
pub fn transition(record_id: i64, from: RecordStatus, event: &Event) -> EngineResult<RecordStatus> {
    let to = match (from, event) {
        (RecordStatus::Created, Event::Send { .. }) => RecordStatus::Sended,
        (RecordStatus::Sended, Event::Unsend) => RecordStatus::Created,
        (RecordStatus::Sended, Event::Approve { .. }) => RecordStatus::Approved,
        (RecordStatus::Sended, Event::Reject { .. }) => RecordStatus::Rejected,
        _ => {
            return Err(EngineError::InvalidTransition {
                record_id,
                current: from,
                event: event.name(),
            })
        }
    };
    Ok(to)
}

/// Applies `event` in memory. On error `record` is untouched.
pub fn apply(record: &mut Record, actor: &Actor, event: &Event, at: &str) -> EngineResult<()> {
    let to = transition(record.id, record.status, event)?;
    let guard = Guard::for_event(event);
    if !guard.permits(actor, record) {
        return Err(EngineError::permission_denied(event.name(), guard.describe()));
    }

    match event {
        Event::Send { teacher_id } => record.teacher_id = Some(teacher_id.clone()),
        Event::Unsend => record.teacher_id = None,
        Event::Approve { advice } | Event::Reject { advice } => {
            if advice.is_some() {
                record.advice = advice.clone();
            }
        }
    }
    push_status(record, to, at);
    Ok(())
}

/// Administrative reset back to CREATED. Skips guards but keeps the audit entry.
/// The teacher binding is released as `unsend` would; advice stays for the student.
pub fn reset(record: &mut Record, at: &str) {
    record.teacher_id = None;
    push_status(record, RecordStatus::Created, at);
}

fn push_status(record: &mut Record, status: RecordStatus, at: &str) {
    record.status = status;
    record.history.push(StatusEntry {
        status,
        at: at.to_string(),
    });
}

pub fn send(conn: &Connection, actor: &Actor, record_id: i64, teacher_id: &str) -> EngineResult<Record> {
    let teacher_id = teacher_id.trim();
    if teacher_id.is_empty() {
        return Err(EngineError::invalid_argument("send requires a teacher id"));
    }
    fire(
        conn,
        actor,
        record_id,
        Event::Send {
            teacher_id: teacher_id.to_string(),
        },
    )
}

pub fn unsend(conn: &Connection, actor: &Actor, record_id: i64) -> EngineResult<Record> {
    fire(conn, actor, record_id, Event::Unsend)
}

pub fn approve(
    conn: &Connection,
    actor: &Actor,
    record_id: i64,
    advice: Option<String>,
) -> EngineResult<Record> {
    fire(conn, actor, record_id, Event::Approve { advice })
}

pub fn reject(
    conn: &Connection,
    actor: &Actor,
    record_id: i64,
    advice: Option<String>,
) -> EngineResult<Record> {
    fire(conn, actor, record_id, Event::Reject { advice })
}

/// Attempts per transition before a lost compare-and-swap becomes `Conflict`.
const MAX_ATTEMPTS: u32 = 2;

/// Calls `attempt` until it returns `Some`, at most `MAX_ATTEMPTS` times.
/// `None` means the attempt lost its compare-and-swap and rolled back.
fn retry_lost_cas<T>(
    record_id: i64,
    mut attempt: impl FnMut(u32) -> EngineResult<Option<T>>,
) -> EngineResult<T> {
    for n in 1..=MAX_ATTEMPTS {
        if let Some(done) = attempt(n)? {
            return Ok(done);
        }
    }
    Err(EngineError::Conflict {
        entity: "record",
        id: record_id.to_string(),
    })
}

/// Runs one transition as a unit of work, re-reading the record inside the
/// transaction. A lost compare-and-swap is retried once from a fresh read.
fn fire(conn: &Connection, actor: &Actor, record_id: i64, event: Event) -> EngineResult<Record> {
    let record = retry_lost_cas(record_id, |attempt| {
        let tx = conn.unchecked_transaction()?;
        let mut record = store::load_record(&tx, record_id)?;

        let expected_version = record.version;
        let from = record.status;
        let now = now_rfc3339();
        apply(&mut record, actor, &event, &now)?;

        // Only an allowed, permitted send gets to learn whether the teacher exists.
        if let Event::Send { teacher_id } = &event {
            ensure_teacher_of_student(&tx, teacher_id, &record.student_id)?;
        }

        if !store::write_record_state(&tx, &record, expected_version, &now)? {
            drop(tx);
            tracing::warn!(record_id, attempt, event = event.name(), "record changed underneath transition");
            return Ok(None);
        }
        store::append_history(&tx, record.id, record.status, &now)?;
        tx.commit()?;

        record.version = expected_version + 1;
        tracing::info!(
            record_id,
            event = event.name(),
            from = from.as_str(),
            to = record.status.as_str(),
            actor = %actor.user_id,
            role = actor.role.as_str(),
            "record transition"
        );
        Ok(Some(record))
    })?;
    Ok(record)
}

fn ensure_teacher_of_student(conn: &Connection, teacher_id: &str, student_id: &str) -> EngineResult<()> {
    let roster = SqliteRoster::new(conn);
    let teacher_school = roster
        .teacher_school(teacher_id)?
        .ok_or_else(|| EngineError::not_found("teacher", teacher_id))?;
    if teacher_school != roster.student_school(student_id)? {
        return Err(EngineError::invalid_argument(format!(
            "teacher {teacher_id} does not belong to the student's school"
        )));
    }
    Ok(())
}
