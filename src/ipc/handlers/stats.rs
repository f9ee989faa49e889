use crate::error::EngineError;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::handlers::activities::ensure_self_or_staff;
use crate::ipc::helpers::{actor, db_conn, optional_str, required_i64_list, required_str, scope};
use crate::ipc::types::{AppState, Request};
use crate::model::Role;
use crate::roster::SqliteRoster;
use crate::stats;

type HandlerResult = Result<serde_json::Value, serde_json::Value>;

fn to_json<T: serde::Serialize>(req: &Request, value: &T) -> HandlerResult {
    serde_json::to_value(value)
        .map_err(|e| err(&req.id, "serialize_failed", e.to_string(), None))
}

fn handle_stats_student(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let actor = actor(req)?;
    let student_id = required_str(req, "studentId")?;
    let school_id = required_str(req, "schoolId")?;
    ensure_self_or_staff(req, &actor, &student_id, "stats.student")?;
    let filter = required_i64_list(req, "activityIds")?;
    let scope = scope(req)?;
    let roster = SqliteRoster::new(conn);
    let completion =
        stats::compute_completion(conn, &roster, &student_id, &school_id, &filter, scope)
            .map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, to_json(req, &completion)?))
}

fn handle_stats_school(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let actor = actor(req)?;
    if actor.role == Role::Student {
        return Err(engine_err(
            &req.id,
            EngineError::permission_denied("stats.school", "a teacher or an administrator"),
        ));
    }
    let school_id = required_str(req, "schoolId")?;
    let filter = required_i64_list(req, "activityIds")?;
    let classroom = optional_str(req, "classroom")?;
    let scope = scope(req)?;
    let roster = SqliteRoster::new(conn);
    let rollup = stats::compute_school_completion(
        conn,
        &roster,
        &school_id,
        &filter,
        scope,
        classroom.as_deref(),
    )
    .map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, to_json(req, &rollup)?))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "stats.student" => handle_stats_student(state, req),
        "stats.school" => handle_stats_school(state, req),
        _ => return None,
    };
    Some(result.unwrap_or_else(|e| e))
}
