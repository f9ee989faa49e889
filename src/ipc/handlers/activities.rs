use crate::activities::{self, ActivityDraft, ActivityPatch};
use crate::coverage;
use crate::error::EngineError;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{
    actor, db_conn, optional_bool, optional_f64, optional_str, optional_str_list, required_i64,
    required_str, scope,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Actor, CompletionUnit, CoverageType, Role, UpdateProtocol};
use crate::roster::SqliteRoster;
use serde_json::json;

type HandlerResult = Result<serde_json::Value, serde_json::Value>;

fn parse_enum<T>(
    req: &Request,
    key: &str,
    parse: fn(&str) -> Result<T, EngineError>,
) -> Result<Option<T>, serde_json::Value> {
    match optional_str(req, key)? {
        Some(raw) => parse(&raw).map(Some).map_err(|e| engine_err(&req.id, e)),
        None => Ok(None),
    }
}

fn template_param(req: &Request) -> Option<serde_json::Value> {
    req.params.get("template").cloned()
}

fn to_json<T: serde::Serialize>(req: &Request, value: &T) -> Result<serde_json::Value, serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| err(&req.id, "serialize_failed", e.to_string(), None))
}

/// Students may only look at themselves.
pub(super) fn ensure_self_or_staff(
    req: &Request,
    actor: &Actor,
    student_id: &str,
    operation: &'static str,
) -> Result<(), serde_json::Value> {
    if actor.role == Role::Student && actor.user_id != student_id {
        return Err(engine_err(
            &req.id,
            EngineError::permission_denied(operation, "students to query only themselves"),
        ));
    }
    Ok(())
}

fn handle_activities_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let actor = actor(req)?;
    let draft = ActivityDraft {
        school_id: required_str(req, "schoolId")?,
        name: required_str(req, "name")?,
        template: template_param(req).unwrap_or_else(|| json!({})),
        coverage: parse_enum(req, "coverage", CoverageType::parse)?.unwrap_or(CoverageType::All),
        exclusive_classrooms: optional_str_list(req, "exclusiveClassrooms")?.unwrap_or_default(),
        exclusive_students: optional_str_list(req, "exclusiveStudents")?.unwrap_or_default(),
        required: optional_bool(req, "required")?.unwrap_or(false),
        active: optional_bool(req, "active")?.unwrap_or(true),
        deadline: optional_str(req, "deadline")?,
        unit: parse_enum(req, "unit", CompletionUnit::parse)?.unwrap_or(CompletionUnit::Times),
        target_amount: optional_f64(req, "targetAmount")?.unwrap_or(0.0),
        update_protocol: parse_enum(req, "updateProtocol", UpdateProtocol::parse)?
            .unwrap_or(UpdateProtocol::IgnorePastRecords),
        scope: scope(req)?,
    };
    let activity =
        activities::create_activity(conn, &actor, draft).map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, json!({ "activity": to_json(req, &activity)? })))
}

fn handle_activities_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let activity_id = required_i64(req, "activityId")?;
    let activity =
        crate::store::load_activity(conn, activity_id).map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, json!({ "activity": to_json(req, &activity)? })))
}

fn handle_activities_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let school_id = required_str(req, "schoolId")?;
    let scope = scope(req)?;
    let list = activities::list_activities(conn, &school_id, scope)
        .map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, json!({ "activities": to_json(req, &list)? })))
}

fn handle_activities_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let actor = actor(req)?;
    let activity_id = required_i64(req, "activityId")?;
    let patch = ActivityPatch {
        name: optional_str(req, "name")?,
        template: template_param(req),
        coverage: parse_enum(req, "coverage", CoverageType::parse)?,
        exclusive_classrooms: optional_str_list(req, "exclusiveClassrooms")?,
        exclusive_students: optional_str_list(req, "exclusiveStudents")?,
        required: optional_bool(req, "required")?,
        active: optional_bool(req, "active")?,
        deadline: if req.params.get("deadline").is_some() {
            Some(optional_str(req, "deadline")?)
        } else {
            None
        },
        unit: parse_enum(req, "unit", CompletionUnit::parse)?,
        target_amount: optional_f64(req, "targetAmount")?,
        update_protocol: parse_enum(req, "updateProtocol", UpdateProtocol::parse)?,
    };
    let update = activities::update_activity(conn, &actor, activity_id, patch)
        .map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, to_json(req, &update)?))
}

fn handle_activities_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let actor = actor(req)?;
    let activity_id = required_i64(req, "activityId")?;
    let records_removed = activities::delete_activity(conn, &actor, activity_id)
        .map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(
        &req.id,
        json!({ "activityId": activity_id, "recordsRemoved": records_removed }),
    ))
}

fn handle_activities_assigned(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let actor = actor(req)?;
    let student_id = required_str(req, "studentId")?;
    let school_id = required_str(req, "schoolId")?;
    ensure_self_or_staff(req, &actor, &student_id, "activities.assigned")?;
    let scope = scope(req)?;
    let roster = SqliteRoster::new(conn);
    let assigned =
        coverage::resolve_assigned_activities(conn, &roster, &student_id, &school_id, scope)
            .map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, json!({ "activities": to_json(req, &assigned)? })))
}

fn handle_activities_assignees(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let actor = actor(req)?;
    if actor.role == Role::Student {
        return Err(engine_err(
            &req.id,
            EngineError::permission_denied("activities.assignees", "a teacher or an administrator"),
        ));
    }
    let activity_id = required_i64(req, "activityId")?;
    let activity =
        crate::store::load_activity(conn, activity_id).map_err(|e| engine_err(&req.id, e))?;
    let roster = SqliteRoster::new(conn);
    let students =
        coverage::activity_assignees(&roster, &activity).map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(
        &req.id,
        json!({ "activityId": activity_id, "studentIds": students }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "activities.create" => handle_activities_create(state, req),
        "activities.get" => handle_activities_get(state, req),
        "activities.list" => handle_activities_list(state, req),
        "activities.update" => handle_activities_update(state, req),
        "activities.delete" => handle_activities_delete(state, req),
        "activities.assigned" => handle_activities_assigned(state, req),
        "activities.assignees" => handle_activities_assignees(state, req),
        _ => return None,
    };
    Some(result.unwrap_or_else(|e| e))
}
