use crate::error::EngineError;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{actor, db_conn, optional_f64, optional_i64, optional_str, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{Record, RecordStatus};
use crate::records;
use crate::store::RecordQuery;
use crate::workflow;
use serde_json::json;

type HandlerResult = Result<serde_json::Value, serde_json::Value>;

fn record_json(req: &Request, record: &Record) -> HandlerResult {
    serde_json::to_value(record)
        .map(|v| json!({ "record": v }))
        .map_err(|e| err(&req.id, "serialize_failed", e.to_string(), None))
}

fn handle_records_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let actor = actor(req)?;
    let activity_id = required_i64(req, "activityId")?;
    let amount = optional_f64(req, "amount")?.unwrap_or(1.0);
    let data = req.params.get("data").cloned().unwrap_or_else(|| json!({}));
    let record = records::create_record(conn, &actor, activity_id, amount, data)
        .map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, record_json(req, &record)?))
}

fn handle_records_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let actor = actor(req)?;
    let record_id = required_i64(req, "recordId")?;
    let record =
        records::get_record(conn, &actor, record_id).map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, record_json(req, &record)?))
}

fn handle_records_history(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let actor = actor(req)?;
    let record_id = required_i64(req, "recordId")?;
    let record =
        records::get_record(conn, &actor, record_id).map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(
        &req.id,
        json!({
            "recordId": record.id,
            "status": record.status.as_str(),
            "history": serde_json::to_value(&record.history)
                .map_err(|e| err(&req.id, "serialize_failed", e.to_string(), None))?,
        }),
    ))
}

fn handle_records_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let actor = actor(req)?;
    let record_id = required_i64(req, "recordId")?;
    let amount = optional_f64(req, "amount")?;
    let data = req.params.get("data").cloned();
    let record = records::update_record(conn, &actor, record_id, amount, data)
        .map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, record_json(req, &record)?))
}

fn handle_records_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let actor = actor(req)?;
    let record_id = required_i64(req, "recordId")?;
    records::delete_record(conn, &actor, record_id).map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, json!({ "recordId": record_id, "deleted": true })))
}

fn handle_records_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let actor = actor(req)?;
    let status = match optional_str(req, "status")? {
        Some(raw) => Some(RecordStatus::parse(&raw).map_err(|e| engine_err(&req.id, e))?),
        None => None,
    };
    let query = RecordQuery {
        activity_id: optional_i64(req, "activityId")?,
        student_id: optional_str(req, "studentId")?,
        status,
    };
    let list = records::list_records(conn, &actor, query).map_err(|e| engine_err(&req.id, e))?;
    let list = serde_json::to_value(&list)
        .map_err(|e| err(&req.id, "serialize_failed", e.to_string(), None))?;
    Ok(ok(&req.id, json!({ "records": list })))
}

fn handle_transition(state: &mut AppState, req: &Request, event: &str) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let actor = actor(req)?;
    let record_id = required_i64(req, "recordId")?;
    let result = match event {
        "send" => {
            let teacher_id = required_str(req, "teacherId")?;
            workflow::send(conn, &actor, record_id, &teacher_id)
        }
        "unsend" => workflow::unsend(conn, &actor, record_id),
        "approve" => workflow::approve(conn, &actor, record_id, optional_str(req, "advice")?),
        "reject" => workflow::reject(conn, &actor, record_id, optional_str(req, "advice")?),
        other => Err(EngineError::invalid_argument(format!("unknown event {other}"))),
    };
    let record = result.map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, record_json(req, &record)?))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "records.create" => handle_records_create(state, req),
        "records.get" => handle_records_get(state, req),
        "records.history" => handle_records_history(state, req),
        "records.update" => handle_records_update(state, req),
        "records.delete" => handle_records_delete(state, req),
        "records.list" => handle_records_list(state, req),
        "records.send" => handle_transition(state, req, "send"),
        "records.unsend" => handle_transition(state, req, "unsend"),
        "records.approve" => handle_transition(state, req, "approve"),
        "records.reject" => handle_transition(state, req, "reject"),
        _ => return None,
    };
    Some(result.unwrap_or_else(|e| e))
}

