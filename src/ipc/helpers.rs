use rusqlite::Connection;

use crate::ipc::error::{engine_err, err};
use crate::ipc::types::{AppState, Request};
use crate::model::{Actor, Role, Scope};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be a string", key), None)),
    }
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing integer {}", key), None))
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be an integer", key), None)),
    }
}

pub fn optional_f64(req: &Request, key: &str) -> Result<Option<f64>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be a number", key), None)),
    }
}

pub fn optional_bool(req: &Request, key: &str) -> Result<Option<bool>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be a boolean", key), None)),
    }
}

pub fn optional_str_list(req: &Request, key: &str) -> Result<Option<Vec<String>>, serde_json::Value> {
    let Some(raw) = req.params.get(key) else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Some(items) = raw.as_array() else {
        return Err(err(&req.id, "bad_params", format!("{} must be an array", key), None));
    };
    let mut out = Vec::with_capacity(items.len());
    for v in items {
        let Some(s) = v.as_str() else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} must contain only strings", key),
                None,
            ));
        };
        out.push(s.to_string());
    }
    Ok(Some(out))
}

pub fn required_i64_list(req: &Request, key: &str) -> Result<Vec<i64>, serde_json::Value> {
    let Some(items) = req.params.get(key).and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", format!("missing {}", key), None));
    };
    items
        .iter()
        .map(|v| {
            v.as_i64().ok_or_else(|| {
                err(
                    &req.id,
                    "bad_params",
                    format!("{} must contain only integers", key),
                    None,
                )
            })
        })
        .collect()
}

/// `params.actor = { userId, role }`.
pub fn actor(req: &Request) -> Result<Actor, serde_json::Value> {
    let Some(raw) = req.params.get("actor").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "missing actor", None));
    };
    let user_id = raw
        .get("userId")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", "missing actor.userId", None))?;
    let role = raw
        .get("role")
        .and_then(|v| v.as_str())
        .ok_or_else(|| err(&req.id, "bad_params", "missing actor.role", None))?;
    let role = Role::parse(role).map_err(|e| engine_err(&req.id, e))?;
    Ok(Actor::new(user_id, role))
}

/// `semester` / `schoolYear`, both defaulting to 0 (the school's active values).
pub fn scope(req: &Request) -> Result<Scope, serde_json::Value> {
    let semester = optional_i64(req, "semester")?.unwrap_or(0);
    let school_year = optional_i64(req, "schoolYear")?.unwrap_or(0);
    Scope::new(semester, school_year)
        .validate()
        .map_err(|e| engine_err(&req.id, e))
}
