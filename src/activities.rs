use rusqlite::Connection;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::model::{
    now_rfc3339, Activity, Actor, CompletionUnit, CoverageType, Scope, UpdateProtocol,
};
use crate::reevaluate;
use crate::roster::{resolve_scope, RosterLookup, SqliteRoster};
use crate::store;

#[derive(Debug, Clone)]
pub struct ActivityDraft {
    pub school_id: String,
    pub name: String,
    pub template: serde_json::Value,
    pub coverage: CoverageType,
    pub exclusive_classrooms: Vec<String>,
    pub exclusive_students: Vec<String>,
    pub required: bool,
    pub active: bool,
    pub deadline: Option<String>,
    pub unit: CompletionUnit,
    pub target_amount: f64,
    pub update_protocol: UpdateProtocol,
    pub scope: Scope,
}

/// Field-level patch. `None` leaves the field as is; `deadline: Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct ActivityPatch {
    pub name: Option<String>,
    pub template: Option<serde_json::Value>,
    pub coverage: Option<CoverageType>,
    pub exclusive_classrooms: Option<Vec<String>>,
    pub exclusive_students: Option<Vec<String>>,
    pub required: Option<bool>,
    pub active: Option<bool>,
    pub deadline: Option<Option<String>>,
    pub unit: Option<CompletionUnit>,
    pub target_amount: Option<f64>,
    pub update_protocol: Option<UpdateProtocol>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityUpdate {
    pub activity: Activity,
    pub records_reset: usize,
}

fn require_admin(actor: &Actor, operation: &'static str) -> EngineResult<()> {
    if !actor.is_admin() {
        return Err(EngineError::permission_denied(operation, "an administrator"));
    }
    Ok(())
}

fn validate_name(name: &str) -> EngineResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::invalid_argument("activity name must not be empty"));
    }
    Ok(name.to_string())
}

fn validate_target(target: f64) -> EngineResult<f64> {
    if !target.is_finite() || target < 0.0 {
        return Err(EngineError::invalid_argument(format!(
            "target amount must be a non-negative number, got {target}"
        )));
    }
    Ok(target)
}

fn validate_deadline(deadline: Option<String>) -> EngineResult<Option<String>> {
    let Some(raw) = deadline else {
        return Ok(None);
    };
    let raw = raw.trim().to_string();
    if raw.is_empty() {
        return Ok(None);
    }
    chrono::DateTime::parse_from_rfc3339(&raw)
        .map_err(|e| EngineError::invalid_argument(format!("deadline {raw:?}: {e}")))?;
    Ok(Some(raw))
}

fn dedup_ids(raw: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = raw
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Every explicitly listed student must exist and belong to the activity's school.
fn check_exclusive_students<R: RosterLookup>(
    roster: &R,
    school_id: &str,
    student_ids: &[String],
) -> EngineResult<()> {
    for student_id in student_ids {
        if roster.student_school(student_id)? != school_id {
            return Err(EngineError::invalid_argument(format!(
                "student {student_id} does not belong to school {school_id}"
            )));
        }
    }
    Ok(())
}

pub fn create_activity(conn: &Connection, actor: &Actor, draft: ActivityDraft) -> EngineResult<Activity> {
    require_admin(actor, "activities.create")?;
    let roster = SqliteRoster::new(conn);
    if !roster.school_exists(&draft.school_id)? {
        return Err(EngineError::not_found("school", &draft.school_id));
    }
    let scope = resolve_scope(&roster, &draft.school_id, draft.scope)?;

    let mut activity = Activity {
        id: 0,
        school_id: draft.school_id,
        name: validate_name(&draft.name)?,
        template: draft.template,
        coverage: draft.coverage,
        exclusive_classrooms: dedup_ids(draft.exclusive_classrooms),
        exclusive_students: dedup_ids(draft.exclusive_students),
        required: draft.required,
        active: draft.active,
        deadline: validate_deadline(draft.deadline)?,
        unit: draft.unit,
        target_amount: validate_target(draft.target_amount)?,
        update_protocol: draft.update_protocol,
        semester: scope.semester,
        school_year: scope.school_year,
        owner_id: actor.user_id.clone(),
    };
    check_exclusive_students(&roster, &activity.school_id, &activity.exclusive_students)?;

    let tx = conn.unchecked_transaction()?;
    activity.id = store::insert_activity(&tx, &activity, &now_rfc3339())?;
    tx.commit()?;

    tracing::info!(
        activity_id = activity.id,
        school_id = %activity.school_id,
        coverage = activity.coverage.as_str(),
        "activity created"
    );
    Ok(activity)
}

/// Applies `patch` and, in the same transaction, re-evaluates dependent
/// records when the template changed. Either both land or neither does.
pub fn update_activity(
    conn: &Connection,
    actor: &Actor,
    activity_id: i64,
    patch: ActivityPatch,
) -> EngineResult<ActivityUpdate> {
    require_admin(actor, "activities.update")?;

    let tx = conn.unchecked_transaction()?;
    let mut activity = store::load_activity(&tx, activity_id)?;
    let previous_template = activity.template.clone();

    if let Some(name) = patch.name {
        activity.name = validate_name(&name)?;
    }
    if let Some(template) = patch.template {
        activity.template = template;
    }
    if let Some(coverage) = patch.coverage {
        activity.coverage = coverage;
    }
    if let Some(labels) = patch.exclusive_classrooms {
        activity.exclusive_classrooms = dedup_ids(labels);
    }
    if let Some(ids) = patch.exclusive_students {
        let ids = dedup_ids(ids);
        check_exclusive_students(&SqliteRoster::new(&tx), &activity.school_id, &ids)?;
        activity.exclusive_students = ids;
    }
    if let Some(required) = patch.required {
        activity.required = required;
    }
    if let Some(active) = patch.active {
        activity.active = active;
    }
    if let Some(deadline) = patch.deadline {
        activity.deadline = validate_deadline(deadline)?;
    }
    if let Some(unit) = patch.unit {
        activity.unit = unit;
    }
    if let Some(target) = patch.target_amount {
        activity.target_amount = validate_target(target)?;
    }
    if let Some(protocol) = patch.update_protocol {
        activity.update_protocol = protocol;
    }

    store::write_activity(&tx, &activity, &now_rfc3339())?;
    let records_reset = reevaluate::on_activity_template_changed(&tx, &activity, &previous_template)?;
    tx.commit()?;

    tracing::info!(activity_id, records_reset, "activity updated");
    Ok(ActivityUpdate {
        activity,
        records_reset,
    })
}

pub fn delete_activity(conn: &Connection, actor: &Actor, activity_id: i64) -> EngineResult<usize> {
    require_admin(actor, "activities.delete")?;
    let tx = conn.unchecked_transaction()?;
    let records_removed = store::delete_activity(&tx, activity_id)?;
    tx.commit()?;
    tracing::info!(activity_id, records_removed, "activity deleted");
    Ok(records_removed)
}

pub fn list_activities(conn: &Connection, school_id: &str, scope: Scope) -> EngineResult<Vec<Activity>> {
    let roster = SqliteRoster::new(conn);
    if !roster.school_exists(school_id)? {
        return Err(EngineError::not_found("school", school_id));
    }
    let scope = resolve_scope(&roster, school_id, scope)?;
    store::list_activities(conn, school_id, scope)
}
