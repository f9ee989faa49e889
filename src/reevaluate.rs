use rusqlite::Connection;

use crate::error::{EngineError, EngineResult};
use crate::model::{now_rfc3339, Activity, UpdateProtocol};
use crate::store;
use crate::workflow;

/// Whether a template edit forces dependent records back to CREATED.
pub fn requires_reset(activity: &Activity, previous_template: &serde_json::Value) -> bool {
    previous_template != &activity.template
        && activity.update_protocol == UpdateProtocol::ReEvaluateAllRecords
}

/// Resets every record of `activity` in its own semester/year when the
/// template changed under RE_EVALUATE_ALL_RECORDS. Returns the number reset.
///
/// Must run inside the same transaction as the activity write; any error
/// here is expected to roll both back.
pub fn on_activity_template_changed(
    conn: &Connection,
    activity: &Activity,
    previous_template: &serde_json::Value,
) -> EngineResult<usize> {
    if !requires_reset(activity, previous_template) {
        return Ok(0);
    }

    let now = now_rfc3339();
    let record_ids = store::record_ids_in_scope(conn, activity.id, activity.scope())?;
    for record_id in &record_ids {
        let mut record = store::load_record(conn, *record_id)?;
        let expected_version = record.version;
        workflow::reset(&mut record, &now);
        if !store::write_record_state(conn, &record, expected_version, &now)? {
            return Err(EngineError::Conflict {
                entity: "record",
                id: record_id.to_string(),
            });
        }
        store::append_history(conn, record.id, record.status, &now)?;
    }

    tracing::info!(
        activity_id = activity.id,
        semester = activity.semester,
        school_year = activity.school_year,
        reset = record_ids.len(),
        "template change re-evaluated records"
    );
    Ok(record_ids.len())
}
