//! Which activities apply to which students.
//!
//! An activity reaches a student through any of three independent rules:
//! the grade-band coverage type, the explicit classroom list, or the
//! explicit student list. The lists only ever add students.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::error::{EngineError, EngineResult};
use crate::model::{Activity, RecordStatus, Scope};
use crate::roster::{resolve_scope, RosterLookup, ScopeLookup};
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InclusionRule {
    GradeBand,
    ExclusiveClassroom,
    ExclusiveStudent,
}

/// Every rule under which `activity` reaches the student. Empty means not assigned.
pub fn inclusion_rules(
    activity: &Activity,
    student_id: &str,
    classroom_label: &str,
    classroom_is_junior: bool,
) -> Vec<InclusionRule> {
    let mut rules = Vec::new();
    if activity.coverage.covers_band(classroom_is_junior) {
        rules.push(InclusionRule::GradeBand);
    }
    if activity
        .exclusive_classrooms
        .iter()
        .any(|label| label == classroom_label)
    {
        rules.push(InclusionRule::ExclusiveClassroom);
    }
    if activity.exclusive_students.iter().any(|id| id == student_id) {
        rules.push(InclusionRule::ExclusiveStudent);
    }
    rules
}

/// Union of the three per-rule student sets for one activity.
///
/// `students` is (student id, classroom label); `junior_flags` maps label to band.
/// Students in classrooms missing from `junior_flags` only enter through the lists.
pub fn assigned_students(
    activity: &Activity,
    students: &[(String, String)],
    junior_flags: &HashMap<String, bool>,
) -> BTreeSet<String> {
    let by_band: BTreeSet<String> = students
        .iter()
        .filter(|(_, label)| {
            junior_flags
                .get(label)
                .is_some_and(|junior| activity.coverage.covers_band(*junior))
        })
        .map(|(id, _)| id.clone())
        .collect();
    let by_classroom: BTreeSet<String> = students
        .iter()
        .filter(|(_, label)| activity.exclusive_classrooms.contains(label))
        .map(|(id, _)| id.clone())
        .collect();
    let by_student: BTreeSet<String> = students
        .iter()
        .filter(|(id, _)| activity.exclusive_students.contains(id))
        .map(|(id, _)| id.clone())
        .collect();

    by_band
        .union(&by_classroom)
        .cloned()
        .collect::<BTreeSet<_>>()
        .union(&by_student)
        .cloned()
        .collect()
}

/// Amount units summed per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusAmounts {
    pub created: f64,
    pub sended: f64,
    pub approved: f64,
    pub rejected: f64,
}

impl StatusAmounts {
    pub fn add(&mut self, status: RecordStatus, amount: f64) {
        match status {
            RecordStatus::Created => self.created += amount,
            RecordStatus::Sended => self.sended += amount,
            RecordStatus::Approved => self.approved += amount,
            RecordStatus::Rejected => self.rejected += amount,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub created: i64,
    pub sended: i64,
    pub approved: i64,
    pub rejected: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: RecordStatus, count: i64) {
        match status {
            RecordStatus::Created => self.created += count,
            RecordStatus::Sended => self.sended += count,
            RecordStatus::Approved => self.approved += count,
            RecordStatus::Rejected => self.rejected += count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityWithCounts {
    pub activity: Activity,
    pub amounts: StatusAmounts,
    pub record_counts: StatusCounts,
    pub finished_percent: f64,
    pub included_by: Vec<InclusionRule>,
}

/// min(100, 100 * achieved / target); an activity without a target is always done.
pub fn finished_percent(achieved: f64, target: f64) -> f64 {
    if target <= 0.0 {
        return 100.0;
    }
    (100.0 * achieved / target).clamp(0.0, 100.0)
}

/// Activities assigned to `student_id` in `scope`, ascending by id with required ones first on ties.
pub fn resolve_assigned_activities<R>(
    conn: &Connection,
    roster: &R,
    student_id: &str,
    school_id: &str,
    scope: Scope,
) -> EngineResult<Vec<ActivityWithCounts>>
where
    R: RosterLookup + ScopeLookup,
{
    // Fails with NotFound for an unknown school even when the scope is explicit.
    roster.active_semester_year(school_id)?;
    let scope = resolve_scope(roster, school_id, scope)?;

    let student_school = roster.student_school(student_id)?;
    if student_school != school_id {
        return Err(EngineError::not_found(
            "student",
            format!("{student_id} in school {school_id}"),
        ));
    }
    let classroom = roster.student_classroom(student_id)?;
    let is_junior = roster.classroom_junior_flag(school_id, &classroom)?;

    let mut assigned = Vec::new();
    for activity in store::list_activities(conn, school_id, scope)? {
        let included_by = inclusion_rules(&activity, student_id, &classroom, is_junior);
        if included_by.is_empty() {
            continue;
        }
        assigned.push(with_counts(conn, activity, student_id, included_by)?);
    }
    sort_assigned(&mut assigned);

    tracing::debug!(
        student_id,
        school_id,
        semester = scope.semester,
        school_year = scope.school_year,
        assigned = assigned.len(),
        "resolved assigned activities"
    );
    Ok(assigned)
}

/// Whether one specific activity reaches the student, evaluated in the activity's own scope.
pub fn is_assigned<R: RosterLookup>(
    roster: &R,
    activity: &Activity,
    student_id: &str,
) -> EngineResult<bool> {
    if roster.student_school(student_id)? != activity.school_id {
        return Ok(false);
    }
    let classroom = roster.student_classroom(student_id)?;
    let is_junior = roster.classroom_junior_flag(&activity.school_id, &classroom)?;
    Ok(!inclusion_rules(activity, student_id, &classroom, is_junior).is_empty())
}

/// Every student of the activity's school the activity reaches.
pub fn activity_assignees<R: RosterLookup>(roster: &R, activity: &Activity) -> EngineResult<BTreeSet<String>> {
    let students = roster.school_students(&activity.school_id)?;
    let mut junior_flags = HashMap::new();
    for (_, label) in &students {
        if !junior_flags.contains_key(label) {
            let flag = roster.classroom_junior_flag(&activity.school_id, label)?;
            junior_flags.insert(label.clone(), flag);
        }
    }
    Ok(assigned_students(activity, &students, &junior_flags))
}

fn with_counts(
    conn: &Connection,
    activity: Activity,
    student_id: &str,
    included_by: Vec<InclusionRule>,
) -> EngineResult<ActivityWithCounts> {
    let mut amounts = StatusAmounts::default();
    let mut record_counts = StatusCounts::default();
    for (status, amount, count) in
        store::student_amounts_by_status(conn, activity.id, student_id, activity.scope())?
    {
        amounts.add(status, amount);
        record_counts.add(status, count);
    }
    let finished_percent = finished_percent(amounts.approved, activity.target_amount);
    Ok(ActivityWithCounts {
        activity,
        amounts,
        record_counts,
        finished_percent,
        included_by,
    })
}

pub fn sort_assigned(assigned: &mut [ActivityWithCounts]) {
    assigned.sort_by(|a, b| {
        a.activity
            .id
            .cmp(&b.activity.id)
            .then_with(|| b.activity.required.cmp(&a.activity.required))
    });
}
