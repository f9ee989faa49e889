use rusqlite::Connection;
use serde::Serialize;

use crate::coverage::{self, ActivityWithCounts};
use crate::error::{EngineError, EngineResult};
use crate::model::Scope;
use crate::roster::{resolve_scope, RosterLookup, ScopeLookup};

/// One activity's share of each bucket, as fractions of its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fractions {
    pub non_created: f64,
    pub created: f64,
    pub sended: f64,
    pub approved: f64,
    pub rejected: f64,
}

impl Fractions {
    fn accumulate(&mut self, other: &Fractions) {
        self.non_created += other.non_created;
        self.created += other.created;
        self.sended += other.sended;
        self.approved += other.approved;
        self.rejected += other.rejected;
    }
}

/// The five buckets scaled to percentages in [0, 100].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPercents {
    pub non_created: f64,
    pub created: f64,
    pub sended: f64,
    pub approved: f64,
    pub rejected: f64,
}

impl CompletionPercents {
    fn from_sums(sums: &Fractions, count: usize) -> Self {
        if count == 0 {
            return Self::default();
        }
        let scale = |v: f64| (100.0 * v / count as f64).clamp(0.0, 100.0);
        Self {
            non_created: scale(sums.non_created),
            created: scale(sums.created),
            sended: scale(sums.sended),
            approved: scale(sums.approved),
            rejected: scale(sums.rejected),
        }
    }

    fn mean(items: &[CompletionPercents]) -> Self {
        if items.is_empty() {
            return Self::default();
        }
        let n = items.len() as f64;
        let mut out = Self::default();
        for p in items {
            out.non_created += p.non_created;
            out.created += p.created;
            out.sended += p.sended;
            out.approved += p.approved;
            out.rejected += p.rejected;
        }
        out.non_created /= n;
        out.created /= n;
        out.sended /= n;
        out.approved /= n;
        out.rejected /= n;
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityContribution {
    pub activity_id: i64,
    pub name: String,
    pub required: bool,
    pub target_amount: f64,
    pub fractions: Fractions,
    pub finished_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentCompletion {
    pub student_id: String,
    pub scope: Scope,
    pub matched: usize,
    pub percents: CompletionPercents,
    pub finished: bool,
    pub per_activity: Vec<ActivityContribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCompletion {
    pub label: String,
    pub students: usize,
    pub reporting_students: usize,
    pub finished_students: usize,
    pub percents: CompletionPercents,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolCompletion {
    pub school_id: String,
    pub scope: Scope,
    pub classrooms: Vec<GroupCompletion>,
    pub school: GroupCompletion,
}

/// Sorted, de-duplicated copy of the caller's filter. Empty is rejected.
pub fn normalize_filter(filter: &[i64]) -> EngineResult<Vec<i64>> {
    if filter.is_empty() {
        return Err(EngineError::invalid_argument(
            "activity filter must contain at least one activity id",
        ));
    }
    let mut sorted = filter.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    Ok(sorted)
}

/// Per-activity fractions. A zero target counts as fully approved.
pub fn contribution(entry: &ActivityWithCounts) -> Fractions {
    let target = entry.activity.target_amount;
    if target <= 0.0 {
        return Fractions {
            approved: 1.0,
            ..Fractions::default()
        };
    }
    let created = entry.amounts.created / target;
    let sended = entry.amounts.sended / target;
    let approved = entry.amounts.approved / target;
    let rejected = entry.amounts.rejected / target;
    Fractions {
        // Over-delivery on one activity must not eat into another's residual.
        non_created: (1.0 - (created + sended + approved + rejected)).max(0.0),
        created,
        sended,
        approved,
        rejected,
    }
}

/// Two-cursor merge of a sorted filter against sorted resolved activities.
///
/// Both inputs must be ascending by activity id; see `compute_completion`
/// for the sorting done at the boundary.
pub fn merge_completion(
    filter: &[i64],
    resolved: &[ActivityWithCounts],
) -> (CompletionPercents, Vec<ActivityContribution>) {
    let mut sums = Fractions::default();
    let mut per_activity = Vec::new();
    let (mut i, mut j) = (0, 0);

    while i < filter.len() && j < resolved.len() {
        let entry = &resolved[j];
        let wanted = filter[i];
        if wanted < entry.activity.id {
            i += 1;
        } else if wanted > entry.activity.id {
            j += 1;
        } else {
            let fractions = contribution(entry);
            sums.accumulate(&fractions);
            per_activity.push(ActivityContribution {
                activity_id: entry.activity.id,
                name: entry.activity.name.clone(),
                required: entry.activity.required,
                target_amount: entry.activity.target_amount,
                fractions,
                finished_percent: entry.finished_percent,
            });
            i += 1;
            j += 1;
        }
    }

    let percents = CompletionPercents::from_sums(&sums, per_activity.len());
    (percents, per_activity)
}

fn is_sorted_by_id(resolved: &[ActivityWithCounts]) -> bool {
    resolved
        .windows(2)
        .all(|w| w[0].activity.id <= w[1].activity.id)
}

fn student_completion(
    student_id: &str,
    scope: Scope,
    filter: &[i64],
    mut resolved: Vec<ActivityWithCounts>,
) -> StudentCompletion {
    if !is_sorted_by_id(&resolved) {
        tracing::warn!(student_id, "resolved activities arrived unsorted; sorting");
        coverage::sort_assigned(&mut resolved);
    }
    let (percents, per_activity) = merge_completion(filter, &resolved);
    let finished = !per_activity.is_empty()
        && per_activity.iter().all(|a| a.finished_percent >= 100.0);
    tracing::debug!(
        student_id,
        filter = filter.len(),
        resolved = resolved.len(),
        matched = per_activity.len(),
        "merged completion"
    );
    StudentCompletion {
        student_id: student_id.to_string(),
        scope,
        matched: per_activity.len(),
        percents,
        finished,
        per_activity,
    }
}

pub fn compute_completion<R>(
    conn: &Connection,
    roster: &R,
    student_id: &str,
    school_id: &str,
    filter: &[i64],
    scope: Scope,
) -> EngineResult<StudentCompletion>
where
    R: RosterLookup + ScopeLookup,
{
    let filter = normalize_filter(filter)?;
    let scope = resolve_scope(roster, school_id, scope)?;
    let resolved = coverage::resolve_assigned_activities(conn, roster, student_id, school_id, scope)?;
    Ok(student_completion(student_id, scope, &filter, resolved))
}

fn group(label: String, members: &[StudentCompletion]) -> GroupCompletion {
    let reporting: Vec<CompletionPercents> = members
        .iter()
        .filter(|m| m.matched > 0)
        .map(|m| m.percents)
        .collect();
    GroupCompletion {
        label,
        students: members.len(),
        reporting_students: reporting.len(),
        finished_students: members.iter().filter(|m| m.finished).count(),
        percents: CompletionPercents::mean(&reporting),
    }
}

/// Per-classroom and whole-school rollup of `compute_completion`.
/// Students with no matching activity are counted but do not move the averages.
pub fn compute_school_completion<R>(
    conn: &Connection,
    roster: &R,
    school_id: &str,
    filter: &[i64],
    scope: Scope,
    classroom: Option<&str>,
) -> EngineResult<SchoolCompletion>
where
    R: RosterLookup + ScopeLookup,
{
    let filter = normalize_filter(filter)?;
    let scope = resolve_scope(roster, school_id, scope)?;
    roster.active_semester_year(school_id)?;

    let students: Vec<(String, String)> = roster
        .school_students(school_id)?
        .into_iter()
        .filter(|(_, label)| classroom.map_or(true, |wanted| wanted == label.as_str()))
        .collect();

    let mut classrooms: Vec<GroupCompletion> = Vec::new();
    let mut everyone: Vec<StudentCompletion> = Vec::with_capacity(students.len());
    let mut current: Option<String> = None;
    let mut bucket: Vec<StudentCompletion> = Vec::new();

    // school_students is ordered by label, so classrooms arrive contiguously.
    for (student_id, label) in students {
        if current.as_deref() != Some(label.as_str()) {
            if let Some(done) = current.take() {
                classrooms.push(group(done, &bucket));
                everyone.append(&mut bucket);
            }
            current = Some(label.clone());
        }
        let resolved =
            coverage::resolve_assigned_activities(conn, roster, &student_id, school_id, scope)?;
        bucket.push(student_completion(&student_id, scope, &filter, resolved));
    }
    if let Some(done) = current.take() {
        classrooms.push(group(done, &bucket));
        everyone.append(&mut bucket);
    }

    let school = group(school_id.to_string(), &everyone);
    tracing::info!(
        school_id,
        classrooms = classrooms.len(),
        students = school.students,
        finished = school.finished_students,
        "school completion computed"
    );
    Ok(SchoolCompletion {
        school_id: school_id.to_string(),
        scope,
        classrooms,
        school,
    })
}
