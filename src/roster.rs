//! Roster and school-scope collaborators.
//!
//! The engine only needs a handful of lookups from the roster. They are
//! expressed as traits so coverage and statistics can be exercised against
//! fixtures; `SqliteRoster` answers them from the workspace database.

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::model::Scope;

/// Highest grade that still counts as the junior band.
pub const JUNIOR_MAX_GRADE: u32 = 3;

pub trait RosterLookup {
    fn student_school(&self, student_id: &str) -> EngineResult<String>;
    fn student_classroom(&self, student_id: &str) -> EngineResult<String>;
    fn classroom_junior_flag(&self, school_id: &str, classroom_label: &str) -> EngineResult<bool>;
    /// (student id, classroom label) for every student of a school, ordered by label then id.
    fn school_students(&self, school_id: &str) -> EngineResult<Vec<(String, String)>>;
}

pub trait ScopeLookup {
    fn active_semester_year(&self, school_id: &str) -> EngineResult<Scope>;
}

/// Fills zero slots of `scope` from the school's active semester/year.
pub fn resolve_scope(lookup: &dyn ScopeLookup, school_id: &str, scope: Scope) -> EngineResult<Scope> {
    let scope = scope.validate()?;
    if scope.is_resolved() {
        return Ok(scope);
    }
    let active = lookup.active_semester_year(school_id)?;
    Ok(Scope {
        semester: if scope.semester == 0 {
            active.semester
        } else {
            scope.semester
        },
        school_year: if scope.school_year == 0 {
            active.school_year
        } else {
            scope.school_year
        },
    })
}

/// Grade band from a label such as "1/1" or "M.5/2". `None` when no grade digit leads the label.
pub fn junior_flag_from_label(label: &str) -> Option<bool> {
    let head = label.split('/').next()?.trim();
    let digits: String = head
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let grade: u32 = digits.parse().ok()?;
    if grade == 0 {
        return None;
    }
    Some(grade <= JUNIOR_MAX_GRADE)
}

pub struct SqliteRoster<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRoster<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn school_exists(&self, school_id: &str) -> EngineResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM schools WHERE id = ?", [school_id], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn teacher_school(&self, teacher_id: &str) -> EngineResult<Option<String>> {
        let school: Option<String> = self
            .conn
            .query_row(
                "SELECT school_id FROM teachers WHERE id = ?",
                [teacher_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(school)
    }
}

impl RosterLookup for SqliteRoster<'_> {
    fn student_school(&self, student_id: &str) -> EngineResult<String> {
        self.conn
            .query_row(
                "SELECT school_id FROM students WHERE id = ?",
                [student_id],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| EngineError::not_found("student", student_id))
    }

    fn student_classroom(&self, student_id: &str) -> EngineResult<String> {
        let row: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT c.label
                 FROM students s
                 LEFT JOIN classrooms c ON c.id = s.classroom_id
                 WHERE s.id = ?",
                [student_id],
                |r| r.get(0),
            )
            .optional()?;
        match row {
            None => Err(EngineError::not_found("student", student_id)),
            Some(None) => Err(EngineError::dependency(
                "student_classroom",
                format!("student {student_id} is not placed in a classroom"),
            )),
            Some(Some(label)) => Ok(label),
        }
    }

    fn classroom_junior_flag(&self, school_id: &str, classroom_label: &str) -> EngineResult<bool> {
        let flag: Option<i64> = self
            .conn
            .query_row(
                "SELECT is_junior FROM classrooms WHERE school_id = ? AND label = ?",
                params![school_id, classroom_label],
                |r| r.get(0),
            )
            .optional()?;
        flag.map(|v| v != 0).ok_or_else(|| {
            EngineError::dependency(
                "classroom_junior_flag",
                format!("classroom {classroom_label} is not registered for school {school_id}"),
            )
        })
    }

    fn school_students(&self, school_id: &str) -> EngineResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, c.label
             FROM students s
             JOIN classrooms c ON c.id = s.classroom_id
             WHERE s.school_id = ?
             ORDER BY c.label, s.id",
        )?;
        let rows = stmt
            .query_map([school_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl ScopeLookup for SqliteRoster<'_> {
    fn active_semester_year(&self, school_id: &str) -> EngineResult<Scope> {
        self.conn
            .query_row(
                "SELECT active_semester, active_school_year FROM schools WHERE id = ?",
                [school_id],
                |r| Ok(Scope::new(r.get(0)?, r.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| EngineError::not_found("school", school_id))
    }
}

// Fixture-level roster writes. Full roster management lives outside the engine.

pub fn create_school(conn: &Connection, name: &str, active: Scope) -> EngineResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::invalid_argument("school name must not be empty"));
    }
    if !active.validate()?.is_resolved() {
        return Err(EngineError::invalid_argument(
            "a school's active semester and year must both be set",
        ));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schools(id, name, active_semester, active_school_year) VALUES(?, ?, ?, ?)",
        params![id, name, active.semester, active.school_year],
    )?;
    Ok(id)
}

pub fn set_active_scope(conn: &Connection, school_id: &str, active: Scope) -> EngineResult<()> {
    if !active.validate()?.is_resolved() {
        return Err(EngineError::invalid_argument(
            "a school's active semester and year must both be set",
        ));
    }
    let changed = conn.execute(
        "UPDATE schools SET active_semester = ?, active_school_year = ? WHERE id = ?",
        params![active.semester, active.school_year, school_id],
    )?;
    if changed == 0 {
        return Err(EngineError::not_found("school", school_id));
    }
    Ok(())
}

pub fn create_classroom(
    conn: &Connection,
    school_id: &str,
    label: &str,
    is_junior: Option<bool>,
) -> EngineResult<(String, bool)> {
    let label = label.trim();
    if label.is_empty() {
        return Err(EngineError::invalid_argument("classroom label must not be empty"));
    }
    if !SqliteRoster::new(conn).school_exists(school_id)? {
        return Err(EngineError::not_found("school", school_id));
    }
    let is_junior = match is_junior.or_else(|| junior_flag_from_label(label)) {
        Some(v) => v,
        None => {
            return Err(EngineError::invalid_argument(format!(
                "cannot derive grade band from classroom label {label:?}; pass isJunior"
            )))
        }
    };
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classrooms(id, school_id, label, is_junior) VALUES(?, ?, ?, ?)",
        params![id, school_id, label, is_junior as i64],
    )?;
    Ok((id, is_junior))
}

pub fn create_student(
    conn: &Connection,
    school_id: &str,
    classroom_label: &str,
    name: &str,
) -> EngineResult<String> {
    let classroom_id: String = conn
        .query_row(
            "SELECT id FROM classrooms WHERE school_id = ? AND label = ?",
            params![school_id, classroom_label.trim()],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| EngineError::not_found("classroom", classroom_label))?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, school_id, classroom_id, name) VALUES(?, ?, ?, ?)",
        params![id, school_id, classroom_id, name.trim()],
    )?;
    Ok(id)
}

pub fn create_teacher(conn: &Connection, school_id: &str, name: &str) -> EngineResult<String> {
    if !SqliteRoster::new(conn).school_exists(school_id)? {
        return Err(EngineError::not_found("school", school_id));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, school_id, name) VALUES(?, ?, ?)",
        params![id, school_id, name.trim()],
    )?;
    Ok(id)
}
