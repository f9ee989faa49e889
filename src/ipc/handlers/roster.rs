use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{db_conn, optional_bool, optional_str, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::Scope;
use crate::roster;
use serde_json::json;

type HandlerResult = Result<serde_json::Value, serde_json::Value>;

fn active_scope(req: &Request) -> Result<Scope, serde_json::Value> {
    Ok(Scope::new(
        required_i64(req, "activeSemester")?,
        required_i64(req, "activeSchoolYear")?,
    ))
}

fn handle_schools_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let name = required_str(req, "name")?;
    let active = active_scope(req)?;
    let school_id =
        roster::create_school(conn, &name, active).map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, json!({ "schoolId": school_id, "name": name })))
}

fn handle_schools_set_active_scope(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let school_id = required_str(req, "schoolId")?;
    let active = active_scope(req)?;
    roster::set_active_scope(conn, &school_id, active).map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(
        &req.id,
        json!({
            "schoolId": school_id,
            "activeSemester": active.semester,
            "activeSchoolYear": active.school_year,
        }),
    ))
}

fn handle_classrooms_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let school_id = required_str(req, "schoolId")?;
    let label = required_str(req, "label")?;
    let is_junior = optional_bool(req, "isJunior")?;
    let (classroom_id, is_junior) = roster::create_classroom(conn, &school_id, &label, is_junior)
        .map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(
        &req.id,
        json!({ "classroomId": classroom_id, "label": label, "isJunior": is_junior }),
    ))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let school_id = required_str(req, "schoolId")?;
    let classroom = required_str(req, "classroom")?;
    let name = optional_str(req, "name")?.unwrap_or_default();
    let student_id = roster::create_student(conn, &school_id, &classroom, &name)
        .map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, json!({ "studentId": student_id })))
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let school_id = required_str(req, "schoolId")?;
    let name = optional_str(req, "name")?.unwrap_or_default();
    let teacher_id =
        roster::create_teacher(conn, &school_id, &name).map_err(|e| engine_err(&req.id, e))?;
    Ok(ok(&req.id, json!({ "teacherId": teacher_id })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "schools.create" => handle_schools_create(state, req),
        "schools.setActiveScope" => handle_schools_set_active_scope(state, req),
        "classrooms.create" => handle_classrooms_create(state, req),
        "students.create" => handle_students_create(state, req),
        "teachers.create" => handle_teachers_create(state, req),
        _ => return None,
    };
    Some(result.unwrap_or_else(|e| e))
}
