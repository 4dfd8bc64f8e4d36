use crate::db;
use crate::ident;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{get_optional_str, get_required_object, get_required_str, require_db, require_db_mut};
use crate::ipc::types::{AppState, Request};
use crate::model::{DedupKey, Student};
use crate::register::{self, RegisterError, RegistrationForm};
use crate::roster::{self, RosterQuery, SortKey};
use log::info;
use serde_json::{json, Value};

/// Stable error codes for the registration path. Form problems carry
/// `details.fields`; duplicates name the record already on file.
pub fn register_error(e: RegisterError) -> HandlerErr {
    match e {
        RegisterError::Invalid(fields) => {
            HandlerErr::new("bad_params", "registration form is invalid")
                .with_details(json!({ "fields": fields }))
        }
        RegisterError::Duplicate { id, unique_id } => HandlerErr::new(
            "duplicate",
            "a student with the same names and sex already exists",
        )
        .with_details(json!({ "studentId": id, "uniqueId": unique_id })),
        RegisterError::Store(e) => HandlerErr::db("db_insert_failed", e),
    }
}

/// Filter params shared with `attendance.get`.
pub fn roster_query(params: &Value) -> Result<RosterQuery, HandlerErr> {
    let sort_by = match get_optional_str(params, "sortBy")? {
        None => None,
        Some(s) => Some(SortKey::parse(&s).ok_or_else(|| {
            HandlerErr::new("bad_params", "sortBy must be one of: uniqueId, fullName")
        })?),
    };
    Ok(RosterQuery {
        text: get_optional_str(params, "query")?.unwrap_or_default(),
        grade: get_optional_str(params, "grade")?,
        sex: get_optional_str(params, "sex")?,
        class: get_optional_str(params, "class")?,
        sort_by,
    })
}

fn load_roster(conn: &rusqlite::Connection) -> Result<Vec<Student>, HandlerErr> {
    db::list_students(conn).map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn find_student(conn: &rusqlite::Connection, id: &str) -> Result<Student, HandlerErr> {
    db::get_student(conn, id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))
}

fn students_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let q = roster_query(params)?;
    let all = load_roster(conn)?;
    let matched = roster::filter_roster(&all, &q);
    Ok(json!({
        "total": all.len(),
        "matched": matched.len(),
        "students": matched,
    }))
}

fn students_filter_options(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let all = load_roster(conn)?;
    Ok(json!({
        "grades": roster::distinct_values(&all, |s| s.grade.as_str()),
        "sexes": roster::distinct_values(&all, |s| s.sex.as_str()),
        "classes": roster::distinct_values(&all, |s| s.class.as_str()),
    }))
}

fn students_get(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let id = get_required_str(params, "studentId")?;
    Ok(json!({ "student": find_student(conn, &id)? }))
}

fn year_and_grade(params: &Value) -> Result<(String, String), HandlerErr> {
    let year = get_required_str(params, "academicYear")?;
    let grade = get_required_str(params, "grade")?;
    Ok((year, grade))
}

fn students_count(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let (year, grade) = year_and_grade(params)?;
    let count = db::count_registrations(conn, &year, &grade)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "academicYear": year, "grade": grade, "count": count }))
}

/// The code the next registrant of (year, grade) would get. Advisory only:
/// a failed read degrades to ordinal `01` instead of an error.
fn students_preview_id(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let (year, grade) = year_and_grade(params)?;
    let settings =
        setup::registration_settings(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let key = ident::registration_counter_key(&year, &grade);
    let current = db::count_registrations(conn, &year, &grade).and_then(|n| {
        let seq = db::peek_sequence(conn, &key)?.unwrap_or(0);
        Ok(n.max(seq))
    });
    let degraded = current.is_err();
    let unique_id = ident::code_from_count(&settings.id_prefix, &year, &grade, current);
    Ok(json!({ "uniqueId": unique_id, "degraded": degraded }))
}

fn students_check_duplicate(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let key = serde_json::from_value::<DedupKey>(params.clone())
        .map_err(|e| HandlerErr::new("bad_params", e.to_string()))?
        .trimmed();
    if key.first_name.is_empty() || key.father_name.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            "firstName and fatherName are required",
        ));
    }
    let existing = db::find_duplicate(conn, &key).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(match existing {
        Some(s) => json!({ "duplicate": true, "studentId": s.id, "uniqueId": s.unique_id }),
        None => json!({ "duplicate": false }),
    })
}

fn students_register(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db_mut(&mut state.db)?;
    let form_raw = get_required_object(params, "form")?;
    let form: RegistrationForm = serde_json::from_value(Value::Object(form_raw.clone()))
        .map_err(|e| HandlerErr::new("bad_params", format!("form: {}", e)))?;
    let errors = register::validate_form(&form);
    if !errors.is_empty() {
        return Err(register_error(RegisterError::Invalid(errors)));
    }
    let settings =
        setup::registration_settings(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let student = register::form_to_student(&form, settings.current_year);
    let stored = register::register_student(conn, student, &settings.id_prefix)
        .map_err(register_error)?;
    Ok(json!({ "student": stored }))
}

fn students_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let id = get_required_str(params, "studentId")?;
    let patch = get_required_object(params, "patch")?;
    let current = find_student(conn, &id)?;
    let updated = register::apply_patch(&current, patch).map_err(|fields| {
        HandlerErr::new("bad_params", "patch is invalid").with_details(json!({ "fields": fields }))
    })?;
    match db::update_student(conn, &updated) {
        Ok(true) => {}
        Ok(false) => return Err(HandlerErr::new("not_found", "student not found")),
        Err(e) if db::is_unique_violation(&e) => {
            return Err(HandlerErr::new(
                "duplicate",
                "another student already has these names and sex",
            ))
        }
        Err(e) => return Err(HandlerErr::db("db_update_failed", e)),
    }
    info!(
        "event=student_updated module=students status=ok student_id={} fields={}",
        id,
        patch.len()
    );
    Ok(json!({ "student": updated }))
}

fn students_delete(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let id = get_required_str(params, "studentId")?;
    let deleted = db::delete_student(conn, &id).map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if !deleted {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    let dropped_marks = state.ledger.as_mut().map(|l| l.forget(&id)).unwrap_or(0);
    info!(
        "event=student_deleted module=students status=ok student_id={} dropped_marks={}",
        id, dropped_marks
    );
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "students.list" => students_list(state, p),
        "students.filterOptions" => students_filter_options(state),
        "students.get" => students_get(state, p),
        "students.count" => students_count(state, p),
        "students.previewId" => students_preview_id(state, p),
        "students.checkDuplicate" => students_check_duplicate(state, p),
        "students.register" => students_register(state, p),
        "students.update" => students_update(state, p),
        "students.delete" => students_delete(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
