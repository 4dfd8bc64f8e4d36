use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::students::register_error;
use crate::ipc::helpers::{get_optional_str, get_required_object, require_db, require_db_mut};
use crate::ipc::types::{AppState, Request};
use crate::model::LegacyStudent;
use crate::register;
use crate::roster;
use serde_json::{json, Value};

fn legacy_register(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db_mut(&mut state.db)?;
    let raw = get_required_object(params, "student")?;
    let mut student: LegacyStudent = serde_json::from_value(Value::Object(raw.clone()))
        .map_err(|e| HandlerErr::new("bad_params", format!("student: {}", e)))?;
    // Both numbers are assigned here, never taken from the caller.
    student.id.clear();
    student.id_number.clear();
    let stored = register::register_legacy_student(conn, student).map_err(register_error)?;
    Ok(json!({ "student": stored }))
}

fn legacy_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let text = get_optional_str(params, "query")?.unwrap_or_default();
    let all = db::list_legacy_students(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let matched = roster::filter_legacy(&all, &text);
    Ok(json!({
        "total": all.len(),
        "matched": matched.len(),
        "students": matched,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "legacyStudents.register" => legacy_register(state, &req.params),
        "legacyStudents.list" => legacy_list(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
