use crate::ipc::error::HandlerErr;
use rusqlite::Connection;
use serde_json::Value;

pub fn no_workspace() -> HandlerErr {
    HandlerErr::new("no_workspace", "select a workspace first")
}

pub fn require_db(db: &Option<Connection>) -> Result<&Connection, HandlerErr> {
    db.as_ref().ok_or_else(no_workspace)
}

pub fn require_db_mut(db: &mut Option<Connection>) -> Result<&mut Connection, HandlerErr> {
    db.as_mut().ok_or_else(no_workspace)
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

/// A trimmed string param; absent, null and blank all read as `None`.
pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let t = s.trim();
            Ok((!t.is_empty()).then(|| t.to_string()))
        }
        Some(_) => Err(HandlerErr::new(
            "bad_params",
            format!("{} must be a string", key),
        )),
    }
}

pub fn get_required_object<'a>(
    params: &'a Value,
    key: &str,
) -> Result<&'a serde_json::Map<String, Value>, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be an object", key)))
}
