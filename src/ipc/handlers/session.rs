use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::session::{SessionStatus, DEFAULT_SIGN_IN_PATH};
use log::info;
use serde_json::{json, Value};

fn session_get(state: &AppState) -> Result<Value, HandlerErr> {
    let (require_session, sign_in_path) = match state.db.as_ref() {
        Some(conn) => {
            let s = setup::security_settings(conn)
                .map_err(|e| HandlerErr::db("db_query_failed", e))?;
            (s.require_session, s.sign_in_path)
        }
        None => (false, DEFAULT_SIGN_IN_PATH.to_string()),
    };
    Ok(json!({
        "status": state.session,
        "requireSession": require_session,
        "signInPath": sign_in_path,
    }))
}

fn session_set(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let raw = get_required_str(params, "status")?;
    let status = SessionStatus::parse(&raw).ok_or_else(|| {
        HandlerErr::new(
            "bad_params",
            "status must be one of: unauthenticated, authenticated, loading",
        )
    })?;
    if status != state.session {
        info!(
            "event=session_changed module=session status=ok from={} to={}",
            state.session.as_str(),
            status.as_str()
        );
    }
    state.session = status;
    Ok(json!({ "status": status }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "session.get" => Some(respond(&req.id, session_get(state))),
        "session.set" => Some(respond(&req.id, session_set(state, &req.params))),
        _ => None,
    }
}
