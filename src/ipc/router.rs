use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;
use crate::ipc::handlers::setup;
use crate::session::{self, Gate};
use serde_json::json;

/// Applies the workspace's session requirement before any data method runs.
fn check_session(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    if session::is_public_method(&req.method) {
        return None;
    }
    let conn = state.db.as_ref()?;
    let security = match setup::security_settings(conn) {
        Ok(s) => s,
        Err(e) => return Some(err(&req.id, "db_query_failed", format!("{e:#}"), None)),
    };
    match session::gate(state.session, security.require_session, &security.sign_in_path) {
        Gate::Open => None,
        Gate::Wait => Some(err(
            &req.id,
            "session_loading",
            "session status is still loading",
            None,
        )),
        Gate::SignIn { sign_in_path } => Some(err(
            &req.id,
            "unauthenticated",
            "sign in to continue",
            Some(json!({ "signInPath": sign_in_path })),
        )),
    }
}

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = check_session(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::session::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::setup::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::legacy_students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::imports::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::attendance::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
