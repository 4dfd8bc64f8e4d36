use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::report;
use log::info;
use serde_json::json;
use std::path::PathBuf;

fn health(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
        "session": state.session.as_str(),
        "ledgerDate": state.ledger.as_ref().map(|l| report::format_date(l.date())),
    }))
}

/// Opens (creating if needed) the workspace database. Switching workspaces
/// drops any unsubmitted attendance.
fn workspace_select(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let path = PathBuf::from(get_required_str(params, "path")?);
    let conn = db::open_db(&path).map_err(|e| HandlerErr::db("db_open_failed", e))?;
    let dropped = state.ledger.take().map(|l| l.marked_count()).unwrap_or(0);
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    info!(
        "event=workspace_opened module=core status=ok dropped_marks={}",
        dropped
    );
    Ok(json!({ "workspacePath": path.to_string_lossy() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(respond(&req.id, health(state))),
        "workspace.select" => Some(respond(&req.id, workspace_select(state, &req.params))),
        _ => None,
    }
}
