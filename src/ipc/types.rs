use std::path::PathBuf;

use crate::ledger::AttendanceLedger;
use crate::session::SessionStatus;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Everything one daemon process holds between requests. The ledger lives
/// only here; it is never written to the workspace database.
#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub ledger: Option<AttendanceLedger>,
    pub session: SessionStatus,
}
