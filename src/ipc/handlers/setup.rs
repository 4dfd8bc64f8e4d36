use crate::db;
use crate::ident::DEFAULT_ID_PREFIX;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_object, get_required_str, require_db};
use crate::ipc::types::{AppState, Request};
use crate::ledger::MarkingDay;
use crate::session::DEFAULT_SIGN_IN_PATH;
use log::info;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

pub const DEFAULT_CURRENT_YEAR: i64 = 2017;
pub const DEFAULT_MARKING_DAY: &str = "sunday";
pub const DEFAULT_EXPORT_SUBDIR: &str = "exports";

#[derive(Clone, Copy, PartialEq, Eq)]
enum SetupSection {
    Registration,
    Attendance,
    Reports,
    Security,
}

const ALL_SECTIONS: [SetupSection; 4] = [
    SetupSection::Registration,
    SetupSection::Attendance,
    SetupSection::Reports,
    SetupSection::Security,
];

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "registration" => Some(Self::Registration),
            "attendance" => Some(Self::Attendance),
            "reports" => Some(Self::Reports),
            "security" => Some(Self::Security),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Attendance => "attendance",
            Self::Reports => "reports",
            Self::Security => "security",
        }
    }

    fn key(self) -> String {
        format!("setup.{}", self.name())
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Registration => json!({
            "idPrefix": DEFAULT_ID_PREFIX,
            "currentYear": DEFAULT_CURRENT_YEAR
        }),
        SetupSection::Attendance => json!({
            "markingDay": DEFAULT_MARKING_DAY
        }),
        SetupSection::Reports => json!({
            "exportDir": null
        }),
        SetupSection::Security => json!({
            "requireSession": false,
            "signInPath": DEFAULT_SIGN_IN_PATH
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Registration => match k.as_str() {
                "idPrefix" => {
                    let s = parse_string_max(v, k, 16)?;
                    if s.is_empty() || s.contains('/') {
                        return Err("idPrefix must be non-empty and contain no '/'".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "currentYear" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1900, 2200)?));
                }
                _ => return Err(format!("unknown registration field: {}", k)),
            },
            SetupSection::Attendance => match k.as_str() {
                "markingDay" => {
                    let s = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    if MarkingDay::parse(&s).is_none() {
                        return Err("markingDay must be a weekday name or \"any\"".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
            SetupSection::Reports => match k.as_str() {
                "exportDir" => {
                    if v.is_null() {
                        obj.insert(k.clone(), Value::Null);
                    } else {
                        let s = parse_string_max(v, k, 1024)?;
                        obj.insert(
                            k.clone(),
                            if s.is_empty() { Value::Null } else { Value::String(s) },
                        );
                    }
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
            SetupSection::Security => match k.as_str() {
                "requireSession" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "signInPath" => {
                    let s = parse_string_max(v, k, 200)?;
                    if !s.starts_with('/') {
                        return Err("signInPath must start with '/'".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown security field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, &section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed stored values fall back to defaults rather than lock setup.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub struct RegistrationSettings {
    pub id_prefix: String,
    pub current_year: i64,
}

pub fn registration_settings(conn: &rusqlite::Connection) -> anyhow::Result<RegistrationSettings> {
    let v = load_section(conn, SetupSection::Registration)?;
    Ok(RegistrationSettings {
        id_prefix: v
            .get("idPrefix")
            .and_then(|x| x.as_str())
            .unwrap_or(DEFAULT_ID_PREFIX)
            .to_string(),
        current_year: v
            .get("currentYear")
            .and_then(|x| x.as_i64())
            .unwrap_or(DEFAULT_CURRENT_YEAR),
    })
}

pub fn marking_day(conn: &rusqlite::Connection) -> anyhow::Result<MarkingDay> {
    let v = load_section(conn, SetupSection::Attendance)?;
    let raw = v
        .get("markingDay")
        .and_then(|x| x.as_str())
        .unwrap_or(DEFAULT_MARKING_DAY);
    Ok(MarkingDay::parse(raw).unwrap_or_else(|| MarkingDay::weekday(chrono::Weekday::Sun)))
}

/// Configured export directory, or `<workspace>/exports`. Relative paths are
/// taken from the workspace.
pub fn export_dir(conn: &rusqlite::Connection, workspace: &Path) -> anyhow::Result<PathBuf> {
    let v = load_section(conn, SetupSection::Reports)?;
    Ok(match v.get("exportDir").and_then(|x| x.as_str()) {
        Some(dir) => workspace.join(dir),
        None => workspace.join(DEFAULT_EXPORT_SUBDIR),
    })
}

pub struct SecuritySettings {
    pub require_session: bool,
    pub sign_in_path: String,
}

pub fn security_settings(conn: &rusqlite::Connection) -> anyhow::Result<SecuritySettings> {
    let v = load_section(conn, SetupSection::Security)?;
    Ok(SecuritySettings {
        require_session: v
            .get("requireSession")
            .and_then(|x| x.as_bool())
            .unwrap_or(false),
        sign_in_path: v
            .get("signInPath")
            .and_then(|x| x.as_str())
            .unwrap_or(DEFAULT_SIGN_IN_PATH)
            .to_string(),
    })
}

fn setup_get(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let mut out = Map::new();
    for section in ALL_SECTIONS {
        let v = load_section(conn, section).map_err(|e| HandlerErr::db("db_query_failed", e))?;
        out.insert(section.name().to_string(), v);
    }
    Ok(Value::Object(out))
}

fn setup_update(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let section_raw = get_required_str(params, "section")?;
    let section = SetupSection::parse(&section_raw)
        .ok_or_else(|| HandlerErr::new("bad_params", "unknown section"))?;
    let patch = get_required_object(params, "patch")?;

    let mut current =
        load_section(conn, section).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    merge_section_patch(section, &mut current, patch)
        .map_err(|msg| HandlerErr::new("bad_params", msg))?;
    db::settings_set_json(conn, &section.key(), &current)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    if section == SetupSection::Attendance {
        let rule = marking_day(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
        if let Some(ledger) = state.ledger.as_mut() {
            ledger.set_marking_day(rule);
        }
    }
    info!(
        "event=setup_updated module=setup status=ok section={} fields={}",
        section.name(),
        patch.len()
    );
    Ok(json!({ "section": section.name(), "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(respond(&req.id, setup_get(state))),
        "setup.update" => Some(respond(&req.id, setup_update(state, &req.params))),
        _ => None,
    }
}
