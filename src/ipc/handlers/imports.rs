use crate::import::{self, ImportError, ImportSchema, ParsedSheet, RowError};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{get_optional_str, get_required_str, require_db_mut};
use crate::ipc::types::{AppState, Request};
use crate::register::{self, RegisterError};
use crate::sheet;
use log::{info, warn};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;

fn import_error(e: ImportError) -> HandlerErr {
    match e {
        ImportError::HeaderMismatch { expected, found } => {
            HandlerErr::new("bad_headers", "header row does not match the expected columns")
                .with_details(json!({ "expected": expected, "found": found }))
        }
        ImportError::EmptySheet => HandlerErr::new("bad_headers", "the sheet has no header row"),
    }
}

fn row_error_from_register(line: usize, e: RegisterError) -> RowError {
    match e {
        RegisterError::Duplicate { unique_id, .. } => RowError::new(
            line,
            "duplicate",
            format!("student already exists as {}", unique_id),
        ),
        RegisterError::Invalid(fields) => {
            let list: Vec<String> = fields.values().cloned().collect();
            RowError::new(line, "invalid_fields", list.join("; "))
        }
        RegisterError::Store(e) => RowError::new(line, "db_insert_failed", format!("{e:#}")),
    }
}

/// Writes every parsed row in file order. A row the store refuses joins the
/// per-row errors; the rest carry on.
fn store_rows<T, F>(
    conn: &mut Connection,
    parsed: ParsedSheet<T>,
    mut store: F,
) -> (Vec<Value>, Vec<RowError>, usize)
where
    F: FnMut(&mut Connection, T) -> Result<Value, RegisterError>,
{
    let mut imported = Vec::new();
    let mut errors = parsed.errors;
    for row in parsed.rows {
        match store(conn, row.record) {
            Ok(v) => imported.push(json!({ "line": row.line, "student": v })),
            Err(e) => errors.push(row_error_from_register(row.line, e)),
        }
    }
    errors.sort_by_key(|e| e.line);
    (imported, errors, parsed.rows_total)
}

fn students_import(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db_mut(&mut state.db)?;
    let in_path = PathBuf::from(get_required_str(params, "inPath")?);
    let schema_raw = get_optional_str(params, "schema")?.unwrap_or_default();
    let schema = ImportSchema::parse(&schema_raw)
        .ok_or_else(|| HandlerErr::new("bad_params", "schema must be registration or legacy"))?;

    let sheet = sheet::read_sheet(&in_path).map_err(|e| {
        warn!(
            "event=import_unreadable module=imports status=error schema={} error={:#}",
            schema.as_str(),
            e
        );
        HandlerErr::new("parse_failed", format!("{e:#}"))
    })?;

    let (imported, errors, rows_total) = match schema {
        ImportSchema::Registration => {
            let parsed = import::parse_registration_sheet(&sheet).map_err(import_error)?;
            let settings = setup::registration_settings(conn)
                .map_err(|e| HandlerErr::db("db_query_failed", e))?;
            store_rows(conn, parsed, |c, s| {
                let stored = register::register_student(c, s, &settings.id_prefix)?;
                Ok(json!({ "id": stored.id, "uniqueId": stored.unique_id }))
            })
        }
        ImportSchema::Legacy => {
            let parsed = import::parse_legacy_sheet(&sheet).map_err(import_error)?;
            store_rows(conn, parsed, |c, s| {
                let stored = register::register_legacy_student(c, s)?;
                Ok(json!({ "id": stored.id, "idNumber": stored.id_number }))
            })
        }
    };

    info!(
        "event=import_finished module=imports status=ok schema={} rows_total={} imported={} skipped={}",
        schema.as_str(),
        rows_total,
        imported.len(),
        errors.len()
    );
    Ok(json!({
        "schema": schema.as_str(),
        "rowsTotal": rows_total,
        "imported": imported.len(),
        "skipped": errors.len(),
        "students": imported,
        "errors": errors,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.import" => Some(respond(&req.id, students_import(state, &req.params))),
        _ => None,
    }
}
