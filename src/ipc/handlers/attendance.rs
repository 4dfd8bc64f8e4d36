use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::handlers::students::roster_query;
use crate::ipc::helpers::{get_optional_str, get_required_str, no_workspace, require_db};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{AttendanceLedger, AttendanceState, LedgerError};
use crate::report;
use crate::roster;
use chrono::NaiveDate;
use log::{info, warn};
use serde_json::{json, Value};
use std::path::PathBuf;

fn ledger_error(e: LedgerError) -> HandlerErr {
    match e {
        LedgerError::ClosedDay { date, rule } => HandlerErr::new(
            "closed_day",
            format!("attendance can only be taken on {}", rule),
        )
        .with_details(json!({ "date": report::format_date(date), "markingDay": rule })),
        LedgerError::NothingMarked { date } => HandlerErr::new(
            "nothing_marked",
            "mark at least one student as Present or with Permission before submitting",
        )
        .with_details(json!({ "date": report::format_date(date) })),
        LedgerError::Export(e) => HandlerErr::new("export_failed", format!("{e:#}")),
    }
}

fn no_ledger() -> HandlerErr {
    HandlerErr::new("no_ledger", "open an attendance date first")
}

fn parse_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::new("bad_params", "date must be YYYY-MM-DD"))
}

fn ledger_summary(ledger: &AttendanceLedger) -> Value {
    json!({
        "date": report::format_date(ledger.date()),
        "open": ledger.is_open(),
        "markingDay": ledger.marking_day().label(),
        "marked": ledger.marked_count(),
    })
}

/// Starts the ledger on `date`, or moves an existing one there. Marks on
/// other dates survive the move.
fn attendance_open(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let date = parse_date(&get_required_str(params, "date")?)?;
    let rule = setup::marking_day(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    match state.ledger.as_mut() {
        Some(l) => {
            l.set_date(date);
            l.set_marking_day(rule);
        }
        None => state.ledger = Some(AttendanceLedger::new(date, rule)),
    }
    let ledger = state.ledger.as_ref().ok_or_else(no_ledger)?;
    info!(
        "event=attendance_opened module=attendance status=ok date={} open={}",
        report::format_date(date),
        ledger.is_open()
    );
    Ok(ledger_summary(ledger))
}

fn attendance_get(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let ledger = state.ledger.as_ref().ok_or_else(no_ledger)?;
    let q = roster_query(params)?;
    let all = db::list_students(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows: Vec<Value> = roster::filter_roster(&all, &q)
        .into_iter()
        .map(|s| {
            json!({
                "studentId": s.id,
                "uniqueId": s.unique_id,
                "firstName": s.first_name,
                "fatherName": s.father_name,
                "class": s.class,
                "grade": s.grade,
                "status": ledger.state_of(&s.id),
            })
        })
        .collect();
    let mut out = ledger_summary(ledger);
    out["students"] = Value::Array(rows);
    Ok(out)
}

#[derive(Clone, Copy)]
enum Transition {
    TogglePresent,
    TogglePermission,
    MarkAbsent,
}

fn attendance_mark(
    state: &mut AppState,
    params: &Value,
    transition: Transition,
) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let student_id = get_required_str(params, "studentId")?;
    if db::get_student(conn, &student_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .is_none()
    {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    let ledger = state.ledger.as_mut().ok_or_else(no_ledger)?;
    let status: AttendanceState = match transition {
        Transition::TogglePresent => ledger.toggle_attendance(&student_id),
        Transition::TogglePermission => ledger.toggle_permission(&student_id),
        Transition::MarkAbsent => ledger.mark_absent(&student_id),
    }
    .map_err(ledger_error)?;
    Ok(json!({
        "studentId": student_id,
        "date": report::format_date(ledger.date()),
        "status": status,
        "marked": ledger.marked_count(),
    }))
}

/// Exports the active date and clears the ledger. Nothing is cleared when
/// the guard, the empty check or the export itself fails.
fn attendance_submit(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let workspace = state.workspace.as_ref().ok_or_else(no_workspace)?;
    let out_dir = match get_optional_str(params, "outDir")? {
        Some(d) => PathBuf::from(d),
        None => setup::export_dir(conn, workspace)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?,
    };
    let ledger = state.ledger.as_mut().ok_or_else(no_ledger)?;
    let roster = db::list_students(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let date = ledger.date();

    let (rows, summary) = ledger
        .submit(&roster, |rows| {
            report::write_attendance_report(&out_dir, date, rows)
        })
        .map_err(|e| {
            warn!(
                "event=attendance_submit_rejected module=attendance status=error date={} reason={}",
                report::format_date(date),
                e
            );
            ledger_error(e)
        })?;
    let tally = report::tally(&rows);
    info!(
        "event=attendance_submitted module=attendance status=ok date={} rows={} present={} permission={} absent={}",
        report::format_date(date),
        summary.rows_exported,
        tally.present,
        tally.permission,
        tally.absent
    );
    Ok(json!({
        "date": report::format_date(date),
        "path": summary.path.to_string_lossy(),
        "fileName": summary.file_name,
        "rowsExported": summary.rows_exported,
        "tally": tally,
        "sha256": summary.sha256,
    }))
}

fn attendance_reset(state: &mut AppState) -> Result<Value, HandlerErr> {
    let ledger = state.ledger.as_mut().ok_or_else(no_ledger)?;
    let cleared = ledger.records().len();
    ledger.clear();
    info!(
        "event=attendance_reset module=attendance status=ok cleared={}",
        cleared
    );
    Ok(json!({ "cleared": cleared }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "attendance.open" => attendance_open(state, p),
        "attendance.get" => attendance_get(state, p),
        "attendance.togglePresent" => attendance_mark(state, p, Transition::TogglePresent),
        "attendance.togglePermission" => attendance_mark(state, p, Transition::TogglePermission),
        "attendance.markAbsent" => attendance_mark(state, p, Transition::MarkAbsent),
        "attendance.submit" => attendance_submit(state, p),
        "attendance.reset" => attendance_reset(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
