use crate::ledger::{AttendanceLedger, AttendanceState};
use crate::model::Student;
use crate::sheet::{self, Sheet};
use anyhow::Context;
use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const ATTENDANCE_SHEET_NAME: &str = "Attendance";
pub const ATTENDANCE_HEADERS: [&str; 6] = [
    "Unique_ID",
    "First_Name",
    "Father_Name",
    "Class",
    "Status",
    "Date",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRow {
    pub student_id: String,
    pub unique_id: String,
    pub first_name: String,
    pub father_name: String,
    pub class: String,
    pub status: AttendanceState,
    #[serde(serialize_with = "serialize_date")]
    pub date: NaiveDate,
}

impl AttendanceRow {
    fn cells(&self) -> Vec<String> {
        vec![
            self.unique_id.clone(),
            self.first_name.clone(),
            self.father_name.clone(),
            self.class.clone(),
            self.status.label().to_string(),
            format_date(self.date),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusTally {
    pub present: usize,
    pub permission: usize,
    pub absent: usize,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub file_name: String,
    pub rows_exported: usize,
    pub sha256: String,
}

/// One row per roster entry, in roster order, for the ledger's active date.
pub fn attendance_rows(roster: &[Student], ledger: &AttendanceLedger) -> Vec<AttendanceRow> {
    let date = ledger.date();
    roster
        .iter()
        .map(|s| AttendanceRow {
            student_id: s.id.clone(),
            unique_id: s.unique_id.clone(),
            first_name: s.first_name.clone(),
            father_name: s.father_name.clone(),
            class: s.class.clone(),
            status: ledger.state_on(&s.id, date),
            date,
        })
        .collect()
}

pub fn tally(rows: &[AttendanceRow]) -> StatusTally {
    let mut t = StatusTally::default();
    for r in rows {
        match r.status {
            AttendanceState::Present => t.present += 1,
            AttendanceState::Permission => t.permission += 1,
            AttendanceState::Absent => t.absent += 1,
        }
    }
    t
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn serialize_date<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_date(*date))
}

pub fn report_file_name(date: NaiveDate) -> String {
    format!("Attendance_{}.xlsx", format_date(date))
}

pub fn attendance_sheet(rows: &[AttendanceRow]) -> Sheet {
    let mut out = Vec::with_capacity(rows.len() + 1);
    out.push(ATTENDANCE_HEADERS.iter().map(|h| h.to_string()).collect());
    out.extend(rows.iter().map(AttendanceRow::cells));
    Sheet {
        name: ATTENDANCE_SHEET_NAME.to_string(),
        rows: out,
    }
}

/// Writes `Attendance_<date>.xlsx` into `out_dir` and returns its digest.
pub fn write_attendance_report(
    out_dir: &Path,
    date: NaiveDate,
    rows: &[AttendanceRow],
) -> anyhow::Result<ExportSummary> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create directory {}", out_dir.to_string_lossy()))?;
    let file_name = report_file_name(date);
    let path = out_dir.join(&file_name);
    sheet::write_sheet(&path, &attendance_sheet(rows))?;
    let bytes = std::fs::read(&path)
        .with_context(|| format!("failed to read back {}", path.to_string_lossy()))?;
    let sha256 = format!("{:x}", Sha256::digest(&bytes));
    Ok(ExportSummary {
        path,
        file_name,
        rows_exported: rows.len(),
        sha256,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MarkingDay;

    fn roster() -> Vec<Student> {
        ["a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(i, id)| Student {
                id: id.to_string(),
                unique_id: format!("ብሕ/17/07/{:02}", i + 1),
                first_name: format!("F{i}"),
                father_name: format!("P{i}"),
                class: "6".to_string(),
                ..Student::default()
            })
            .collect()
    }

    fn sunday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 8).expect("date")
    }

    #[test]
    fn status_column_follows_ledger() {
        let mut l = AttendanceLedger::new(sunday(), MarkingDay::any());
        l.toggle_attendance("a").unwrap();
        l.toggle_permission("c").unwrap();
        let rows = attendance_rows(&roster(), &l);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].status, AttendanceState::Present);
        assert_eq!(rows[1].status, AttendanceState::Absent);
        assert_eq!(rows[2].status, AttendanceState::Permission);
        assert_eq!(
            tally(&rows),
            StatusTally {
                present: 1,
                permission: 1,
                absent: 1
            }
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut l = AttendanceLedger::new(sunday(), MarkingDay::any());
        l.toggle_attendance("b").unwrap();
        let first = attendance_sheet(&attendance_rows(&roster(), &l));
        let second = attendance_sheet(&attendance_rows(&roster(), &l));
        assert_eq!(first, second);
        assert_eq!(first.name, "Attendance");
        assert_eq!(first.rows[0], ATTENDANCE_HEADERS.map(String::from).to_vec());
        assert_eq!(
            first.rows[2],
            vec!["ብሕ/17/07/02", "F1", "P1", "6", "Present", "2025-06-08"]
        );
    }

    #[test]
    fn rows_serialize_dates_as_iso_strings() {
        let mut l = AttendanceLedger::new(sunday(), MarkingDay::any());
        l.toggle_permission("a").unwrap();
        let rows = attendance_rows(&roster(), &l);
        let v = serde_json::to_value(&rows[0]).expect("serialize row");
        assert_eq!(v["date"], serde_json::json!("2025-06-08"));
        assert_eq!(v["status"], serde_json::json!("permission"));
        assert_eq!(v["uniqueId"], serde_json::json!("ብሕ/17/07/01"));
    }

    #[test]
    fn file_name_uses_iso_date() {
        assert_eq!(report_file_name(sunday()), "Attendance_2025-06-08.xlsx");
    }
}
