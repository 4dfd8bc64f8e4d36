//! In-memory attendance for the active date.
//!
//! # Invariants
//! - At most one mark exists per (student, date); Present and Permission can
//!   never hold together because a mark is a single enum value.
//! - No mark means Absent.
//! - Every mutation, including submit, is refused on dates the marking rule
//!   rejects.
//! - A rejected submit leaves the ledger untouched; a successful one clears it.

use crate::model::Student;
use crate::report::{self, AttendanceRow};
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceState {
    Present,
    Permission,
    Absent,
}

impl AttendanceState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Permission => "Permission",
            Self::Absent => "Absent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Present,
    Permission,
}

impl From<Mark> for AttendanceState {
    fn from(m: Mark) -> Self {
        match m {
            Mark::Present => AttendanceState::Present,
            Mark::Permission => AttendanceState::Permission,
        }
    }
}

pub struct MarkingDay {
    label: String,
    allows: Box<dyn Fn(NaiveDate) -> bool + Send>,
}

impl MarkingDay {
    pub fn weekday(day: Weekday) -> Self {
        Self::custom(weekday_name(day), move |d| d.weekday() == day)
    }

    pub fn any() -> Self {
        Self::custom("any day", |_| true)
    }

    pub fn custom<F>(label: impl Into<String>, allows: F) -> Self
    where
        F: Fn(NaiveDate) -> bool + Send + 'static,
    {
        Self {
            label: label.into(),
            allows: Box::new(allows),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s == "any" {
            return Some(Self::any());
        }
        ALL_WEEKDAYS
            .iter()
            .find(|d| weekday_name(**d) == s)
            .map(|d| Self::weekday(*d))
    }

    pub fn allows(&self, date: NaiveDate) -> bool {
        (self.allows)(date)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for MarkingDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkingDay")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("attendance can only be marked on {rule}; {date} is not allowed")]
    ClosedDay { date: NaiveDate, rule: String },
    #[error("mark at least one student as Present or with Permission before submitting")]
    NothingMarked { date: NaiveDate },
    #[error("failed to export attendance report: {0:#}")]
    Export(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_id: String,
    #[serde(serialize_with = "report::serialize_date")]
    pub date: NaiveDate,
    pub state: AttendanceState,
}

#[derive(Debug)]
pub struct AttendanceLedger {
    date: NaiveDate,
    marking_day: MarkingDay,
    marks: BTreeMap<(String, NaiveDate), Mark>,
}

impl AttendanceLedger {
    pub fn new(date: NaiveDate, marking_day: MarkingDay) -> Self {
        Self {
            date,
            marking_day,
            marks: BTreeMap::new(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Moves to another active date. Marks recorded for other dates are kept
    /// until the next submit or clear.
    pub fn set_date(&mut self, date: NaiveDate) {
        self.date = date;
    }

    pub fn set_marking_day(&mut self, marking_day: MarkingDay) {
        self.marking_day = marking_day;
    }

    pub fn marking_day(&self) -> &MarkingDay {
        &self.marking_day
    }

    pub fn is_open(&self) -> bool {
        self.marking_day.allows(self.date)
    }

    pub fn state_of(&self, student_id: &str) -> AttendanceState {
        self.state_on(student_id, self.date)
    }

    pub fn state_on(&self, student_id: &str, date: NaiveDate) -> AttendanceState {
        self.marks
            .get(&(student_id.to_string(), date))
            .copied()
            .map(AttendanceState::from)
            .unwrap_or(AttendanceState::Absent)
    }

    pub fn toggle_attendance(&mut self, student_id: &str) -> Result<AttendanceState, LedgerError> {
        self.ensure_open()?;
        let next = match self.state_of(student_id) {
            AttendanceState::Present => None,
            _ => Some(Mark::Present),
        };
        Ok(self.put(student_id, next))
    }

    pub fn toggle_permission(&mut self, student_id: &str) -> Result<AttendanceState, LedgerError> {
        self.ensure_open()?;
        let next = match self.state_of(student_id) {
            AttendanceState::Permission => None,
            _ => Some(Mark::Permission),
        };
        Ok(self.put(student_id, next))
    }

    pub fn mark_absent(&mut self, student_id: &str) -> Result<AttendanceState, LedgerError> {
        self.ensure_open()?;
        Ok(self.put(student_id, None))
    }

    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.marks
            .iter()
            .filter(|((_, d), _)| *d == self.date)
            .map(|((sid, d), m)| AttendanceRecord {
                student_id: sid.clone(),
                date: *d,
                state: (*m).into(),
            })
            .collect()
    }

    pub fn marked_count(&self) -> usize {
        self.marks.keys().filter(|(_, d)| *d == self.date).count()
    }

    pub fn clear(&mut self) {
        self.marks.clear();
    }

    /// Drops every mark held for a student who left the roster. This is not
    /// an attendance change, so the marking rule does not apply.
    pub fn forget(&mut self, student_id: &str) -> usize {
        let before = self.marks.len();
        self.marks.retain(|(id, _), _| id != student_id);
        before - self.marks.len()
    }

    /// Closes out the active date.
    pub fn submit<T, F>(&mut self, roster: &[Student], export: F) -> Result<(Vec<AttendanceRow>, T), LedgerError>
    where
        F: FnOnce(&[AttendanceRow]) -> anyhow::Result<T>,
    {
        self.ensure_open()?;
        if self.marked_count() == 0 {
            return Err(LedgerError::NothingMarked { date: self.date });
        }
        let rows = report::attendance_rows(roster, self);
        let out = export(&rows).map_err(LedgerError::Export)?;
        self.clear();
        Ok((rows, out))
    }

    fn ensure_open(&self) -> Result<(), LedgerError> {
        if self.is_open() {
            return Ok(());
        }
        Err(LedgerError::ClosedDay {
            date: self.date,
            rule: self.marking_day.label().to_string(),
        })
    }

    fn put(&mut self, student_id: &str, mark: Option<Mark>) -> AttendanceState {
        let key = (student_id.to_string(), self.date);
        match mark {
            Some(m) => {
                self.marks.insert(key, m);
                m.into()
            }
            None => {
                self.marks.remove(&key);
                AttendanceState::Absent
            }
        }
    }
}
