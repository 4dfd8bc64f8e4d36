use crate::model::{is_academic_year, LegacyStudent, Student};
use crate::sheet::Sheet;
use serde::Serialize;
use thiserror::Error;

pub const REGISTRATION_HEADERS: [&str; 14] = [
    "First_Name",
    "Father_Name",
    "Grandfather_Name",
    "Mothers_Name",
    "Christian_Name",
    "Phone_Number",
    "Age",
    "Sex",
    "Class",
    "Occupation",
    "Educational_Background",
    "Address",
    "Academic_Year",
    "Grade",
];

pub const LEGACY_HEADERS: [&str; 11] = [
    "First_Name",
    "Last_Name",
    "Spiritual_Name",
    "Phone_Number",
    "Age",
    "Sex",
    "Class",
    "Occupation",
    "Education_Background",
    "Address",
    "Academic_Year",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportSchema {
    Registration,
    Legacy,
}

impl ImportSchema {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "registration" | "" => Some(Self::Registration),
            "legacy" => Some(Self::Legacy),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Legacy => "legacy",
        }
    }

    pub fn headers(self) -> &'static [&'static str] {
        match self {
            Self::Registration => &REGISTRATION_HEADERS,
            Self::Legacy => &LEGACY_HEADERS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("the sheet is empty")]
    EmptySheet,
    #[error("header row does not match; expected: {}", .expected.join(", "))]
    HeaderMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
}

/// A skipped data row. `row` counts data rows from 1; `line` is the sheet
/// line including the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row: usize,
    pub line: usize,
    pub code: String,
    pub message: String,
}

impl RowError {
    pub fn new(line: usize, code: &str, message: impl Into<String>) -> Self {
        Self {
            row: line.saturating_sub(1),
            line,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow<T> {
    pub line: usize,
    pub record: T,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSheet<T> {
    pub rows: Vec<ParsedRow<T>>,
    pub errors: Vec<RowError>,
    pub rows_total: usize,
}

pub fn check_headers(schema: ImportSchema, header: &[String]) -> Result<(), ImportError> {
    let mut found: Vec<String> = header.iter().map(|h| h.trim().to_string()).collect();
    while found.last().map(|h| h.is_empty()).unwrap_or(false) {
        found.pop();
    }
    let expected = schema.headers();
    if found.len() == expected.len() && found.iter().zip(expected.iter()).all(|(f, e)| f == e) {
        return Ok(());
    }
    Err(ImportError::HeaderMismatch {
        expected: expected.iter().map(|s| s.to_string()).collect(),
        found,
    })
}

fn cell(fields: &[String], idx: usize) -> String {
    fields.get(idx).map(|s| s.trim().to_string()).unwrap_or_default()
}

fn optional(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn parse_age(raw: &str) -> Result<Option<i64>, ()> {
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return if n >= 0 { Ok(Some(n)) } else { Err(()) };
    }
    match raw.parse::<f64>() {
        Ok(f) if f >= 0.0 && f.fract() == 0.0 => Ok(Some(f as i64)),
        _ => Err(()),
    }
}

fn missing_fields(pairs: &[(&str, &str)]) -> Vec<String> {
    pairs
        .iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(k, _)| k.to_string())
        .collect()
}

fn is_blank(fields: &[String]) -> bool {
    fields.iter().all(|f| f.trim().is_empty())
}

pub fn parse_registration_sheet(sheet: &Sheet) -> Result<ParsedSheet<Student>, ImportError> {
    let header = sheet.header().ok_or(ImportError::EmptySheet)?;
    check_headers(ImportSchema::Registration, header)?;

    let mut out = ParsedSheet {
        rows: Vec::new(),
        errors: Vec::new(),
        rows_total: 0,
    };
    for (line, fields) in sheet.data_rows() {
        if is_blank(fields) {
            continue;
        }
        out.rows_total += 1;
        let s = Student {
            first_name: cell(fields, 0),
            father_name: cell(fields, 1),
            grandfather_name: cell(fields, 2),
            mothers_name: cell(fields, 3),
            christian_name: cell(fields, 4),
            phone_number: cell(fields, 5),
            sex: cell(fields, 7),
            class: cell(fields, 8),
            occupation: cell(fields, 9),
            educational_background: optional(cell(fields, 10)),
            address: cell(fields, 11),
            academic_year: cell(fields, 12),
            grade: cell(fields, 13),
            ..Student::default()
        };

        let missing = missing_fields(&[
            ("First_Name", s.first_name.as_str()),
            ("Father_Name", s.father_name.as_str()),
            ("Sex", s.sex.as_str()),
            ("Occupation", s.occupation.as_str()),
            ("Address", s.address.as_str()),
            ("Academic_Year", s.academic_year.as_str()),
            ("Grade", s.grade.as_str()),
        ]);
        if !missing.is_empty() {
            out.errors.push(RowError::new(
                line,
                "missing_fields",
                format!("required fields are empty: {}", missing.join(", ")),
            ));
            continue;
        }
        if !is_academic_year(&s.academic_year) {
            out.errors.push(RowError::new(
                line,
                "invalid_academic_year",
                format!("Academic_Year must be 4 digits, got {:?}", s.academic_year),
            ));
            continue;
        }
        let age_raw = cell(fields, 6);
        let Ok(age) = parse_age(&age_raw) else {
            out.errors.push(RowError::new(
                line,
                "invalid_age",
                format!("Age must be a whole number, got {:?}", age_raw),
            ));
            continue;
        };
        out.rows.push(ParsedRow {
            line,
            record: Student { age, ..s },
        });
    }
    Ok(out)
}

pub fn parse_legacy_sheet(sheet: &Sheet) -> Result<ParsedSheet<LegacyStudent>, ImportError> {
    let header = sheet.header().ok_or(ImportError::EmptySheet)?;
    check_headers(ImportSchema::Legacy, header)?;

    let mut out = ParsedSheet {
        rows: Vec::new(),
        errors: Vec::new(),
        rows_total: 0,
    };
    for (line, fields) in sheet.data_rows() {
        if is_blank(fields) {
            continue;
        }
        out.rows_total += 1;
        let s = LegacyStudent {
            first_name: cell(fields, 0),
            last_name: cell(fields, 1),
            spiritual_name: cell(fields, 2),
            phone_number: cell(fields, 3),
            sex: cell(fields, 5),
            class: cell(fields, 6),
            occupation: cell(fields, 7),
            education_background: cell(fields, 8),
            address: cell(fields, 9),
            academic_year: cell(fields, 10),
            ..LegacyStudent::default()
        };
        if let Err(e) = validate_legacy(&s, line) {
            out.errors.push(e);
            continue;
        }
        let age_raw = cell(fields, 4);
        let Ok(age) = parse_age(&age_raw) else {
            out.errors.push(RowError::new(
                line,
                "invalid_age",
                format!("Age must be a whole number, got {:?}", age_raw),
            ));
            continue;
        };
        out.rows.push(ParsedRow {
            line,
            record: LegacyStudent { age, ..s },
        });
    }
    Ok(out)
}

pub fn validate_legacy(s: &LegacyStudent, line: usize) -> Result<(), RowError> {
    let missing = missing_fields(&[
        ("First_Name", s.first_name.as_str()),
        ("Last_Name", s.last_name.as_str()),
        ("Sex", s.sex.as_str()),
        ("Class", s.class.as_str()),
        ("Occupation", s.occupation.as_str()),
        ("Academic_Year", s.academic_year.as_str()),
    ]);
    if !missing.is_empty() {
        return Err(RowError::new(
            line,
            "missing_fields",
            format!("required fields are empty: {}", missing.join(", ")),
        ));
    }
    if !is_academic_year(&s.academic_year) {
        return Err(RowError::new(
            line,
            "invalid_academic_year",
            format!("Academic_Year must be 4 digits, got {:?}", s.academic_year),
        ));
    }
    Ok(())
}
