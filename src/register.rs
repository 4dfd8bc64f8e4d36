use crate::db;
use crate::ident;
use crate::model::{is_academic_year, LegacyStudent, Student};
use anyhow::Context;
use log::{info, warn};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

pub const OTHER_CHOICE: &str = "Other";
pub const OCCUPATION_STUDENT: &str = "Student";
pub const OCCUPATION_WORKER: &str = "Worker";

pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationForm {
    pub first_name: String,
    pub father_name: String,
    pub grandfather_name: String,
    pub mothers_name: String,
    pub christian_name: String,
    pub dob_date: String,
    pub dob_month: String,
    pub dob_year: String,
    pub sex: String,
    pub phone_number: String,
    pub class: String,
    pub occupation: String,
    pub school: String,
    pub school_other: String,
    pub educational_background: String,
    pub place_of_work: String,
    pub address: String,
    pub address_other: String,
    pub academic_year: String,
    pub grade: String,
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("registration form has {} invalid field(s)", .0.len())]
    Invalid(FieldErrors),
    #[error("student already exists as {unique_id}")]
    Duplicate { id: String, unique_id: String },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

fn label(key: &str) -> String {
    key.replacen('_', " ", 1)
}

fn has_digit(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_digit())
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

impl RegistrationForm {
    fn trimmed(&self) -> Self {
        let t = |s: &String| s.trim().to_string();
        Self {
            first_name: t(&self.first_name),
            father_name: t(&self.father_name),
            grandfather_name: t(&self.grandfather_name),
            mothers_name: t(&self.mothers_name),
            christian_name: t(&self.christian_name),
            dob_date: t(&self.dob_date),
            dob_month: t(&self.dob_month),
            dob_year: t(&self.dob_year),
            sex: t(&self.sex),
            phone_number: t(&self.phone_number),
            class: t(&self.class),
            occupation: t(&self.occupation),
            school: t(&self.school),
            school_other: t(&self.school_other),
            educational_background: t(&self.educational_background),
            place_of_work: t(&self.place_of_work),
            address: t(&self.address),
            address_other: t(&self.address_other),
            academic_year: t(&self.academic_year),
            grade: t(&self.grade),
        }
    }

    fn required(&self) -> [(&'static str, &str); 14] {
        [
            ("First_Name", self.first_name.as_str()),
            ("Father_Name", self.father_name.as_str()),
            ("Grandfather_Name", self.grandfather_name.as_str()),
            ("Mothers_Name", self.mothers_name.as_str()),
            ("Christian_Name", self.christian_name.as_str()),
            ("DOB_Date", self.dob_date.as_str()),
            ("DOB_Month", self.dob_month.as_str()),
            ("DOB_Year", self.dob_year.as_str()),
            ("Sex", self.sex.as_str()),
            ("Occupation", self.occupation.as_str()),
            ("Address", self.address.as_str()),
            ("Academic_Year", self.academic_year.as_str()),
            ("Phone_Number", self.phone_number.as_str()),
            ("Grade", self.grade.as_str()),
        ]
    }

    fn text_fields(&self) -> [(&'static str, &str); 8] {
        [
            ("First_Name", self.first_name.as_str()),
            ("Father_Name", self.father_name.as_str()),
            ("Grandfather_Name", self.grandfather_name.as_str()),
            ("Mothers_Name", self.mothers_name.as_str()),
            ("Christian_Name", self.christian_name.as_str()),
            ("Sex", self.sex.as_str()),
            ("Occupation", self.occupation.as_str()),
            ("Address", self.address.as_str()),
        ]
    }

    fn number_fields(&self) -> [(&'static str, &str); 5] {
        [
            ("DOB_Date", self.dob_date.as_str()),
            ("DOB_Month", self.dob_month.as_str()),
            ("DOB_Year", self.dob_year.as_str()),
            ("Phone_Number", self.phone_number.as_str()),
            ("Academic_Year", self.academic_year.as_str()),
        ]
    }
}

pub fn validate_form(form: &RegistrationForm) -> FieldErrors {
    let f = form.trimmed();
    let mut errors = FieldErrors::new();

    for (key, value) in f.required() {
        if value.is_empty() {
            errors.insert(key.to_string(), format!("{} is required", label(key)));
        }
    }
    if f.occupation == OCCUPATION_STUDENT && f.class.is_empty() {
        errors.insert("Class".into(), "Class is required for students".into());
    }
    for (key, value) in f.text_fields() {
        if has_digit(value) {
            errors.insert(key.to_string(), format!("{} cannot contain numbers", label(key)));
        }
    }
    for (key, value) in f.number_fields() {
        if !value.is_empty() && !all_digits(value) {
            errors.insert(key.to_string(), format!("{} must contain numbers only", label(key)));
        }
    }
    if all_digits(&f.academic_year) && !is_academic_year(&f.academic_year) {
        errors.insert("Academic_Year".into(), "Academic Year must be 4 digits".into());
    }

    if f.occupation == OCCUPATION_STUDENT && f.school.is_empty() {
        errors.insert("School".into(), "School is required for students".into());
    }
    if f.occupation == OCCUPATION_WORKER {
        if f.educational_background.is_empty() {
            errors.insert(
                "Educational_Background".into(),
                "Educational Background is required for workers".into(),
            );
        }
        if f.place_of_work.is_empty() {
            errors.insert(
                "Place_of_Work".into(),
                "Place of Work is required for workers".into(),
            );
        }
    }
    if f.address == OTHER_CHOICE && f.address_other.is_empty() {
        errors.insert("Address_Other".into(), "Please specify address".into());
    }
    if f.school == OTHER_CHOICE && f.school_other.is_empty() {
        errors.insert("School_Other".into(), "Please specify school".into());
    }
    errors
}

pub fn compute_age(current_year: i64, dob_year: &str) -> Option<i64> {
    let dob: i64 = dob_year.trim().parse().ok()?;
    let age = current_year - dob;
    (age >= 0).then_some(age)
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

pub fn form_to_student(form: &RegistrationForm, current_year: i64) -> Student {
    let f = form.trimmed();
    let school = if f.school == OTHER_CHOICE {
        f.school_other
    } else {
        f.school
    };
    let address = if f.address == OTHER_CHOICE {
        f.address_other
    } else {
        f.address
    };
    Student {
        id: String::new(),
        unique_id: String::new(),
        age: compute_age(current_year, &f.dob_year),
        first_name: f.first_name,
        father_name: f.father_name,
        grandfather_name: f.grandfather_name,
        mothers_name: f.mothers_name,
        christian_name: f.christian_name,
        dob_date: f.dob_date,
        dob_month: f.dob_month,
        dob_year: f.dob_year,
        sex: f.sex,
        phone_number: f.phone_number,
        class: f.class,
        occupation: f.occupation,
        school: non_empty(school),
        educational_background: non_empty(f.educational_background),
        place_of_work: non_empty(f.place_of_work),
        address,
        academic_year: f.academic_year,
        grade: f.grade,
    }
}

/// Stores `student` with a fresh row id and registration code.
pub fn register_student(
    conn: &mut Connection,
    student: Student,
    id_prefix: &str,
) -> Result<Student, RegisterError> {
    let tx = conn.transaction().context("failed to start transaction")?;

    if let Some(existing) = db::find_duplicate(&tx, &student.dedup_key())? {
        return Err(RegisterError::Duplicate {
            id: existing.id,
            unique_id: existing.unique_id,
        });
    }

    let counter_key = ident::registration_counter_key(&student.academic_year, &student.grade);
    let current = db::count_registrations(&tx, &student.academic_year, &student.grade)
        .and_then(|n| db::next_sequence(&tx, &counter_key, n))
        .map(|seq| seq - 1);
    let unique_id = ident::code_from_count(
        id_prefix,
        &student.academic_year,
        &student.grade,
        current,
    );
    let record = Student {
        id: uuid::Uuid::new_v4().to_string(),
        unique_id,
        ..student
    };

    if let Err(e) = db::insert_student(&tx, &record) {
        if db::is_unique_violation(&e) {
            drop(tx);
            let existing = db::find_duplicate(conn, &record.dedup_key())?.unwrap_or_default();
            return Err(RegisterError::Duplicate {
                id: existing.id,
                unique_id: existing.unique_id,
            });
        }
        return Err(RegisterError::Store(e));
    }
    tx.commit().context("failed to commit registration")?;

    info!(
        "event=student_registered module=register status=ok student_id={} grade_code={}",
        record.id,
        ident::grade_code(&record.grade)
    );
    Ok(record)
}

pub fn validate_legacy_fields(s: &LegacyStudent) -> FieldErrors {
    let mut errors = FieldErrors::new();
    for (key, value) in [
        ("First_Name", s.first_name.trim()),
        ("Last_Name", s.last_name.trim()),
        ("Sex", s.sex.trim()),
        ("Class", s.class.trim()),
        ("Occupation", s.occupation.trim()),
        ("Academic_Year", s.academic_year.trim()),
    ] {
        if value.is_empty() {
            errors.insert(key.to_string(), format!("{} is required", label(key)));
        }
    }
    let year = s.academic_year.trim();
    if !year.is_empty() && !is_academic_year(year) {
        errors.insert("Academic_Year".into(), "Academic Year must be 4 digits".into());
    }
    errors
}

/// Stores a legacy record under the next `yy####` number for its year.
pub fn register_legacy_student(
    conn: &mut Connection,
    student: LegacyStudent,
) -> Result<LegacyStudent, RegisterError> {
    let errors = validate_legacy_fields(&student);
    if !errors.is_empty() {
        return Err(RegisterError::Invalid(errors));
    }
    let tx = conn.transaction().context("failed to start transaction")?;
    let year = student.academic_year.trim().to_string();
    let seed = db::count_legacy_registrations(&tx, &year)?;
    // The number is the record key, so there is no fallback here.
    let seq = db::next_sequence(&tx, &ident::legacy_counter_key(&year), seed)
        .context("failed to reserve legacy id number")?;
    let record = LegacyStudent {
        id: uuid::Uuid::new_v4().to_string(),
        id_number: ident::legacy_id_number(&year, seq),
        academic_year: year,
        ..student
    };
    db::insert_legacy_student(&tx, &record)?;
    tx.commit().context("failed to commit legacy registration")?;
    info!(
        "event=legacy_student_registered module=register status=ok student_id={} id_number={}",
        record.id, record.id_number
    );
    Ok(record)
}

const IMMUTABLE_FIELDS: [&str; 2] = ["id", "uniqueId"];
const PATCHABLE_FIELDS: [&str; 19] = [
    "firstName",
    "fatherName",
    "grandfatherName",
    "mothersName",
    "christianName",
    "dobDate",
    "dobMonth",
    "dobYear",
    "age",
    "sex",
    "phoneNumber",
    "class",
    "occupation",
    "school",
    "educationalBackground",
    "placeOfWork",
    "address",
    "academicYear",
    "grade",
];

pub fn apply_patch(current: &Student, patch: &Map<String, Value>) -> Result<Student, FieldErrors> {
    let mut errors = FieldErrors::new();
    let mut doc = match serde_json::to_value(current) {
        Ok(Value::Object(m)) => m,
        _ => {
            errors.insert("_record".into(), "stored record is not an object".into());
            return Err(errors);
        }
    };
    for (k, v) in patch {
        if IMMUTABLE_FIELDS.contains(&k.as_str()) {
            errors.insert(k.clone(), format!("{} cannot be changed", k));
        } else if !PATCHABLE_FIELDS.contains(&k.as_str()) {
            errors.insert(k.clone(), format!("unknown field: {}", k));
        } else {
            doc.insert(k.clone(), v.clone());
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }
    let updated: Student = match serde_json::from_value(Value::Object(doc)) {
        Ok(s) => s,
        Err(e) => {
            warn!("event=student_patch_rejected module=register status=bad_params error={}", e);
            errors.insert("_patch".into(), e.to_string());
            return Err(errors);
        }
    };
    for (key, value) in [
        ("First_Name", &updated.first_name),
        ("Father_Name", &updated.father_name),
        ("Sex", &updated.sex),
        ("Academic_Year", &updated.academic_year),
        ("Grade", &updated.grade),
    ] {
        if value.trim().is_empty() {
            errors.insert(key.to_string(), format!("{} is required", label(key)));
        }
    }
    if !updated.academic_year.trim().is_empty() && !is_academic_year(updated.academic_year.trim()) {
        errors.insert("Academic_Year".into(), "Academic Year must be 4 digits".into());
    }
    if errors.is_empty() {
        Ok(updated)
    } else {
        Err(errors)
    }
}
