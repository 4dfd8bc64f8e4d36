use log::warn;

pub const DEFAULT_ID_PREFIX: &str = "ብሕ";
const FALLBACK_GRADE_CODE: &str = "01";
const FALLBACK_ORDINAL: i64 = 1;

pub fn year_suffix(academic_year: &str) -> String {
    let chars: Vec<char> = academic_year.trim().chars().collect();
    let skip = chars.len().saturating_sub(2);
    chars[skip..].iter().collect()
}

/// First run of ASCII digits in `grade`, zero-padded to two places.
/// `"Grade 7"` gives `"07"`; a grade with no digits gives `"01"`.
pub fn grade_code(grade: &str) -> String {
    let digits: String = grade
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return FALLBACK_GRADE_CODE.to_string();
    }
    format!("{:0>2}", digits)
}

pub fn registration_code(prefix: &str, academic_year: &str, grade: &str, ordinal: i64) -> String {
    format!(
        "{}/{}/{}/{:02}",
        prefix,
        year_suffix(academic_year),
        grade_code(grade),
        ordinal
    )
}

/// Builds the code for the registrant after `current_count` existing ones.
pub fn code_from_count(
    prefix: &str,
    academic_year: &str,
    grade: &str,
    current_count: anyhow::Result<i64>,
) -> String {
    let ordinal = match current_count {
        Ok(n) => n + 1,
        Err(e) => {
            warn!(
                "event=ordinal_fallback module=ident status=degraded academic_year={} grade_code={} error={:#}",
                academic_year,
                grade_code(grade),
                e
            );
            FALLBACK_ORDINAL
        }
    };
    registration_code(prefix, academic_year, grade, ordinal)
}

pub fn registration_counter_key(academic_year: &str, grade: &str) -> String {
    format!("registration:{}:{}", academic_year.trim(), grade.trim())
}

pub fn legacy_counter_key(academic_year: &str) -> String {
    format!("student_{}", academic_year.trim())
}

pub fn legacy_id_number(academic_year: &str, seq: i64) -> String {
    format!("{}{:04}", year_suffix(academic_year), seq)
}
