use crate::model::{LegacyStudent, Student};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    UniqueId,
    FullName,
}

impl SortKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uniqueId" => Some(Self::UniqueId),
            "fullName" => Some(Self::FullName),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterQuery {
    pub text: String,
    pub grade: Option<String>,
    pub sex: Option<String>,
    pub class: Option<String>,
    pub sort_by: Option<SortKey>,
}

fn category_matches(filter: &Option<String>, value: &str) -> bool {
    match filter.as_deref() {
        None | Some("") => true,
        Some(f) => f == value,
    }
}

fn text_matches(needle_lower: &str, fields: &[&str]) -> bool {
    needle_lower.is_empty() || fields.iter().any(|f| f.to_lowercase().contains(needle_lower))
}

pub fn matches(student: &Student, q: &RosterQuery) -> bool {
    category_matches(&q.grade, &student.grade)
        && category_matches(&q.sex, &student.sex)
        && category_matches(&q.class, &student.class)
        && text_matches(
            &q.text.to_lowercase(),
            &[
                &student.unique_id,
                &student.first_name,
                &student.father_name,
                &student.grade,
            ],
        )
}

/// Students passing `q`, in roster order unless a sort key is given. Sorting
/// is stable so ties keep roster order.
pub fn filter_roster<'a>(roster: &'a [Student], q: &RosterQuery) -> Vec<&'a Student> {
    let mut out: Vec<&Student> = roster.iter().filter(|s| matches(s, q)).collect();
    match q.sort_by {
        Some(SortKey::UniqueId) => out.sort_by(|a, b| a.unique_id.cmp(&b.unique_id)),
        Some(SortKey::FullName) => out.sort_by_cached_key(|s| s.full_name()),
        None => {}
    }
    out
}

pub fn distinct_values<F>(roster: &[Student], field: F) -> Vec<String>
where
    F: Fn(&Student) -> &str,
{
    let mut out: Vec<String> = Vec::new();
    for s in roster {
        let v = field(s);
        if !v.is_empty() && !out.iter().any(|o| o == v) {
            out.push(v.to_string());
        }
    }
    out
}

pub fn filter_legacy<'a>(roster: &'a [LegacyStudent], text: &str) -> Vec<&'a LegacyStudent> {
    let needle = text.to_lowercase();
    roster
        .iter()
        .filter(|s| {
            s.id_number.contains(text)
                || text_matches(&needle, &[&s.first_name, &s.last_name, &s.class])
        })
        .collect()
}
