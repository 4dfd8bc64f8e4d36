use serde::{Deserialize, Serialize};

/// A registered student. `unique_id` is assigned once at registration and
/// never rewritten; `id` is the internal row key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Student {
    pub id: String,
    pub unique_id: String,
    pub first_name: String,
    pub father_name: String,
    pub grandfather_name: String,
    pub mothers_name: String,
    pub christian_name: String,
    pub dob_date: String,
    pub dob_month: String,
    pub dob_year: String,
    pub age: Option<i64>,
    pub sex: String,
    pub phone_number: String,
    pub class: String,
    pub occupation: String,
    pub school: Option<String>,
    pub educational_background: Option<String>,
    pub place_of_work: Option<String>,
    pub address: String,
    pub academic_year: String,
    pub grade: String,
}

impl Student {
    pub fn full_name(&self) -> String {
        [
            self.first_name.as_str(),
            self.father_name.as_str(),
            self.grandfather_name.as_str(),
        ]
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            first_name: self.first_name.clone(),
            father_name: self.father_name.clone(),
            grandfather_name: self.grandfather_name.clone(),
            mothers_name: self.mothers_name.clone(),
            sex: self.sex.clone(),
        }
    }
}

/// Exact tuple used to reject repeat registrations. Transliteration variants
/// of the same person do not collide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DedupKey {
    pub first_name: String,
    pub father_name: String,
    pub grandfather_name: String,
    pub mothers_name: String,
    pub sex: String,
}

impl DedupKey {
    pub fn trimmed(self) -> Self {
        Self {
            first_name: self.first_name.trim().to_string(),
            father_name: self.father_name.trim().to_string(),
            grandfather_name: self.grandfather_name.trim().to_string(),
            mothers_name: self.mothers_name.trim().to_string(),
            sex: self.sex.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyStudent {
    pub id: String,
    pub id_number: String,
    pub first_name: String,
    pub last_name: String,
    pub spiritual_name: String,
    pub phone_number: String,
    pub age: Option<i64>,
    pub sex: String,
    pub class: String,
    pub occupation: String,
    pub education_background: String,
    pub address: String,
    pub academic_year: String,
}

pub fn is_academic_year(s: &str) -> bool {
    s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit())
}
