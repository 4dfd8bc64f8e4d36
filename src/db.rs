use crate::model::{DedupKey, LegacyStudent, Student};
use anyhow::Context;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;

pub const DB_FILE_NAME: &str = "rollbook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            unique_id TEXT NOT NULL,
            first_name TEXT NOT NULL,
            father_name TEXT NOT NULL,
            grandfather_name TEXT NOT NULL,
            mothers_name TEXT NOT NULL,
            christian_name TEXT NOT NULL,
            dob_date TEXT NOT NULL,
            dob_month TEXT NOT NULL,
            dob_year TEXT NOT NULL,
            age INTEGER,
            sex TEXT NOT NULL,
            phone_number TEXT NOT NULL,
            class TEXT NOT NULL,
            occupation TEXT NOT NULL,
            school TEXT,
            educational_background TEXT,
            place_of_work TEXT,
            address TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            grade TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    // Repeat registrations are refused here as well as by the pre-check, so
    // two racing writers cannot both get in.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_students_dedup
            ON students(first_name, father_name, grandfather_name, mothers_name, sex)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_year_grade ON students(academic_year, grade)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_sort ON students(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS legacy_students(
            id TEXT PRIMARY KEY,
            id_number TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            spiritual_name TEXT NOT NULL,
            phone_number TEXT NOT NULL,
            age INTEGER,
            sex TEXT NOT NULL,
            class TEXT NOT NULL,
            occupation TEXT NOT NULL,
            education_background TEXT NOT NULL,
            address TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_legacy_students_year ON legacy_students(academic_year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS counters(
            key TEXT PRIMARY KEY,
            seq INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // Workspaces created before edits were tracked lack updated_at.
    ensure_students_updated_at(&conn)?;

    Ok(conn)
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn is_unique_violation(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(f, _)) if f.code == ErrorCode::ConstraintViolation
        )
    })
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(None),
        Some(s) => {
            let v = serde_json::from_str(&s)
                .with_context(|| format!("settings value for {} is not valid JSON", key))?;
            Ok(Some(v))
        }
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

/// Atomically bumps the counter at `key` and returns the new value.
///
/// A missing counter starts from `seed`, so the first call yields
/// `seed + 1`. An existing counter never drops below `seed`.
pub fn next_sequence(conn: &Connection, key: &str, seed: i64) -> anyhow::Result<i64> {
    let seq = conn.query_row(
        "INSERT INTO counters(key, seq) VALUES(?1, ?2 + 1)
         ON CONFLICT(key) DO UPDATE SET seq = MAX(seq, excluded.seq - 1) + 1
         RETURNING seq",
        params![key, seed],
        |r| r.get::<_, i64>(0),
    )?;
    Ok(seq)
}

pub fn peek_sequence(conn: &Connection, key: &str) -> anyhow::Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT seq FROM counters WHERE key = ?", [key], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?)
}

const STUDENT_COLUMNS: &str = "id, unique_id, first_name, father_name, grandfather_name,
    mothers_name, christian_name, dob_date, dob_month, dob_year, age, sex, phone_number,
    class, occupation, school, educational_background, place_of_work, address,
    academic_year, grade";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        unique_id: r.get(1)?,
        first_name: r.get(2)?,
        father_name: r.get(3)?,
        grandfather_name: r.get(4)?,
        mothers_name: r.get(5)?,
        christian_name: r.get(6)?,
        dob_date: r.get(7)?,
        dob_month: r.get(8)?,
        dob_year: r.get(9)?,
        age: r.get(10)?,
        sex: r.get(11)?,
        phone_number: r.get(12)?,
        class: r.get(13)?,
        occupation: r.get(14)?,
        school: r.get(15)?,
        educational_background: r.get(16)?,
        place_of_work: r.get(17)?,
        address: r.get(18)?,
        academic_year: r.get(19)?,
        grade: r.get(20)?,
    })
}

pub fn list_students(conn: &Connection) -> anyhow::Result<Vec<Student>> {
    let sql = format!(
        "SELECT {} FROM students ORDER BY sort_order, rowid",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_student(conn: &Connection, id: &str) -> anyhow::Result<Option<Student>> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
    Ok(conn.query_row(&sql, [id], student_from_row).optional()?)
}

pub fn find_duplicate(conn: &Connection, key: &DedupKey) -> anyhow::Result<Option<Student>> {
    let sql = format!(
        "SELECT {} FROM students
         WHERE first_name = ? AND father_name = ? AND grandfather_name = ?
           AND mothers_name = ? AND sex = ?
         LIMIT 1",
        STUDENT_COLUMNS
    );
    Ok(conn
        .query_row(
            &sql,
            params![
                key.first_name,
                key.father_name,
                key.grandfather_name,
                key.mothers_name,
                key.sex
            ],
            student_from_row,
        )
        .optional()?)
}

pub fn count_registrations(conn: &Connection, academic_year: &str, grade: &str) -> anyhow::Result<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM students WHERE academic_year = ? AND grade = ?",
        (academic_year.trim(), grade.trim()),
        |r| r.get::<_, i64>(0),
    )?;
    Ok(n)
}

fn next_sort_order(conn: &Connection, table: &str) -> anyhow::Result<i64> {
    let sql = format!("SELECT COALESCE(MAX(sort_order), -1) + 1 FROM {}", table);
    Ok(conn.query_row(&sql, [], |r| r.get::<_, i64>(0))?)
}

pub fn insert_student(conn: &Connection, s: &Student) -> anyhow::Result<()> {
    let sort_order = next_sort_order(conn, "students")?;
    conn.execute(
        "INSERT INTO students(
            id, unique_id, first_name, father_name, grandfather_name, mothers_name,
            christian_name, dob_date, dob_month, dob_year, age, sex, phone_number,
            class, occupation, school, educational_background, place_of_work, address,
            academic_year, grade, sort_order
         ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
        params![
            s.id,
            s.unique_id,
            s.first_name,
            s.father_name,
            s.grandfather_name,
            s.mothers_name,
            s.christian_name,
            s.dob_date,
            s.dob_month,
            s.dob_year,
            s.age,
            s.sex,
            s.phone_number,
            s.class,
            s.occupation,
            s.school,
            s.educational_background,
            s.place_of_work,
            s.address,
            s.academic_year,
            s.grade,
            sort_order
        ],
    )?;
    Ok(())
}

pub fn update_student(conn: &Connection, s: &Student) -> anyhow::Result<bool> {
    let now = chrono::Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE students SET
            first_name = ?2, father_name = ?3, grandfather_name = ?4, mothers_name = ?5,
            christian_name = ?6, dob_date = ?7, dob_month = ?8, dob_year = ?9, age = ?10,
            sex = ?11, phone_number = ?12, class = ?13, occupation = ?14, school = ?15,
            educational_background = ?16, place_of_work = ?17, address = ?18,
            academic_year = ?19, grade = ?20, updated_at = ?21
         WHERE id = ?1",
        params![
            s.id,
            s.first_name,
            s.father_name,
            s.grandfather_name,
            s.mothers_name,
            s.christian_name,
            s.dob_date,
            s.dob_month,
            s.dob_year,
            s.age,
            s.sex,
            s.phone_number,
            s.class,
            s.occupation,
            s.school,
            s.educational_background,
            s.place_of_work,
            s.address,
            s.academic_year,
            s.grade,
            now
        ],
    )?;
    Ok(changed > 0)
}

pub fn delete_student(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let changed = conn.execute("DELETE FROM students WHERE id = ?", [id])?;
    Ok(changed > 0)
}

pub fn count_legacy_registrations(conn: &Connection, academic_year: &str) -> anyhow::Result<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM legacy_students WHERE academic_year = ?",
        [academic_year.trim()],
        |r| r.get::<_, i64>(0),
    )?;
    Ok(n)
}

pub fn insert_legacy_student(conn: &Connection, s: &LegacyStudent) -> anyhow::Result<()> {
    let sort_order = next_sort_order(conn, "legacy_students")?;
    conn.execute(
        "INSERT INTO legacy_students(
            id, id_number, first_name, last_name, spiritual_name, phone_number, age, sex,
            class, occupation, education_background, address, academic_year, sort_order
         ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            s.id,
            s.id_number,
            s.first_name,
            s.last_name,
            s.spiritual_name,
            s.phone_number,
            s.age,
            s.sex,
            s.class,
            s.occupation,
            s.education_background,
            s.address,
            s.academic_year,
            sort_order
        ],
    )?;
    Ok(())
}

pub fn list_legacy_students(conn: &Connection) -> anyhow::Result<Vec<LegacyStudent>> {
    let mut stmt = conn.prepare(
        "SELECT id, id_number, first_name, last_name, spiritual_name, phone_number, age, sex,
                class, occupation, education_background, address, academic_year
         FROM legacy_students
         ORDER BY sort_order, rowid",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(LegacyStudent {
                id: r.get(0)?,
                id_number: r.get(1)?,
                first_name: r.get(2)?,
                last_name: r.get(3)?,
                spiritual_name: r.get(4)?,
                phone_number: r.get(5)?,
                age: r.get(6)?,
                sex: r.get(7)?,
                class: r.get(8)?,
                occupation: r.get(9)?,
                education_background: r.get(10)?,
                address: r.get(11)?,
                academic_year: r.get(12)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem() -> Connection {
        let dir = std::env::temp_dir().join(format!("rollbookd-db-{}", uuid::Uuid::new_v4()));
        open_db(&dir).expect("open db")
    }

    fn student(id: &str, first: &str) -> Student {
        Student {
            id: id.to_string(),
            unique_id: format!("U-{id}"),
            first_name: first.to_string(),
            father_name: "Tekle".into(),
            grandfather_name: "Haile".into(),
            mothers_name: "Almaz".into(),
            sex: "Male".into(),
            academic_year: "2017".into(),
            grade: "Grade 7".into(),
            ..Student::default()
        }
    }

    #[test]
    fn sequence_is_seeded_then_monotonic() {
        let conn = mem();
        assert_eq!(next_sequence(&conn, "k", 4).unwrap(), 5);
        assert_eq!(next_sequence(&conn, "k", 0).unwrap(), 6);
        assert_eq!(next_sequence(&conn, "k", 10).unwrap(), 11);
        assert_eq!(next_sequence(&conn, "other", 0).unwrap(), 1);
    }

    #[test]
    fn dedup_index_rejects_same_tuple() {
        let conn = mem();
        insert_student(&conn, &student("a", "Abel")).unwrap();
        let e = insert_student(&conn, &student("b", "Abel")).unwrap_err();
        assert!(is_unique_violation(&e));
        insert_student(&conn, &student("c", "Kidus")).unwrap();
        let found = find_duplicate(&conn, &student("x", "Abel").dedup_key()).unwrap();
        assert_eq!(found.map(|s| s.id), Some("a".to_string()));
        assert_eq!(count_registrations(&conn, "2017", "Grade 7").unwrap(), 2);
    }

    #[test]
    fn list_keeps_insertion_order() {
        let conn = mem();
        insert_student(&conn, &student("z", "Zed")).unwrap();
        insert_student(&conn, &student("a", "Abel")).unwrap();
        let ids: Vec<_> = list_students(&conn).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["z", "a"]);
        assert!(delete_student(&conn, "z").unwrap());
        assert!(!delete_student(&conn, "z").unwrap());
    }

    #[test]
    fn settings_round_trip() {
        let conn = mem();
        assert!(settings_get_json(&conn, "setup.x").unwrap().is_none());
        settings_set_json(&conn, "setup.x", &serde_json::json!({"a": 1})).unwrap();
        settings_set_json(&conn, "setup.x", &serde_json::json!({"a": 2})).unwrap();
        assert_eq!(
            settings_get_json(&conn, "setup.x").unwrap(),
            Some(serde_json::json!({"a": 2}))
        );
    }
}
