#[allow(dead_code)]
#[path = "../src/xlsx.rs"]
mod xlsx;

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollbookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollbookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(v: &serde_json::Value) -> String {
    v.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string()
}

const REGISTRATION_HEADER: &str = "First_Name,Father_Name,Grandfather_Name,Mothers_Name,Christian_Name,Phone_Number,Age,Sex,Class,Occupation,Educational_Background,Address,Academic_Year,Grade";

fn open_workspace(prefix: &str) -> (PathBuf, Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    (workspace, child, stdin, reader)
}

#[test]
fn bad_rows_are_skipped_not_fatal() {
    let (ws, _child, mut stdin, mut reader) = open_workspace("rollbook-import-partial");
    let csv = ws.join("students.csv");
    std::fs::write(
        &csv,
        format!(
            "{}\n{}\n{}\n{}\n",
            REGISTRATION_HEADER,
            "Abel,Tekle,Haile,Almaz,Gebre,0911,12,Male,6,Student,,Kara,2017,Grade 7",
            "Sara,Lemma,Bekele,Tigist,Mariam,0912,11,Female,5,Student,,Kara,abc,Grade 7",
            "\"Kidus, Jr\",Girma,Alemu,Hana,Yohannes,0913,13.0,Male,7,Student,,Abado,2017,Grade 7",
        ),
    )
    .expect("write csv");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.import",
        json!({ "inPath": csv.to_string_lossy() }),
    );
    assert_eq!(result["schema"], json!("registration"));
    assert_eq!(result["rowsTotal"], json!(3));
    assert_eq!(result["imported"], json!(2));
    assert_eq!(result["skipped"], json!(1));
    assert_eq!(result["errors"][0]["row"], json!(2));
    assert_eq!(result["errors"][0]["code"], json!("invalid_academic_year"));
    assert_eq!(result["students"][0]["student"]["uniqueId"], json!("ብሕ/17/07/01"));
    assert_eq!(result["students"][1]["student"]["uniqueId"], json!("ብሕ/17/07/02"));

    let list = request_ok(&mut stdin, &mut reader, "2", "students.list", json!({}));
    let names: Vec<_> = list["students"]
        .as_array()
        .expect("students")
        .iter()
        .map(|s| s["firstName"].as_str().unwrap_or("").to_string())
        .collect();
    assert_eq!(names, vec!["Abel", "Kidus, Jr"]);
    assert_eq!(list["students"][1]["age"], json!(13));

    // Importing the same file again only yields duplicates and the bad row.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.import",
        json!({ "inPath": csv.to_string_lossy() }),
    );
    assert_eq!(again["imported"], json!(0));
    let codes: Vec<_> = again["errors"]
        .as_array()
        .expect("errors")
        .iter()
        .map(|e| e["code"].as_str().unwrap_or("").to_string())
        .collect();
    assert_eq!(codes, vec!["duplicate", "invalid_academic_year", "duplicate"]);
}

#[test]
fn header_mismatch_rejects_the_whole_file() {
    let (ws, _child, mut stdin, mut reader) = open_workspace("rollbook-import-headers");
    let csv = ws.join("swapped.csv");
    std::fs::write(
        &csv,
        "Father_Name,First_Name,Grandfather_Name,Mothers_Name,Christian_Name,Phone_Number,Age,Sex,Class,Occupation,Educational_Background,Address,Academic_Year,Grade\n\
Tekle,Abel,Haile,Almaz,Gebre,0911,12,Male,6,Student,,Kara,2017,Grade 7\n",
    )
    .expect("write csv");

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "students.import",
        json!({ "inPath": csv.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "bad_headers");
    let expected = resp["error"]["details"]["expected"]
        .as_array()
        .expect("expected headers");
    assert_eq!(expected.len(), 14);
    assert_eq!(expected[0], json!("First_Name"));

    // A legacy file is not accepted as the registration layout.
    let legacy = ws.join("legacy.csv");
    std::fs::write(
        &legacy,
        "First_Name,Last_Name,Spiritual_Name,Phone_Number,Age,Sex,Class,Occupation,Education_Background,Address,Academic_Year\n",
    )
    .expect("write csv");
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.import",
        json!({ "inPath": legacy.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "bad_headers");

    let list = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert_eq!(list["total"], json!(0));
}

#[test]
fn legacy_workbook_imports_with_year_numbers() {
    let (ws, _child, mut stdin, mut reader) = open_workspace("rollbook-import-legacy");
    let book = ws.join("legacy.xlsx");
    let rows: Vec<Vec<String>> = vec![
        vec![
            "First_Name", "Last_Name", "Spiritual_Name", "Phone_Number", "Age", "Sex", "Class",
            "Occupation", "Education_Background", "Address", "Academic_Year",
        ],
        vec![
            "Sara", "Lemma", "Mariam", "0912", "15", "Female", "9", "Student", "", "Kara", "2016",
        ],
        vec!["Hana", "", "", "", "", "Female", "9", "Student", "", "", "2016"],
        vec![
            "Yonas", "Abebe", "", "0913", "", "Male", "10", "Worker", "BSc", "Abado", "2016",
        ],
    ]
    .into_iter()
    .map(|r| r.into_iter().map(String::from).collect())
    .collect();
    xlsx::write_workbook(&book, "Sheet1", &rows).expect("write workbook");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.import",
        json!({ "inPath": book.to_string_lossy(), "schema": "legacy" }),
    );
    assert_eq!(result["schema"], json!("legacy"));
    assert_eq!(result["imported"], json!(2));
    assert_eq!(result["errors"][0]["line"], json!(3));
    assert_eq!(result["errors"][0]["code"], json!("missing_fields"));
    assert_eq!(result["students"][0]["student"]["idNumber"], json!("160001"));
    assert_eq!(result["students"][1]["student"]["idNumber"], json!("160002"));

    let list = request_ok(&mut stdin, &mut reader, "2", "legacyStudents.list", json!({}));
    assert_eq!(list["total"], json!(2));
}

#[test]
fn unreadable_inputs_are_refused() {
    let (ws, _child, mut stdin, mut reader) = open_workspace("rollbook-import-unreadable");

    let txt = ws.join("students.txt");
    std::fs::write(&txt, "hello").expect("write");
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "students.import",
        json!({ "inPath": txt.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "parse_failed");

    let fake = ws.join("fake.xlsx");
    std::fs::write(&fake, "not a zip").expect("write");
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.import",
        json!({ "inPath": fake.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "parse_failed");

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "students.import",
        json!({ "inPath": txt.to_string_lossy(), "schema": "ancient" }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    // A cell reference past the sheet limits is a format error, and the
    // process keeps serving requests.
    let crafted = ws.join("crafted.xlsx");
    let file = std::fs::File::create(&crafted).expect("create workbook");
    let mut zip = zip::ZipWriter::new(file);
    let opts = zip::write::FileOptions::default();
    zip.start_file("xl/workbook.xml", opts).expect("workbook entry");
    zip.write_all(b"<workbook><sheets><sheet name=\"Sheet1\" sheetId=\"1\"/></sheets></workbook>")
        .expect("write workbook");
    zip.start_file("xl/worksheets/sheet1.xml", opts).expect("sheet entry");
    zip.write_all(
        b"<worksheet><sheetData><row r=\"1\"><c r=\"ZZZZZZZZZZZZZZZ1\" t=\"inlineStr\"><is><t>First_Name</t></is></c></row></sheetData></worksheet>",
    )
    .expect("write sheet");
    zip.finish().expect("finish workbook");
    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.import",
        json!({ "inPath": crafted.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "parse_failed");
    let _ = request_ok(&mut stdin, &mut reader, "5", "health", json!({}));
}
