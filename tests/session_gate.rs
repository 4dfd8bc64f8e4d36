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

fn open_workspace(prefix: &str) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    (child, stdin, reader)
}

#[test]
fn sessions_are_not_required_by_default() {
    let (_child, mut stdin, mut reader) = open_workspace("rollbook-session-default");
    let s = request_ok(&mut stdin, &mut reader, "1", "session.get", json!({}));
    assert_eq!(s["status"], json!("unauthenticated"));
    assert_eq!(s["requireSession"], json!(false));
    assert_eq!(s["signInPath"], json!("/api/auth/signin"));

    let list = request_ok(&mut stdin, &mut reader, "2", "students.list", json!({}));
    assert_eq!(list["total"], json!(0));
}

#[test]
fn required_session_gates_data_methods() {
    let (_child, mut stdin, mut reader) = open_workspace("rollbook-session-gate");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "setup.update",
        json!({
            "section": "security",
            "patch": { "requireSession": true, "signInPath": "/sign-in" }
        }),
    );

    let resp = request(&mut stdin, &mut reader, "2", "students.list", json!({}));
    assert_eq!(error_code(&resp), "unauthenticated");
    assert_eq!(resp["error"]["details"]["signInPath"], json!("/sign-in"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.open",
        json!({ "date": "2024-06-02" }),
    );
    assert_eq!(error_code(&resp), "unauthenticated");

    // Public methods stay reachable while signed out.
    let _ = request_ok(&mut stdin, &mut reader, "4", "health", json!({}));
    let setup = request_ok(&mut stdin, &mut reader, "5", "setup.get", json!({}));
    assert_eq!(setup["security"]["requireSession"], json!(true));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.set",
        json!({ "status": "loading" }),
    );
    let resp = request(&mut stdin, &mut reader, "7", "students.list", json!({}));
    assert_eq!(error_code(&resp), "session_loading");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "session.set",
        json!({ "status": "authenticated" }),
    );
    let list = request_ok(&mut stdin, &mut reader, "9", "students.list", json!({}));
    assert_eq!(list["matched"], json!(0));

    let s = request_ok(&mut stdin, &mut reader, "10", "session.get", json!({}));
    assert_eq!(s["status"], json!("authenticated"));
    assert_eq!(s["requireSession"], json!(true));

    // Signing out closes the gate again.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "session.set",
        json!({ "status": "unauthenticated" }),
    );
    let resp = request(&mut stdin, &mut reader, "12", "students.count", json!({}));
    assert_eq!(error_code(&resp), "unauthenticated");
}

#[test]
fn unknown_session_status_is_rejected() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "session.set",
        json!({ "status": "admin" }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    // Without a workspace the gate has nothing to read and data methods
    // report the missing workspace instead.
    let resp = request(&mut stdin, &mut reader, "2", "students.list", json!({}));
    assert_eq!(error_code(&resp), "no_workspace");
}
