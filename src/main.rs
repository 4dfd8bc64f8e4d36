mod db;
mod ident;
mod import;
mod ipc;
mod ledger;
mod logging;
mod model;
mod register;
mod report;
mod roster;
mod session;
mod sheet;
mod xlsx;

use log::{debug, error, warn};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::time::Instant;

fn main() {
    if let Err(e) = logging::init_from_env() {
        eprintln!("rollbookd: logging disabled: {e}");
    }

    let mut state = ipc::AppState::default();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!("event=stdin_closed module=main status=error error={}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to answer to.
                warn!("event=bad_json module=main status=rejected error={}", e);
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let started = Instant::now();
        let method = req.method.clone();
        let resp = ipc::handle_request(&mut state, req);
        let ok = resp.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
        let code = resp
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_str())
            .unwrap_or("-");
        debug!(
            "event=request module=main method={} status={} code={} elapsed_ms={}",
            method,
            if ok { "ok" } else { "error" },
            code,
            started.elapsed().as_millis()
        );
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
