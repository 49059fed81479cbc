mod calc;
mod config;
mod db;
mod grading;
mod ipc;
mod model;

use std::io::{self, BufRead, Write};

fn main() {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(config::log_filter())
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };
    if let Some(path) = config::startup_workspace() {
        if let Err(e) = ipc::open_workspace(&mut state, &path) {
            tracing::error!(workspace = %path.display(), error = %e, "startup workspace not opened");
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "inovatecd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to reply to.
                tracing::warn!(error = %e, "unparsable request line");
                let reply = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", reply);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
