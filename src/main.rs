mod audit;
mod calc;
mod config;
mod db;
mod directory;
mod ipc;
mod logging;
mod store;
mod views;

use log::{error, info};
use std::io::{self, BufRead, Write};

fn main() {
    let config = config::Config::from_env();
    let _logger = match logging::init_logging(&config) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("gradebookd: logging disabled: {e}");
            None
        }
    };

    let mut state = ipc::AppState::default();
    if let Some(path) = &config.workspace {
        if let Err(e) = ipc::select_workspace(&mut state, path) {
            error!(
                "event=workspace_open_failed path={} error={e:?}",
                path.display()
            );
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                let _ = writeln!(stdout, "{}", ipc::bad_json(e.to_string()));
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

    info!("event=app_stop");
}
