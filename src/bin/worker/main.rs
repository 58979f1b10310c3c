//! Execution worker: drives Chrome for the agent over stdin/stdout.
//!
//! Protocol: one JSON object per line in each direction. The first line
//! written is an unsolicited `{"status":"ok"}` greeting; every command after
//! that gets exactly one response. Diagnostics go to stderr only.

mod command;
mod dom;
mod session;

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error, info, warn};

use browser_task_agent::logging;
use browser_task_agent::types::{WorkerResponse, WorkerStatus};
use command::Request;
use session::BrowserSession;

/// Chrome-backed execution worker for the browser task agent.
#[derive(Debug, Parser)]
#[command(name = "worker", version)]
struct WorkerArgs {
    /// Run Chrome without a window.
    #[arg(long)]
    headless: bool,

    /// Chrome executable; found automatically when omitted.
    #[arg(long)]
    chrome: Option<PathBuf>,
}

fn reply(response: &WorkerResponse) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, response)?;
    stdout.write_all(b"\n")?;
    stdout.flush()
}

fn greeting(message: &str) -> WorkerResponse {
    WorkerResponse {
        status: WorkerStatus::Ok,
        message: Some(message.to_string()),
        observation: None,
    }
}

fn main() -> ExitCode {
    logging::init();
    let args = WorkerArgs::parse();

    let session = match BrowserSession::launch(args.headless, args.chrome) {
        Ok(session) => session,
        Err(err) => {
            error!("{err:#}");
            let _ = reply(&WorkerResponse::error(format!("{err:#}")));
            return ExitCode::FAILURE;
        }
    };

    if reply(&greeting("worker_started")).is_err() {
        return ExitCode::FAILURE;
    }

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match Request::parse(line) {
            Ok(Request::Exit) => {
                let _ = reply(&greeting("exiting"));
                break;
            }
            Ok(Request::Browser(command)) => {
                debug!(?command, "executing");
                match session.execute(&command) {
                    Ok(observation) => WorkerResponse::ok(observation),
                    Err(err) => {
                        warn!("{err:#}");
                        WorkerResponse::error(format!("{err:#}"))
                    }
                }
            }
            Err(err) => WorkerResponse::error(format!("{err:#}")),
        };

        if reply(&response).is_err() {
            // The agent is gone.
            break;
        }
    }

    info!("shutting down");
    ExitCode::SUCCESS
}
