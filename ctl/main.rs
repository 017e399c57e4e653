#![forbid(unsafe_code)]

//! `agent-relay-ctl`: local CLI companion for `agent-relay`.
//!
//! Connects to the IPC socket and sends JSON commands to the bridge, so an
//! operator on the host can inspect and stop runs without going through
//! Slack.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

/// Environment variable holding the shared secret for IPC commands.
const IPC_TOKEN_ENV: &str = "AGENT_RELAY_IPC_TOKEN";

#[derive(Debug, Parser)]
#[command(
    name = "agent-relay-ctl",
    about = "Local CLI for the agent-relay bridge",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the bridge's `ipc_name` config).
    #[arg(long, default_value = "agent-relay")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List live runs and queue depths.
    List,

    /// Stop the live run for one user and workspace.
    Stop {
        /// Slack user ID that owns the run.
        actor: String,
        /// Workspace directory of the run.
        workspace: PathBuf,
    },

    /// Stop every live run owned by a user.
    StopAll {
        /// Slack user ID.
        actor: String,
    },

    /// Run queued messages now, stopping the live run if needed.
    Drain {
        /// Slack user ID that owns the queue.
        actor: String,
        /// Workspace directory of the queue.
        workspace: PathBuf,
    },

    /// Drop queued messages and stop the live run.
    Discard {
        /// Slack user ID that owns the queue.
        actor: String,
        /// Workspace directory of the queue.
        workspace: PathBuf,
    },
}

fn main() {
    let args = Cli::parse();

    let mut request_json = match &args.command {
        Command::List => serde_json::json!({ "command": "list" }),
        Command::Stop { actor, workspace } => keyed("stop", actor, workspace),
        Command::StopAll { actor } => {
            serde_json::json!({ "command": "stop-all", "actor": actor })
        }
        Command::Drain { actor, workspace } => keyed("drain", actor, workspace),
        Command::Discard { actor, workspace } => keyed("discard", actor, workspace),
    };

    if let Ok(token) = std::env::var(IPC_TOKEN_ENV) {
        if !token.is_empty() {
            request_json["auth_token"] = serde_json::Value::String(token);
        }
    }

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    if let Some(data) = obj.get("data") {
                        println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                    } else {
                        println!("OK");
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to bridge: {err}");
            eprintln!("Is agent-relay running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Request addressing one (actor, workspace) key.
fn keyed(command: &str, actor: &str, workspace: &std::path::Path) -> serde_json::Value {
    let workspace = workspace
        .canonicalize()
        .unwrap_or_else(|_| workspace.to_path_buf());
    serde_json::json!({
        "command": command,
        "actor": actor,
        "workspace": workspace.to_string_lossy(),
    })
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
