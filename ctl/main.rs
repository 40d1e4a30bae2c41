#![forbid(unsafe_code)]

//! `room-warden-ctl` — operator CLI companion for `room-warden`.
//!
//! Talks to the warden's HTTP control API. Designed for quick inspection
//! and manual intervention when the operator is at a shell.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "room-warden-ctl",
    about = "Operator CLI for the room-warden server",
    version,
    long_about = None
)]
struct Cli {
    /// Base URL of the warden's HTTP API.
    #[arg(long, default_value = "http://127.0.0.1:8420")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List all rooms with state, occupancy, and agent presence.
    Rooms,

    /// Show aggregate lifecycle counters.
    Stats,

    /// Force-close a named room.
    Close {
        /// Room name.
        room: String,
    },

    /// Trigger a garbage-collection sweep and print its report.
    Gc,
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    let client = reqwest::Client::new();

    let result = match &args.command {
        Command::Rooms => get_json(&client, &format!("{}/rooms", args.server)).await,
        Command::Stats => get_json(&client, &format!("{}/stats", args.server)).await,
        Command::Close { room } => {
            post(&client, &format!("{}/rooms/{room}/close", args.server)).await
        }
        Command::Gc => post_json(&client, &format!("{}/gc", args.server)).await,
    };

    match result {
        Ok(output) => println!("{output}"),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

/// GET a JSON endpoint and pretty-print the body.
async fn get_json(client: &reqwest::Client, url: &str) -> Result<String, String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| format!("request to {url} failed: {err}"))?;
    render_json(response).await
}

/// POST to a JSON-returning endpoint and pretty-print the body.
async fn post_json(client: &reqwest::Client, url: &str) -> Result<String, String> {
    let response = client
        .post(url)
        .send()
        .await
        .map_err(|err| format!("request to {url} failed: {err}"))?;
    render_json(response).await
}

/// POST to an endpoint that answers with a bare status code.
async fn post(client: &reqwest::Client, url: &str) -> Result<String, String> {
    let response = client
        .post(url)
        .send()
        .await
        .map_err(|err| format!("request to {url} failed: {err}"))?;

    let status = response.status();
    if status.is_success() {
        Ok("ok".into())
    } else {
        Err(format!("server answered {status}"))
    }
}

async fn render_json(response: reqwest::Response) -> Result<String, String> {
    let status = response.status();
    if !status.is_success() {
        return Err(format!("server answered {status}"));
    }

    let value: serde_json::Value = response
        .json()
        .await
        .map_err(|err| format!("invalid JSON response: {err}"))?;
    serde_json::to_string_pretty(&value).map_err(|err| format!("failed to render response: {err}"))
}
