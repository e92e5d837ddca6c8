//! Twitch IRC Chat Runner - Demo Entry Point
//!
//! Connects with the token from `TWITCH_OAUTH_TOKEN`, prints connection
//! events and chat messages to stdout as JSON lines, and sends each stdin
//! line as chat. `/join <channel>`, `/part` and `/w <user> <message>` are
//! handled locally.

use std::env;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use twitch_irc_runner::{
    ChatMessage, ClientConfig, ConnectionEvent, Runner, SendError, DEFAULT_SEND_INTERVAL,
};

/// Environment variable holding the `oauth:...` token
const TOKEN_VAR: &str = "TWITCH_OAUTH_TOKEN";

/// Environment variable holding an optional JSON config path
const CONFIG_VAR: &str = "TWITCH_IRC_CONFIG";

/// How often the queues are drained (the "host tick")
const TICK: Duration = Duration::from_millis(100);

const USAGE: &str = "usage: twitch_irc_runner <username> [channel]";

/// One stdout record
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Output<'a> {
    Event(&'a ConnectionEvent),
    Chat(&'a ChatMessage),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=twitch_irc_runner=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("twitch_irc_runner=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let username = args.next().ok_or(USAGE)?;
    let channel = args.next().unwrap_or_default();
    let token = env::var(TOKEN_VAR).map_err(|_| format!("{TOKEN_VAR} is not set"))?;

    let config = match env::var(CONFIG_VAR) {
        Ok(path) => ClientConfig::from_json_file(&path)?,
        Err(_) => ClientConfig::default(),
    };

    let mut runner = Runner::new(config);
    runner.start(&token, &username, &channel, DEFAULT_SEND_INTERVAL)?;
    info!("Session {} started", runner.session_id());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut tick = tokio::time::interval(TICK);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if pump(&mut runner)? {
                    break;
                }
            }
            line = stdin.next_line(), if stdin_open => {
                match line? {
                    Some(line) => {
                        if let Err(e) = handle_input(&runner, line.trim()) {
                            warn!("Could not queue input: {}", e);
                        }
                    }
                    None => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                let exited = tokio::task::block_in_place(|| runner.request_stop(true));
                if !exited {
                    warn!("Worker did not exit before the stop timeout");
                }
                pump(&mut runner)?;
                break;
            }
        }
    }

    Ok(())
}

/// Drain both inbound queues to stdout
///
/// Returns true once a terminal connection event has been seen.
fn pump(runner: &mut Runner) -> Result<bool, serde_json::Error> {
    let mut finished = false;

    for event in runner.drain_connection_events() {
        println!("{}", serde_json::to_string(&Output::Event(&event))?);
        finished |= event.kind.is_terminal();
    }
    for message in runner.drain_messages() {
        println!("{}", serde_json::to_string(&Output::Chat(&message))?);
    }

    Ok(finished)
}

/// Map one stdin line to an outbound request
fn handle_input(runner: &Runner, line: &str) -> Result<(), SendError> {
    if line.is_empty() {
        return Ok(());
    }

    if let Some(channel) = line.strip_prefix("/join ") {
        return runner.join_channel(channel);
    }
    if line == "/part" {
        return runner.join_channel("");
    }
    if let Some(rest) = line.strip_prefix("/w ") {
        if let Some((user, body)) = rest.split_once(' ') {
            return runner.send_whisper(user, body, "");
        }
    }

    runner.send_chat(line, "")
}
