// CLI entry point for the LAN peer relay.
//
// `relay serve` runs a relay server; `relay join` connects to one as a
// client. Lines typed on stdin are sent as `chat` messages and every relay
// event is printed, as text or as JSON lines with `--json`. EOF on stdin
// leaves the role cleanly. See `relay.rs` for the API this drives.
//
// Usage:
//   relay serve [OPTIONS]
//     --port <PORT>          Listen port (default: 7878)
//     --bind <IP>            Listen address (default: 0.0.0.0)
//   relay join <UNIQUE_ID> [OPTIONS]
//     --addr <HOST:PORT>     Server address (default: 127.0.0.1:<port>)
//   Common:
//     --config <PATH>        JSON config file
//     --json                 Print events as JSON lines
//
// In `join` mode, `@ID text` sends to one client, `!text` to the server
// only, and anything else to all other clients.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use lan_relay::{LOOPBACK_ADDRESS, Relay, RelayConfig, RelayEvent};
use lan_relay_protocol::{Message, Receivers};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CHAT_TAG: &str = "chat";

/// How long the main loop waits for an event before checking stdin again.
const EVENT_WAIT: Duration = Duration::from_millis(50);

enum Command {
    Serve,
    Join { unique_id: String },
}

struct Args {
    command: Command,
    port: Option<u16>,
    bind: Option<String>,
    addr: Option<String>,
    config: Option<PathBuf>,
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("relay=info,lan_relay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(args) = parse_args(std::env::args().skip(1))? else {
        print_usage();
        return Ok(());
    };
    let config = load_config(&args)?;
    let mut relay = Relay::new(config);

    match &args.command {
        Command::Serve => {
            let addr = relay.start_server().context("failed to start server")?;
            println!("Relay listening on {addr}");
        }
        Command::Join { unique_id } => {
            let default_addr = format!("{LOOPBACK_ADDRESS}:{}", relay.config().port);
            let address = args.addr.as_deref().unwrap_or(&default_addr);
            relay
                .connect_client(unique_id, address)
                .with_context(|| format!("failed to connect to {address}"))?;
            println!("Connecting to {address} as {unique_id}");
        }
    }

    let lines = spawn_stdin_reader();
    loop {
        while let Some(event) = relay.recv_event_timeout(EVENT_WAIT) {
            print_event(&event, args.json)?;
        }
        match lines.try_recv() {
            Ok(line) => {
                if let Some(msg) = parse_line(&line, &args.command)
                    && let Err(e) = relay.send_message(msg)
                {
                    warn!(role = ?relay.state(), error = %e, "message not sent");
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }
    }

    info!("stdin closed, shutting down");
    relay.shutdown();
    for event in relay.poll_events() {
        print_event(&event, args.json)?;
    }
    Ok(())
}

/// `None` means help was requested.
fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Option<Args>> {
    let mut args = args.into_iter();
    let command = match args.next().as_deref() {
        Some("serve") => Command::Serve,
        Some("join") => match args.next() {
            Some(unique_id) if !unique_id.starts_with("--") => Command::Join { unique_id },
            _ => bail!("join requires a unique id"),
        },
        Some("--help" | "-h") | None => return Ok(None),
        Some(other) => bail!("unknown command: {other}"),
    };

    let mut parsed = Args {
        command,
        port: None,
        bind: None,
        addr: None,
        config: None,
        json: false,
    };
    while let Some(arg) = args.next() {
        let mut value = |name: &str| args.next().with_context(|| format!("{name} requires a value"));
        match arg.as_str() {
            "--port" => {
                let port = value("--port")?;
                parsed.port = Some(port.parse().with_context(|| format!("invalid port: {port}"))?);
            }
            "--bind" => parsed.bind = Some(value("--bind")?),
            "--addr" => parsed.addr = Some(value("--addr")?),
            "--config" => parsed.config = Some(PathBuf::from(value("--config")?)),
            "--json" => parsed.json = true,
            "--help" | "-h" => return Ok(None),
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(Some(parsed))
}

/// Defaults, then the config file, then env, then command-line flags.
fn load_config(args: &Args) -> Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => RelayConfig::from_json_file(path)?,
        None => RelayConfig::default(),
    };
    config.apply_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = &args.bind {
        config.bind_address = bind
            .parse()
            .with_context(|| format!("invalid bind address: {bind}"))?;
    }
    Ok(config)
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Turn one stdin line into a message. Blank lines send nothing.
fn parse_line(line: &str, command: &Command) -> Option<Message> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Command::Serve = command {
        return Some(Message::new(Receivers::AllClients, CHAT_TAG, line));
    }
    if let Some(rest) = line.strip_prefix('@') {
        let (to, text) = rest.split_once(' ').unwrap_or((rest, ""));
        return Some(Message::to_client(to, CHAT_TAG, text.trim()));
    }
    if let Some(text) = line.strip_prefix('!') {
        return Some(Message::new(Receivers::Server, CHAT_TAG, text.trim()));
    }
    Some(Message::new(Receivers::AllClients, CHAT_TAG, line))
}

fn print_event(event: &RelayEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        RelayEvent::ServerStarted { addr } => println!("* server started on {addr}"),
        RelayEvent::ServerStopped { reason: None } => println!("* server stopped"),
        RelayEvent::ServerStopped {
            reason: Some(reason),
        } => println!("* server stopped: {reason}"),
        RelayEvent::Connected { unique_id } => println!("* connected as {unique_id}"),
        RelayEvent::Disconnected => println!("* disconnected"),
        RelayEvent::UniqueIdChanged { old, new } => println!("* renamed {old} -> {new}"),
        RelayEvent::MessageReceived { message } => {
            let from = message.sender_unique_id.as_deref().unwrap_or("server");
            println!("<{from}> [{}] {}", message.tag, message.content);
        }
        RelayEvent::PeerConnected { unique_id } => println!("* {unique_id} joined"),
        RelayEvent::PeerDisconnected { unique_id } => println!("* {unique_id} left"),
    }
    Ok(())
}

fn print_usage() {
    println!("Usage:");
    println!("  relay serve [--port <PORT>] [--bind <IP>] [--config <PATH>] [--json]");
    println!("  relay join <UNIQUE_ID> [--addr <HOST:PORT>] [--config <PATH>] [--json]");
    println!();
    println!("Lines on stdin are sent as chat messages. In join mode:");
    println!("  @ID text   send to one client");
    println!("  !text      send to the server only");
    println!("  text       send to all other clients");
}
