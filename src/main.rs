#![deny(dead_code)]
use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

mod utils;

use beaconlink::codec::LineTerminator;
use beaconlink::config::{self, Config, Coordinates};
use beaconlink::location::FixedLocationPlatform;
use beaconlink::sos::GestureState;
use beaconlink::terminal::{Terminal, TerminalEvent, TerminalHandle};
use beaconlink::transport::TcpTransport;

/// Command line arguments for the emergency terminal
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Emergency messaging terminal for a serial radio bridge.",
    long_about = "Connects to a serial radio bridge exposed over TCP and exchanges\n\
    pipe-delimited text messages with it. Distress messages carry GPS coordinates\n\
    when a position is available.\n\n\
    Settings are read from the per-user config file, then BEACONLINK_* environment\n\
    variables, then these flags."
)]
struct Args {
    /// Read settings from this file instead of the per-user config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Bridge address, e.g. 192.168.4.1:23
    #[arg(long, value_name = "HOST:PORT")]
    endpoint: Option<String>,

    /// Line ending appended to outgoing frames
    #[arg(long, value_name = "cr|lf|crlf")]
    terminator: Option<LineTerminator>,

    /// Identifier stamped on outgoing messages
    #[arg(long)]
    sender: Option<String>,

    /// Fixed latitude reported as this terminal's position
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    lat: Option<f64>,

    /// Fixed longitude reported as this terminal's position
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Persist the effective settings to the config file and continue
    #[arg(long)]
    save_config: bool,
}

/// One line of operator input
#[derive(Debug, PartialEq)]
enum Input {
    Connect(Option<String>),
    Disconnect,
    Emergency(String),
    SosPress,
    SosRelease,
    Status,
    Help,
    Quit,
    Text(String),
    Empty,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if !line.starts_with('/') {
        return Input::Text(line.to_string());
    }

    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    match command {
        "/connect" => Input::Connect((!rest.is_empty()).then(|| rest.to_string())),
        "/disconnect" => Input::Disconnect,
        "/emergency" => Input::Emergency(rest.to_string()),
        "/sos" => Input::SosPress,
        "/release" => Input::SosRelease,
        "/status" => Input::Status,
        "/help" => Input::Help,
        "/quit" | "/exit" => Input::Quit,
        _ => Input::Text(line.to_string()),
    }
}

const HELP: &str = "Commands:\n\
    /connect [host:port]   connect to the bridge\n\
    /disconnect            close the link\n\
    /emergency <text>      send an emergency message with GPS if available\n\
    /sos                   press and hold the SOS trigger\n\
    /release               release the SOS trigger\n\
    /status                show the connection state\n\
    /quit                  exit\n\
    Anything else is sent as a regular message.";

fn render_event(event: &TerminalEvent) -> Option<String> {
    match event {
        TerminalEvent::State(_) => None,
        TerminalEvent::Status(status) => Some(format!("* {}", status)),
        TerminalEvent::Sent { message, status } => Some(format!("{} {}", status.symbol(), message)),
        TerminalEvent::Received(message) if !message.is_emergency() => Some(format!("< {}", message)),
        TerminalEvent::Received(_) => None,
        TerminalEvent::Emergency(message) => {
            let mut text = format!("!!! EMERGENCY RECEIVED: {}\n    {}", message, message.location_string());
            if let Some(url) = message.maps_url() {
                text.push_str(&format!("\n    {}", url));
            }
            Some(text)
        }
        TerminalEvent::Raw(line) => Some(format!("RAW: {}", line)),
        TerminalEvent::Location { latitude, longitude } => {
            Some(format!("Location: {:.6}, {:.6}", latitude, longitude))
        }
        TerminalEvent::Sos(GestureState::Armed) => Some("SOS armed, keep holding... (/release to cancel)".to_string()),
        TerminalEvent::Sos(GestureState::Triggered) => Some("SOS ACTIVATED".to_string()),
        TerminalEvent::Sos(GestureState::Idle) => Some("SOS ready".to_string()),
    }
}

/// Layer command line flags over the loaded configuration
fn apply_args(config: &mut Config, args: &Args) {
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    if let Some(terminator) = args.terminator {
        config.line_terminator = terminator;
    }
    if let Some(sender) = &args.sender {
        config.sender_id = Some(sender.clone());
    }
    if let (Some(latitude), Some(longitude)) = (args.lat, args.lon) {
        config.fixed_location = Some(Coordinates { latitude, longitude });
    }
}

async fn run_command(handle: &TerminalHandle, input: Input) -> Result<bool> {
    let result = match input {
        Input::Empty => Ok(()),
        Input::Quit => return Ok(false),
        Input::Help => {
            println!("{}", HELP);
            Ok(())
        }
        Input::Status => {
            println!("Connection: {:?}", handle.state().await?);
            Ok(())
        }
        Input::Connect(endpoint) => handle.connect(endpoint.as_deref()).await,
        Input::Disconnect => handle.disconnect(),
        Input::Emergency(content) => handle.send_emergency(&content).await,
        Input::SosPress => handle.sos_press(),
        Input::SosRelease => handle.sos_release(),
        Input::Text(content) => handle.send_text(&content).await,
    };
    if let Err(e) = result {
        warn!("Command failed: {}", e);
        eprintln!("Error: {}", e);
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    utils::setup_logging(args.log_file.as_deref(), utils::parse_level(&args.log_level)?)?;
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);

    if let Some(path) = &args.config {
        config::set_config_path_override(path.clone());
        info!("Config file overridden to: {}", path.display());
    }

    let mut config = Config::load()?;
    apply_args(&mut config, &args);
    config.validate()?;

    if args.save_config {
        let path = config::config_path()?;
        config.save_to(&path)?;
        println!("Saved settings to {}", path.display());
    }

    let position = config.fixed_location.map(|c| (c.latitude, c.longitude));
    if position.is_none() {
        warn!("No fixed position configured, distress messages will be sent without GPS");
    }
    let platform = Arc::new(FixedLocationPlatform::new(position));
    let (handle, task) = Terminal::spawn(config.clone(), Arc::new(TcpTransport), platform);

    let (_observer, mut events) = handle.subscribe().await?;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(text) = render_event(&event) {
                println!("{}", text);
            }
        }
    });

    println!("{}", HELP);
    if config.endpoint.is_some() {
        if let Err(e) = handle.connect(None).await {
            error!("Initial connect failed: {}", e);
            eprintln!("Error: {}", e);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !run_command(&handle, parse_input(&line)).await? {
            break;
        }
    }

    info!("Shutting down");
    handle.shutdown()?;
    task.await?;
    printer.abort();
    Ok(())
}
