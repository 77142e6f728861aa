//! bblp TUI - live printer dashboard
//!
//! Shows job progress, temperatures and connection state as reports arrive,
//! with job control on single keys.

mod app;
mod event;
mod ui;

use std::fs::OpenOptions;
use std::io;
use std::net::IpAddr;
use std::panic;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bblp_core::{MqttTransport, SessionConfig, connect, discover};
use clap::Parser;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use tracing_subscriber::prelude::*;

use app::{App, TuiObserver};
use event::{Event, EventHandler};

const LOG_FILE: &str = "bblp-tui.log";

#[derive(Parser, Debug)]
#[command(author, version, about = "Live dashboard for a Bambu Lab printer", long_about = None)]
struct Args {
    /// Printer access code (network key)
    access_code: String,

    /// Hostname to connect to, otherwise find the first printer via discovery
    #[arg(long)]
    host: Option<String>,

    /// Printer device ID (detected on connect if omitted)
    #[arg(long)]
    device: Option<String>,

    /// Listen address for discovery
    #[arg(long)]
    listen: Option<IpAddr>,

    /// Give up when the connection drops instead of reconnecting
    #[arg(long)]
    no_reconnect: bool,

    /// Log verbosely
    #[arg(short, long)]
    verbose: bool,

    /// Load settings from a TOML file; flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Log to a file, the terminal belongs to the UI
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(LOG_FILE)
        .with_context(|| format!("Failed to open {}", LOG_FILE))?;
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(log_file));
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();

    let config = resolve_config(args)?;
    let observer = Arc::new(TuiObserver::new());
    let (session, _dispatch) = connect(&config, Arc::clone(&observer))?;

    // Setup panic hook to restore terminal on crash
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let _ = restore_terminal();
        original_hook(panic_info);
    }));

    let terminal = setup_terminal()?;
    let result = run_app(terminal, App::new(session, observer));
    restore_terminal()?;

    result
}

/// Merge file and flag settings, discovering the printer when no host is set.
fn resolve_config(args: Args) -> Result<SessionConfig> {
    let file_config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)?,
        None => SessionConfig::default(),
    };
    let mut config = file_config
        .merge(
            args.host,
            Some(args.access_code),
            args.device,
            !args.no_reconnect,
            args.listen,
        )
        .with_defaults();

    if config.host.is_none() {
        let listen = config.listen.unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let timeout = Duration::from_secs(config.discovery_timeout_secs);
        println!("Looking for a printer on the local network...");
        let announcement = match discover(listen, timeout) {
            Ok(Some(announcement)) => announcement,
            Ok(None) => bail!("No printer found via discovery"),
            Err(e) => match e.hint() {
                Some(hint) => bail!("{} ({})", e, hint),
                None => return Err(e.into()),
            },
        };
        let Some(host) = announcement.location() else {
            bail!("No printer found via discovery");
        };
        config.host = Some(host.to_string());
        if config.device_id.is_none() {
            config.device_id = announcement.usn().map(str::to_string);
        }
    }
    Ok(config)
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn restore_terminal() -> Result<()> {
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture)?;
    Ok(())
}

fn run_app(
    mut terminal: Terminal<CrosstermBackend<io::Stdout>>,
    mut app: App<MqttTransport>,
) -> Result<()> {
    let event_handler = EventHandler::new(250);

    loop {
        terminal.draw(|frame| ui::draw(frame, &app))?;

        match event_handler.next()? {
            Event::Tick => app.on_tick(),
            Event::Key(key_event) => {
                if app.on_key(key_event) {
                    break;
                }
            }
            Event::Resize(_, _) => {
                // Handled by ratatui on the next draw
            }
        }
    }

    app.shutdown();
    Ok(())
}
