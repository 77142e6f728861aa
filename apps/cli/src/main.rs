use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bblp_core::{SessionConfig, TracingObserver, connect, discover};
use clap::{Parser, Subcommand};
use tracing::{error, info};

mod commands;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bambu Lab printer LAN tool", long_about = None)]
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

    /// Attempt to (re)connect forever
    #[arg(long)]
    reconnect: bool,

    /// Log verbosely
    #[arg(short, long)]
    verbose: bool,

    /// Log all messages and other debug info
    #[arg(long)]
    debug: bool,

    /// Load settings from a TOML file; flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show info about the printer
    Info,
    /// Watch printer status
    Monitor {
        /// Watch until the print is complete
        #[arg(long)]
        until_finished: bool,
        /// Dump all the (simple) state variables instead of the readable format
        #[arg(long)]
        all_state: bool,
        /// Query the printer once and exit
        #[arg(long)]
        one: bool,
    },
    /// Watch for every change in the raw status
    Debug,
    /// Start printing a file already on the printer
    Print {
        /// File to print
        file: String,
        /// Do not use the AMS
        #[arg(long)]
        no_ams: bool,
        /// Do not level the bed
        #[arg(long)]
        no_level: bool,
        /// Do not flow calibrate
        #[arg(long)]
        no_flowcal: bool,
        /// Record a timelapse
        #[arg(long)]
        timelapse: bool,
        /// Build plate type
        #[arg(long)]
        bed_type: Option<String>,
        /// Plate number inside the project
        #[arg(long)]
        plate: Option<u32>,
        /// AMS tray per filament, e.g. 0,1,2
        #[arg(long, value_delimiter = ',')]
        ams_mapping: Option<Vec<i32>>,
    },
    /// Stop the current print
    Stop,
    /// Pause the current print
    Pause,
    /// Resume a paused print
    Resume,
    /// Manage files on the printer
    #[command(subcommand)]
    Files(FilesCommand),
}

#[derive(Subcommand, Debug)]
enum FilesCommand {
    /// List files (optionally in a directory)
    List { dir: Option<String> },
    /// Delete a file
    Remove { file: String },
    /// Download a file into the current directory
    Get { file: String },
    /// Upload a local file
    Put { file: PathBuf },
}

fn main() {
    let args = Args::parse();

    let level = if args.debug {
        tracing::Level::DEBUG
    } else if args.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<i32> {
    let file_config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)?,
        None => SessionConfig::default(),
    };
    let mut config = file_config
        .merge(
            args.host,
            Some(args.access_code),
            args.device,
            args.reconnect,
            args.listen,
        )
        .with_defaults();

    if config.host.is_none() {
        let listen = config.listen.unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let timeout = Duration::from_secs(config.discovery_timeout_secs);
        let found = match discover(listen, timeout) {
            Ok(found) => found,
            Err(e) => {
                println!("{}", e);
                if let Some(hint) = e.hint() {
                    println!("{}", hint);
                }
                return Ok(1);
            }
        };

        let Some(announcement) = found else {
            println!("No printer found via discovery");
            return Ok(1);
        };
        let Some(host) = announcement.location().map(str::to_string) else {
            println!("No printer found via discovery");
            return Ok(1);
        };

        info!(
            "Found printer {} ({}) via discovery at {}",
            announcement.device_name().unwrap_or("?"),
            announcement.usn().unwrap_or("?"),
            host
        );
        config.host = Some(host);
        if config.device_id.is_none() {
            config.device_id = announcement.usn().map(str::to_string);
        }
    }

    let (session, _dispatch) = match connect(&config, Arc::new(TracingObserver)) {
        Ok(connected) => connected,
        Err(e) => {
            println!("{}", e);
            return Ok(1);
        }
    };

    let code = match args.command {
        Command::Info => commands::info(&session)?,
        Command::Monitor {
            until_finished,
            all_state,
            one,
        } => commands::monitor(&session, until_finished, all_state, one),
        Command::Debug => commands::debug(&session),
        Command::Print {
            file,
            no_ams,
            no_level,
            no_flowcal,
            timelapse,
            bed_type,
            plate,
            ams_mapping,
        } => {
            let job = bblp_core::PrintJob {
                plate,
                use_ams: Some(!no_ams),
                bed_leveling: Some(!no_level),
                flow_calibration: Some(!no_flowcal),
                timelapse: Some(timelapse),
                bed_type,
                ams_mapping,
                ..bblp_core::PrintJob::new(file)
            };
            commands::job(&session, |s| s.print(&job))?
        }
        Command::Stop => commands::job(&session, |s| s.stop())?,
        Command::Pause => commands::job(&session, |s| s.pause())?,
        Command::Resume => commands::job(&session, |s| s.resume())?,
        Command::Files(sub) => commands::files(&session, sub),
    };

    if let Err(e) = session.close() {
        tracing::debug!(error = %e, "Close failed");
    }
    Ok(code)
}
