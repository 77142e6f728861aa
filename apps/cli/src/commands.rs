//! Subcommand handlers. Each returns the process exit code.

use std::path::Path;

use anyhow::{Result, bail};
use bblp_core::state::RemainingTime;
use bblp_core::{
    ConnectionState, DeviceSession, FileTransferError, MqttTransport, PrintStage, SessionError,
    StateSnapshot, StatusField, TracingObserver, format_size,
};
use chrono::Local;
use serde_json::Value;
use tracing::debug;

use crate::FilesCommand;

type Session = DeviceSession<MqttTransport, TracingObserver>;

/// Exit code when the session is permanently lost while watching.
const EXIT_DISCONNECTED: i32 = 255;

/// Keys of the raw status that change on every report.
const DEBUG_IGNORED: [&str; 1] = ["sequence_id"];

/// Send once the device ID is known, waiting for reports until it is.
fn send_when_ready<F>(session: &Session, send: F) -> Result<u64>
where
    F: Fn(&Session) -> Result<u64, SessionError>,
{
    loop {
        match send(session) {
            Err(e) if e.is_retryable() => {
                debug!("Waiting for device ID");
                if session.wait().connection == ConnectionState::Disconnected {
                    bail!("Disconnected before the device ID was known");
                }
            }
            other => return Ok(other?),
        }
    }
}

pub fn info(session: &Session) -> Result<i32> {
    send_when_ready(session, Session::request_version)?;

    let mut snapshot = session.snapshot();
    let modules = loop {
        if let Some(modules) = snapshot.version {
            break modules;
        }
        if snapshot.connection == ConnectionState::Disconnected {
            return Ok(EXIT_DISCONNECTED);
        }
        debug!("Waiting for version info");
        snapshot = session.wait();
    };

    println!("Versions:");
    for module in modules {
        println!(
            "{}: {} {} {}",
            module.name, module.hw_ver, module.sw_ver, module.sn
        );
    }
    Ok(0)
}

pub fn monitor(session: &Session, until_finished: bool, all_state: bool, one: bool) -> i32 {
    loop {
        let snapshot = session.wait();
        if snapshot.connection == ConnectionState::Disconnected {
            return EXIT_DISCONNECTED;
        }

        if all_state {
            println!("{}", dump_scalars(&snapshot));
        } else if let Some(line) = readable(&snapshot) {
            println!("{}", line);
        }

        if until_finished && snapshot.is_idle() {
            return 0;
        } else if one {
            return 0;
        }
    }
}

/// One status line, when progress, remaining time or stage just changed.
fn readable(snapshot: &StateSnapshot) -> Option<String> {
    let watched = [
        StatusField::Percent,
        StatusField::RemainingMinutes,
        StatusField::Stage,
    ];
    if !watched.iter().any(|f| snapshot.last_changed.contains(f)) {
        return None;
    }

    let task = if snapshot.stage() == Some(PrintStage::Printing) {
        snapshot.task_name()
    } else {
        "stopped".to_string()
    };
    let (hours, minutes) = match snapshot.remaining {
        Some(RemainingTime { hours, minutes, .. }) => (hours.to_string(), minutes.to_string()),
        None => ("?".to_string(), "?".to_string()),
    };

    Some(format!(
        "{} {} {}% complete {}h{}m remaining, ETA {}",
        snapshot.stage_name(),
        task,
        snapshot.status().percent.unwrap_or(0),
        hours,
        minutes,
        snapshot.eta_display(Local::now())
    ))
}

fn dump_scalars(snapshot: &StateSnapshot) -> String {
    snapshot
        .scalars()
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn debug(session: &Session) -> i32 {
    let mut seen = session.snapshot().print;
    loop {
        let snapshot = session.wait();
        if snapshot.connection == ConnectionState::Disconnected {
            return EXIT_DISCONNECTED;
        }
        for (key, old, new) in raw_changes(&seen, &snapshot.print) {
            println!("{}: {} -> {}", key, old, new);
            if let Some(value) = snapshot.print.get(&key) {
                seen.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Scalar keys of `current` that became set to something new.
fn raw_changes(
    seen: &serde_json::Map<String, Value>,
    current: &serde_json::Map<String, Value>,
) -> Vec<(String, String, String)> {
    current
        .iter()
        .filter(|(k, _)| !DEBUG_IGNORED.contains(&k.as_str()))
        .filter(|(_, v)| is_set(v) && !v.is_object() && !v.is_array())
        .filter(|(k, v)| seen.get(k.as_str()) != Some(v))
        .map(|(k, v)| {
            let old = seen.get(k.as_str()).map_or("None".to_string(), Value::to_string);
            (k.clone(), old, v.to_string())
        })
        .collect()
}

/// False for null, false, zero and empty strings.
fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Send a job command and let it flush before exiting.
pub fn job<F>(session: &Session, send: F) -> Result<i32>
where
    F: Fn(&Session) -> Result<u64, SessionError>,
{
    let sequence_id = send_when_ready(session, send)?;
    debug!(sequence_id, "Command sent, waiting for the next message");
    session.wait();
    Ok(0)
}

pub fn files(session: &Session, command: FilesCommand) -> i32 {
    match session.with_files(move |files| run_files(files, command)) {
        Ok(()) => 0,
        Err(SessionError::Files(FileTransferError::AlreadyExists(path))) => {
            println!("File {} already exists, not overwriting", path.display());
            1
        }
        Err(SessionError::Files(FileTransferError::Local { path, source })) => {
            println!("Failed to access {}: {}", path.display(), source);
            1
        }
        Err(e) => {
            println!("Remote said: {}", e);
            1
        }
    }
}

fn run_files(
    files: &mut bblp_core::LazyFileChannel,
    command: FilesCommand,
) -> Result<(), FileTransferError> {
    match command {
        FilesCommand::List { dir } => {
            for entry in files.list(dir.as_deref())? {
                println!("{}: {}", format_size(entry.size), entry.name);
            }
        }
        FilesCommand::Remove { file } => files.remove(&file)?,
        FilesCommand::Put { file } => {
            files.upload(&file)?;
            println!("Sent");
        }
        FilesCommand::Get { file } => {
            let local = files.download(&file, Path::new("."))?;
            println!("Fetched {}", local.display());
        }
    }
    Ok(())
}
