//! Event system for UI decoupling.
//!
//! Allows CLI/TUI front-ends to follow session activity without
//! tight coupling to the core logic.

use std::collections::BTreeSet;
use std::fmt;

use crate::protocol::Namespace;
use crate::state::{ConnectionState, StatusField};
use crate::transport::DisconnectReason;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Events emitted by a device session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Broker accepted the connection.
    Connected { host: String },
    /// Link dropped.
    Disconnected {
        reason: DisconnectReason,
        state: ConnectionState,
    },
    /// Device ID learned from the report stream.
    IdentityResolved { device_id: String },
    /// A push-status report was applied.
    StatusChanged { changed: BTreeSet<StatusField> },
    /// Module versions arrived.
    VersionReceived { modules: usize },
    /// Command published.
    CommandSent {
        namespace: Namespace,
        command: &'static str,
        sequence_id: u64,
    },
    /// Payload could not be decoded and was dropped.
    Undecodable { topic: String, reason: String },
    /// Log message.
    Log { level: LogLevel, message: String },
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates. Called from the
/// transport's dispatch thread, so keep it short.
pub trait SessionObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &SessionEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: &SessionEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Connected { host } => {
                tracing::info!(host = %host, "Connected");
            }
            SessionEvent::Disconnected { reason, state } => {
                tracing::warn!(reason = %reason, state = %state, "Disconnected");
            }
            SessionEvent::IdentityResolved { device_id } => {
                tracing::info!(device = %device_id, "Determined printer device ID");
            }
            SessionEvent::StatusChanged { changed } => {
                tracing::debug!(changed = ?changed, "Status changed");
            }
            SessionEvent::VersionReceived { modules } => {
                tracing::debug!(modules, "Version info received");
            }
            SessionEvent::CommandSent {
                namespace,
                command,
                sequence_id,
            } => {
                tracing::debug!(namespace = %namespace, command, sequence_id, "Command sent");
            }
            SessionEvent::Undecodable { topic, reason } => {
                tracing::warn!(topic = %topic, reason = %reason, "Non-JSON payload");
            }
            SessionEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}
