//! Pub/sub transport abstraction.
//!
//! Defines the `PubSubTransport` trait the session publishes through and the
//! `SessionHandler` trait the transport's event dispatch calls back into,
//! allowing different implementations (rumqttc, mock, etc.).

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection refused: {0}")]
    Refused(ConnectCode),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Request could not be queued: {0}")]
    Request(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Network timeout")]
    Timeout,

    #[error("Connection closed by client")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// OS-level and timeout failures that a reconnect loop swallows quietly.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Io(_) | TransportError::Timeout)
    }
}

/// Broker's answer to a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectCode {
    Accepted,
    /// Bad credentials or not authorized (MQTT return codes 4 and 5).
    NotAuthorized,
    Other(u8),
}

impl fmt::Display for ConnectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectCode::Accepted => write!(f, "accepted"),
            ConnectCode::NotAuthorized => write!(f, "not authorized"),
            ConnectCode::Other(code) => write!(f, "code {}", code),
        }
    }
}

/// Why the link went down. Only used for logging; policy ignores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Unauthorized,
    /// The local client was shut down.
    ClientClosed,
    Error(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Unauthorized => write!(f, "Unauthorized"),
            DisconnectReason::ClientClosed => write!(f, "Client closed"),
            DisconnectReason::Error(e) => write!(f, "{}", e),
        }
    }
}

impl From<&TransportError> for DisconnectReason {
    fn from(e: &TransportError) -> Self {
        match e {
            TransportError::Refused(ConnectCode::NotAuthorized) => DisconnectReason::Unauthorized,
            TransportError::Closed => DisconnectReason::ClientClosed,
            other => DisconnectReason::Error(other.to_string()),
        }
    }
}

/// Outbound half of the pub/sub client.
pub trait PubSubTransport: Send + Sync {
    fn subscribe(&self, filter: &str) -> Result<(), TransportError>;

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    fn disconnect(&self) -> Result<(), TransportError>;
}

/// Re-establish a dropped link.
pub trait Reconnect {
    fn reconnect(&mut self) -> Result<(), TransportError>;
}

/// Whether the dispatch loop keeps running after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

/// Event sink driven by a transport's dispatch loop.
///
/// These are the only entry points that mutate session state.
pub trait SessionHandler: Send + Sync {
    fn on_connect(&self, code: ConnectCode);

    fn on_message(&self, topic: &str, payload: &[u8]);

    fn on_disconnect(&self, reason: DisconnectReason, link: &mut dyn Reconnect) -> LinkState;
}
