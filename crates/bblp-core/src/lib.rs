//! bblp-core: session engine for networked 3D printers.
//!
//! Talks to a printer over its MQTT-over-TLS broker, keeps a live snapshot of
//! what it reports, and sends job and status commands back. File transfers go
//! over a separate implicit-TLS FTPS channel.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, topics, framing, inbound decoding, outbound commands
//! - **State**: Snapshot of reported fields and derived job status
//! - **Transport**: Pub/sub abstraction (rumqttc, mock) and reconnect seam
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: Device session with wait/notify and command sequencing
//! - **Discovery**: LAN announcement listener
//! - **Files**: FTPS storage access
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bblp_core::{SessionConfig, TracingObserver, connect};
//!
//! let config = SessionConfig::new("192.168.1.50", "12345678");
//! let (session, _dispatch) = connect(&config, Arc::new(TracingObserver)).expect("connect failed");
//!
//! loop {
//!     let snapshot = session.wait();
//!     if let Some(percent) = snapshot.status().percent {
//!         println!("{}%", percent);
//!     }
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod files;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use config::SessionConfig;
pub use discovery::{Announcement, DiscoveryError, discover};
pub use error::SessionError;
pub use events::{LogLevel, NullObserver, SessionEvent, SessionObserver, TracingObserver};
pub use files::{FileChannel, FileTransferError, FileWorker, LazyFileChannel, RemoteEntry, format_size};
pub use protocol::{OutboundCommand, PrintJob};
pub use session::{DeviceSession, connect};
pub use state::{ConnectionState, PrintStage, PrintStatus, StateSnapshot, StatusField};
pub use transport::{MockTransport, MqttTransport, PubSubTransport, TransportError};
