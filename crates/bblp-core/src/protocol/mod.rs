//! Protocol module - wire definitions for the printer's MQTT channel.

pub mod command;
pub mod constants;
pub mod envelope;
pub mod framing;
pub mod topic;

pub use command::{Namespace, OutboundCommand, PrintJob};
pub use constants::*;
pub use envelope::{Decoded, Envelope, ModuleVersion, ReportBody, decode};
pub use framing::{frame, unframe};
pub use topic::{Topic, TopicCategory, classify, request_topic};
