//! Transport layer module.

pub mod mock;
pub mod mqtt;
pub mod traits;

pub use mock::{MockTransport, ScriptedReconnect};
pub use mqtt::{MqttConnection, MqttTransport};
pub use traits::{
    ConnectCode, DisconnectReason, LinkState, PubSubTransport, Reconnect, SessionHandler,
    TransportError,
};
