//! rumqttc-based MQTT transport implementation.
//!
//! The printer runs its own broker behind a self-signed certificate, so the
//! TLS connector skips certificate and hostname validation.

use std::time::Duration;

use rumqttc::{
    Client, ConnectReturnCode, Connection, ConnectionError, Event, MqttOptions, Packet, QoS,
    TlsConfiguration, Transport,
};
use tracing::{debug, info, instrument, trace};

use super::traits::{
    ConnectCode, DisconnectReason, LinkState, PubSubTransport, Reconnect, SessionHandler,
    TransportError,
};
use crate::protocol::constants::{KEEP_ALIVE_SECS, MAX_PACKET_SIZE, MQTT_PORT, USERNAME};

/// Capacity of the request channel between the client and its event loop.
const REQUEST_CAPACITY: usize = 32;

/// Publishing half, shared with the session.
pub struct MqttTransport {
    client: Client,
}

/// Event-loop half, owned by the dispatch thread.
pub struct MqttConnection {
    connection: Connection,
}

impl MqttTransport {
    /// Build a client for the printer at `host`.
    ///
    /// Nothing touches the network until the returned connection is polled.
    #[instrument(level = "debug", skip(credential))]
    pub fn connect(host: &str, credential: &str) -> Result<(Self, MqttConnection), TransportError> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        let mut options = MqttOptions::new(client_id(), host, MQTT_PORT);
        options
            .set_credentials(USERNAME, credential)
            .set_keep_alive(Duration::from_secs(KEEP_ALIVE_SECS))
            .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE)
            .set_transport(Transport::tls_with_config(
                TlsConfiguration::NativeConnector(connector),
            ));

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        debug!(host = %host, port = MQTT_PORT, "MQTT client created");
        Ok((Self { client }, MqttConnection { connection }))
    }
}

impl PubSubTransport for MqttTransport {
    fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(filter, QoS::AtMostOnce)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    #[instrument(level = "trace", skip(self, payload), fields(len = payload.len()))]
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .map_err(|e| TransportError::Request(e.to_string()))
    }
}

impl MqttConnection {
    /// Block until the broker accepts the connection.
    pub fn wait_for_connack(&mut self) -> Result<(), TransportError> {
        for event in self.connection.iter() {
            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return match connect_code(ack.code) {
                        ConnectCode::Accepted => Ok(()),
                        code => Err(TransportError::Refused(code)),
                    };
                }
                Ok(event) => trace!(?event, "Event before ConnAck"),
                Err(e) => return Err(map_connection_error(e)),
            }
        }
        Err(TransportError::Closed)
    }

    /// Drive the event loop, feeding `handler` until the link is given up.
    pub fn run<H: SessionHandler + ?Sized>(mut self, handler: &H) {
        loop {
            let Some(event) = self.connection.iter().next() else {
                break;
            };
            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    handler.on_connect(connect_code(ack.code));
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handler.on_message(&publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    let err = map_connection_error(e);
                    debug!(error = %err, "MQTT event loop error");
                    if handler.on_disconnect(DisconnectReason::from(&err), &mut self)
                        == LinkState::Down
                    {
                        break;
                    }
                }
            }
        }
        info!("MQTT dispatch stopped");
    }
}

impl Reconnect for MqttConnection {
    // Polling the event loop after an error makes rumqttc dial again.
    fn reconnect(&mut self) -> Result<(), TransportError> {
        self.wait_for_connack()
    }
}

fn client_id() -> String {
    format!("bblp-{}", std::process::id())
}

fn connect_code(code: ConnectReturnCode) -> ConnectCode {
    match code {
        ConnectReturnCode::Success => ConnectCode::Accepted,
        ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
            ConnectCode::NotAuthorized
        }
        ConnectReturnCode::RefusedProtocolVersion => ConnectCode::Other(1),
        ConnectReturnCode::BadClientId => ConnectCode::Other(2),
        ConnectReturnCode::ServiceUnavailable => ConnectCode::Other(3),
    }
}

fn map_connection_error(e: ConnectionError) -> TransportError {
    match e {
        ConnectionError::Io(e) => TransportError::Io(e),
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => TransportError::Timeout,
        ConnectionError::ConnectionRefused(code) => TransportError::Refused(connect_code(code)),
        ConnectionError::RequestsDone => TransportError::Closed,
        other => TransportError::Protocol(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_code_mapping() {
        assert_eq!(connect_code(ConnectReturnCode::Success), ConnectCode::Accepted);
        assert_eq!(
            connect_code(ConnectReturnCode::NotAuthorized),
            ConnectCode::NotAuthorized
        );
        assert_eq!(
            connect_code(ConnectReturnCode::BadUserNamePassword),
            ConnectCode::NotAuthorized
        );
        assert_eq!(
            connect_code(ConnectReturnCode::ServiceUnavailable),
            ConnectCode::Other(3)
        );
    }

    #[test]
    fn test_connection_error_mapping() {
        assert!(map_connection_error(ConnectionError::NetworkTimeout).is_transient());
        assert!(matches!(
            map_connection_error(ConnectionError::RequestsDone),
            TransportError::Closed
        ));
        assert!(matches!(
            map_connection_error(ConnectionError::ConnectionRefused(
                ConnectReturnCode::NotAuthorized
            )),
            TransportError::Refused(ConnectCode::NotAuthorized)
        ));
    }
}
