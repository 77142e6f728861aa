//! Device session - live view of one printer plus its command channel.
//!
//! The transport's dispatch thread drives [`SessionHandler`]; consumers on
//! other threads read snapshots, block in [`DeviceSession::wait`] and send
//! commands. One mutex/condvar pair guards all mutable state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;
use tracing::{Span, debug, error, info, info_span, instrument, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{SessionEvent, SessionObserver, TracingObserver};
use crate::files::{FileTransferError, FileWorker, LazyFileChannel};
use crate::protocol::constants::SUBSCRIBE_ALL;
use crate::protocol::{Decoded, Envelope, OutboundCommand, PrintJob, ReportBody, TopicCategory};
use crate::protocol::{decode, request_topic};
use crate::state::{ConnectionState, StateSnapshot};
use crate::transport::{
    ConnectCode, DisconnectReason, LinkState, MqttTransport, PubSubTransport, Reconnect,
    SessionHandler, TransportError,
};

/// Pause between reconnect attempts.
const RECONNECT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct SessionState {
    device_id: Option<String>,
    snapshot: StateSnapshot,
    /// Bumped once per processed message and per disconnect.
    generation: u64,
    /// Threads currently blocked in `wait`.
    #[cfg(test)]
    waiters: usize,
}

/// Session with one printer.
pub struct DeviceSession<T: PubSubTransport, O: SessionObserver = TracingObserver> {
    host: String,
    access_code: String,
    reconnect: bool,
    transport: T,
    observer: Arc<O>,
    state: Mutex<SessionState>,
    changed: Condvar,
    sequence: AtomicU64,
    /// FTPS side channel, started on first use.
    files: Mutex<Option<FileWorker>>,
}

impl<T: PubSubTransport> DeviceSession<T, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: &SessionConfig, transport: T) -> Self {
        Self::with_observer(config, transport, Arc::new(TracingObserver))
    }
}

impl<T: PubSubTransport, O: SessionObserver> DeviceSession<T, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: &SessionConfig, transport: T, observer: Arc<O>) -> Self {
        Self {
            host: config.host.clone().unwrap_or_default(),
            access_code: config.access_code.clone(),
            reconnect: config.reconnect,
            transport,
            observer,
            state: Mutex::new(SessionState {
                device_id: config.device_id.clone(),
                ..Default::default()
            }),
            changed: Condvar::new(),
            sequence: AtomicU64::new(0),
            files: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn access_code(&self) -> &str {
        &self.access_code
    }

    pub fn reconnect_enabled(&self) -> bool {
        self.reconnect
    }

    pub fn device_id(&self) -> Option<String> {
        self.lock().device_id.clone()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> StateSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock().snapshot.connection
    }

    /// Last sequence ID handed out (0 before the first send).
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Block until the next processed message or disconnect.
    ///
    /// The wake-up says nothing about what changed; re-check the returned
    /// snapshot. Returns at once when the session is permanently
    /// disconnected.
    pub fn wait(&self) -> StateSnapshot {
        let mut guard = self.lock();
        if guard.snapshot.connection == ConnectionState::Disconnected {
            return guard.snapshot.clone();
        }

        let seen = guard.generation;
        #[cfg(test)]
        {
            guard.waiters += 1;
        }
        let mut guard = self
            .changed
            .wait_while(guard, |s| s.generation == seen)
            .unwrap_or_else(PoisonError::into_inner);
        #[cfg(test)]
        {
            guard.waiters -= 1;
        }
        guard.snapshot.clone()
    }

    /// Sequence and publish a command. Returns the sequence ID used.
    ///
    /// Fails with [`SessionError::NotReady`] until the device ID is known.
    pub fn send(&self, command: &OutboundCommand) -> Result<u64, SessionError> {
        let device_id = self.device_id().ok_or(SessionError::NotReady)?;

        let sequence_id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let body = command.encode(sequence_id)?;
        self.transport.publish(&request_topic(&device_id), body)?;

        self.observer.on_event(&SessionEvent::CommandSent {
            namespace: command.namespace,
            command: command.command,
            sequence_id,
        });
        Ok(sequence_id)
    }

    /// Request a full status report.
    pub fn push_all(&self) -> Result<u64, SessionError> {
        self.send(&OutboundCommand::push_all())
    }

    /// Request firmware/module versions.
    pub fn request_version(&self) -> Result<u64, SessionError> {
        self.send(&OutboundCommand::get_version())
    }

    pub fn print(&self, job: &PrintJob) -> Result<u64, SessionError> {
        self.send(&OutboundCommand::project_file(job))
    }

    pub fn stop(&self) -> Result<u64, SessionError> {
        self.send(&OutboundCommand::stop())
    }

    pub fn pause(&self) -> Result<u64, SessionError> {
        self.send(&OutboundCommand::pause())
    }

    pub fn resume(&self) -> Result<u64, SessionError> {
        self.send(&OutboundCommand::resume())
    }

    /// Run `job` on this session's file-transfer channel.
    ///
    /// The FTPS connection is opened on first use and reused by later calls.
    /// Calls from several threads are served one at a time.
    pub fn with_files<R, F>(&self, job: F) -> Result<R, SessionError>
    where
        R: Send + 'static,
        F: FnOnce(&mut LazyFileChannel) -> Result<R, FileTransferError> + Send + 'static,
    {
        let mut slot = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let worker = match slot.take() {
            Some(running) => slot.insert(running),
            None => slot.insert(FileWorker::spawn(&self.host, &self.access_code)?),
        };
        Ok(worker.run(job)?)
    }

    /// Close the pub/sub link and the file-transfer channel, if open.
    pub fn close(&self) -> Result<(), SessionError> {
        let worker = self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.shutdown();
        }
        self.transport.disconnect()?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn span(&self, device_id: Option<&str>) -> Span {
        info_span!("printer", device = device_id.unwrap_or("unknown"))
    }

    fn set_connection(&self, connection: ConnectionState) {
        self.lock().snapshot.connection = connection;
    }

    /// Apply a decoded report. Returns the event to emit once unlocked, if any.
    fn apply(&self, state: &mut SessionState, envelope: Envelope) -> Option<SessionEvent> {
        let snapshot = &mut state.snapshot;
        if envelope.topic.category != TopicCategory::Report {
            // Echoed requests and unknown topics never touch state.
            snapshot.last_changed.clear();
            return None;
        }

        match envelope.body {
            ReportBody::PushStatus(payload) => {
                let changed = snapshot.apply_push_status(&payload, Local::now());
                Some(SessionEvent::StatusChanged { changed })
            }
            ReportBody::PrintCommand { command, payload } => {
                debug!(command = ?command, "Unhandled print command");
                snapshot.merge_raw_print(&payload);
                snapshot.last_changed.clear();
                None
            }
            ReportBody::Version(modules) => {
                let count = modules.len();
                snapshot.replace_version(modules);
                snapshot.last_changed.clear();
                Some(SessionEvent::VersionReceived { modules: count })
            }
            ReportBody::InfoCommand { command, .. } => {
                debug!(command = ?command, "Unhandled info command");
                snapshot.last_changed.clear();
                None
            }
            ReportBody::Unrecognized(value) => {
                debug!(body = %value, "Unrecognized report");
                snapshot.last_changed.clear();
                None
            }
        }
    }

    /// Advance the generation and wake every waiter once.
    fn wake(&self, state: &mut SessionState) {
        state.generation += 1;
        self.changed.notify_all();
    }
}

impl<T: PubSubTransport, O: SessionObserver> SessionHandler for DeviceSession<T, O> {
    fn on_connect(&self, code: ConnectCode) {
        let device_id = self.device_id();
        let _span = self.span(device_id.as_deref()).entered();

        match code {
            ConnectCode::Accepted => {
                info!(
                    "Connected to {} at {}",
                    device_id.as_deref().unwrap_or("printer"),
                    self.host
                );
                self.set_connection(ConnectionState::Connected);
                self.observer.on_event(&SessionEvent::Connected {
                    host: self.host.clone(),
                });
            }
            ConnectCode::NotAuthorized => {
                error!("Connection refused: not authorized (check the access code)");
                return;
            }
            ConnectCode::Other(rc) => {
                warn!("Connected with result code {}", rc);
            }
        }

        if let Err(e) = self.transport.subscribe(SUBSCRIBE_ALL) {
            warn!(error = %e, "Subscribe failed");
        }

        match self.push_all() {
            Ok(_) | Err(SessionError::NotReady) => {}
            Err(e) => warn!(error = %e, "Status refresh failed"),
        }
    }

    fn on_message(&self, topic: &str, payload: &[u8]) {
        let decoded = decode(topic, payload);
        let mut events = Vec::new();
        let mut refresh = false;

        let device_id = {
            let mut state = self.lock();
            match decoded {
                Decoded::Undecodable { reason } => {
                    events.push(SessionEvent::Undecodable {
                        topic: topic.to_string(),
                        reason,
                    });
                }
                Decoded::Envelope(envelope) => {
                    if let TopicCategory::Other(_) = envelope.topic.category {
                        info!(topic = %topic, "Saw topic");
                    }

                    if envelope.topic.is_report() && state.device_id.is_none() {
                        let id = envelope.topic.device_id.clone();
                        refresh = state.snapshot.is_empty();
                        state.device_id = Some(id.clone());
                        events.push(SessionEvent::IdentityResolved { device_id: id });
                    }

                    let _span = self.span(state.device_id.as_deref()).entered();
                    debug!(
                        category = %envelope.category(),
                        command = ?envelope.command_name(),
                        "Message"
                    );
                    if let Some(event) = self.apply(&mut state, envelope) {
                        events.push(event);
                    }
                }
            }
            self.wake(&mut state);
            state.device_id.clone()
        };

        let _span = self.span(device_id.as_deref()).entered();
        for event in &events {
            self.observer.on_event(event);
        }

        if refresh && let Err(e) = self.push_all() {
            warn!(error = %e, "Initial status refresh failed");
        }
    }

    fn on_disconnect(&self, reason: DisconnectReason, link: &mut dyn Reconnect) -> LinkState {
        let device_id = self.device_id();
        let _span = self.span(device_id.as_deref()).entered();

        match &reason {
            DisconnectReason::Unauthorized => error!("Disconnected: Unauthorized"),
            other => warn!("Disconnected: {}", other),
        }

        let mut link_state = LinkState::Down;
        if self.reconnect && reason != DisconnectReason::ClientClosed {
            self.set_connection(ConnectionState::Connecting);
            loop {
                info!("Reconnecting");
                match link.reconnect() {
                    Ok(()) => {
                        link_state = LinkState::Up;
                        break;
                    }
                    Err(TransportError::Closed) => break,
                    Err(e) if e.is_transient() => {
                        debug!(error = %e, "Reconnect attempt failed");
                    }
                    Err(e) => {
                        warn!(error = %e, "Reconnect attempt failed");
                    }
                }
                thread::sleep(RECONNECT_INTERVAL);
            }
        }

        let connection = match link_state {
            LinkState::Up => ConnectionState::Connecting,
            LinkState::Down => ConnectionState::Disconnected,
        };
        {
            let mut state = self.lock();
            state.snapshot.connection = connection;
            self.wake(&mut state);
        }
        self.observer.on_event(&SessionEvent::Disconnected {
            reason,
            state: connection,
        });

        if link_state == LinkState::Up {
            self.on_connect(ConnectCode::Accepted);
        }
        link_state
    }
}

/// Connect to the printer described by `config` and start event dispatch.
///
/// Without `reconnect` the first connection attempt is made synchronously and
/// its failure is returned. With it, connecting happens in the background and
/// is retried forever.
#[instrument(skip_all, fields(host = ?config.host))]
pub fn connect<O: SessionObserver + 'static>(
    config: &SessionConfig,
    observer: Arc<O>,
) -> Result<(Arc<DeviceSession<MqttTransport, O>>, JoinHandle<()>), SessionError> {
    let host = config.host.clone().ok_or(SessionError::MissingHost)?;
    let connect_err = |source| SessionError::Connect {
        host: host.clone(),
        source,
    };

    let (transport, mut connection) =
        MqttTransport::connect(&host, &config.access_code).map_err(connect_err)?;

    let connected = if config.reconnect {
        false
    } else {
        connection.wait_for_connack().map_err(connect_err)?;
        true
    };

    let session = Arc::new(DeviceSession::with_observer(config, transport, observer));
    let dispatch = Arc::clone(&session);
    let handle = thread::Builder::new()
        .name("mqtt-dispatch".into())
        .spawn(move || {
            if connected {
                dispatch.on_connect(ConnectCode::Accepted);
            }
            connection.run(dispatch.as_ref());
        })
        .map_err(TransportError::Io)?;

    Ok((session, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::state::StatusField;
    use crate::transport::{MockTransport, ScriptedReconnect};
    use serde_json::{Value, json};
    use std::collections::BTreeSet;
    use std::io;
    use std::time::Instant;

    const DEVICE: &str = "01P00A000000001";
    const REPORT: &str = "device/01P00A000000001/report";

    fn session(
        device_id: Option<&str>,
        reconnect: bool,
    ) -> (Arc<DeviceSession<MockTransport, NullObserver>>, MockTransport) {
        let mock = MockTransport::new();
        let config = SessionConfig {
            host: Some("192.168.1.50".into()),
            access_code: "12345678".into(),
            device_id: device_id.map(str::to_string),
            reconnect,
            ..Default::default()
        };
        let s = DeviceSession::with_observer(&config, mock.clone(), Arc::new(NullObserver));
        (Arc::new(s), mock)
    }

    fn push_status(fields: Value) -> Vec<u8> {
        let mut print = json!({"command": "push_status"});
        for (k, v) in fields.as_object().unwrap() {
            print[k] = v.clone();
        }
        json!({ "print": print }).to_string().into_bytes()
    }

    fn decode_publish(payload: &[u8]) -> Value {
        let (nul, body) = payload.split_last().unwrap();
        assert_eq!(*nul, 0);
        serde_json::from_slice(body).unwrap()
    }

    fn waiter_count<T: PubSubTransport, O: SessionObserver>(s: &DeviceSession<T, O>) -> usize {
        s.lock().waiters
    }

    /// Spin until `n` threads are blocked in `wait`.
    fn await_waiters<T: PubSubTransport, O: SessionObserver>(s: &DeviceSession<T, O>, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while waiter_count(s) < n {
            assert!(Instant::now() < deadline, "waiters never blocked");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_send_before_identity_is_not_ready() {
        let (s, mock) = session(None, false);
        let err = s.request_version().unwrap_err();
        assert!(matches!(err, SessionError::NotReady));
        assert!(err.is_retryable());
        assert_eq!(s.sequence(), 0);
        assert!(mock.get_publishes().is_empty());
    }

    #[test]
    fn test_first_report_binds_identity_and_refreshes() {
        let (s, mock) = session(None, false);
        s.on_message(REPORT, &push_status(json!({"mc_percent": 5})));

        assert_eq!(s.device_id().as_deref(), Some(DEVICE));
        let publishes = mock.get_publishes();
        assert_eq!(publishes.len(), 1);
        assert_eq!(publishes[0].0, format!("device/{}/request", DEVICE));
        let body = decode_publish(&publishes[0].1);
        assert_eq!(body["pushing"]["command"], "pushall");
        assert_eq!(body["pushing"]["sequence_id"], 1);

        // The same call that failed before now succeeds, one step further.
        let before = s.sequence();
        assert_eq!(s.request_version().unwrap(), before + 1);
    }

    #[test]
    fn test_identity_binds_once() {
        let (s, _mock) = session(None, false);
        s.on_message(REPORT, &push_status(json!({})));
        s.on_message("device/OTHER/report", &push_status(json!({})));
        assert_eq!(s.device_id().as_deref(), Some(DEVICE));
    }

    #[test]
    fn test_request_echo_does_not_bind_identity() {
        let (s, _mock) = session(None, false);
        s.on_message("device/X/request", b"{\"print\": {\"command\": \"stop\"}}\0");
        assert!(s.device_id().is_none());
        assert!(s.snapshot().print.is_empty());
    }

    #[test]
    fn test_no_refresh_when_state_already_known() {
        let (s, mock) = session(Some(DEVICE), false);
        s.on_message(REPORT, &push_status(json!({"mc_percent": 5})));
        assert!(mock.get_publishes().is_empty());
    }

    #[test]
    fn test_sequence_strictly_increasing_from_one() {
        let (s, mock) = session(Some(DEVICE), false);
        let ids: Vec<u64> = (0..5).map(|_| s.push_all().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        let wire: Vec<u64> = mock
            .get_publishes()
            .iter()
            .map(|(_, p)| decode_publish(p)["pushing"]["sequence_id"].as_u64().unwrap())
            .collect();
        assert_eq!(wire, ids);
    }

    #[test]
    fn test_job_control_verbs() {
        let (s, mock) = session(Some(DEVICE), false);
        s.stop().unwrap();
        s.pause().unwrap();
        s.resume().unwrap();
        s.print(&PrintJob {
            timelapse: Some(true),
            ..PrintJob::new("cube.3mf")
        })
        .unwrap();

        let commands: Vec<String> = mock
            .get_publishes()
            .iter()
            .map(|(_, p)| decode_publish(p)["print"]["command"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(commands, ["stop", "pause", "resume", "project_file"]);

        let last = decode_publish(&mock.get_publishes()[3].1);
        assert_eq!(last["print"]["timelapse"], true);
        assert_eq!(last["print"]["use_ams"], true);
    }

    #[test]
    fn test_last_changed_follows_each_report() {
        let (s, _mock) = session(Some(DEVICE), false);
        s.on_message(REPORT, &push_status(json!({"mc_percent": 1, "nozzle_temper": 200.0, "fan": 1})));
        assert_eq!(
            s.snapshot().last_changed,
            BTreeSet::from([StatusField::Percent, StatusField::NozzleTemp])
        );

        s.on_message(REPORT, &push_status(json!({"mc_percent": 1, "nozzle_temper": 210.0, "fan": 2})));
        assert_eq!(
            s.snapshot().last_changed,
            BTreeSet::from([StatusField::NozzleTemp])
        );

        // A non-status report resets it.
        s.on_message(REPORT, br#"{"print": {"command": "gcode_line"}}"#);
        assert!(s.snapshot().last_changed.is_empty());
        assert_eq!(s.snapshot().print["fan"], 2);
    }

    #[test]
    fn test_version_report() {
        let (s, _mock) = session(Some(DEVICE), false);
        let body = json!({"info": {"command": "get_version", "module": [
            {"name": "ota", "sw_ver": "01.05.00.00", "hw_ver": "", "sn": "X"}
        ]}});
        s.on_message(REPORT, body.to_string().as_bytes());
        let version = s.snapshot().version.unwrap();
        assert_eq!(version[0].name, "ota");
    }

    #[test]
    fn test_malformed_payload_wakes_one_waiter_without_changes() {
        let (s, _mock) = session(Some(DEVICE), false);
        s.on_message(REPORT, &push_status(json!({"mc_percent": 9})));
        let before = s.snapshot();

        let waiter = {
            let s = Arc::clone(&s);
            thread::spawn(move || s.wait())
        };
        await_waiters(&s, 1);

        s.on_message(REPORT, b"{not json");
        let seen = waiter.join().unwrap();

        assert_eq!(seen, before);
        assert_eq!(s.snapshot(), before);
        assert_eq!(waiter_count(&s), 0);
    }

    #[test]
    fn test_unchanged_report_still_wakes() {
        let (s, _mock) = session(Some(DEVICE), false);
        s.on_message(REPORT, &push_status(json!({"mc_percent": 9})));

        let waiter = {
            let s = Arc::clone(&s);
            thread::spawn(move || s.wait())
        };
        await_waiters(&s, 1);
        s.on_message(REPORT, &push_status(json!({"mc_percent": 9})));
        let seen = waiter.join().unwrap();
        assert!(seen.last_changed.is_empty());
    }

    #[test]
    fn test_on_connect_subscribes_and_refreshes() {
        let (s, mock) = session(Some(DEVICE), false);
        s.on_connect(ConnectCode::Accepted);
        assert_eq!(mock.get_subscriptions(), vec!["#".to_string()]);
        assert_eq!(mock.get_publishes().len(), 1);
        assert_eq!(s.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn test_on_connect_without_identity_swallows_not_ready() {
        let (s, mock) = session(None, false);
        s.on_connect(ConnectCode::Accepted);
        assert_eq!(mock.get_subscriptions().len(), 1);
        assert!(mock.get_publishes().is_empty());
    }

    #[test]
    fn test_disconnect_without_reconnect_is_terminal() {
        let (s, _mock) = session(Some(DEVICE), false);
        s.on_connect(ConnectCode::Accepted);

        let waiter = {
            let s = Arc::clone(&s);
            thread::spawn(move || s.wait())
        };
        await_waiters(&s, 1);

        let mut link = ScriptedReconnect::new();
        let link_state = s.on_disconnect(DisconnectReason::Error("reset".into()), &mut link);

        assert_eq!(link_state, LinkState::Down);
        assert_eq!(link.attempts(), 0);
        let seen = waiter.join().unwrap();
        assert_eq!(seen.connection, ConnectionState::Disconnected);
        assert_eq!(s.connection_state(), ConnectionState::Disconnected);

        // Terminal: waiting no longer blocks.
        assert_eq!(s.wait().connection, ConnectionState::Disconnected);
    }

    #[test]
    fn test_unauthorized_disconnect_follows_same_policy() {
        let (s, _mock) = session(Some(DEVICE), false);
        let mut link = ScriptedReconnect::new();
        assert_eq!(
            s.on_disconnect(DisconnectReason::Unauthorized, &mut link),
            LinkState::Down
        );
        assert_eq!(s.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_reconnect_retries_until_success() {
        let (s, mock) = session(Some(DEVICE), true);
        s.on_connect(ConnectCode::Accepted);

        let mut link = ScriptedReconnect::new()
            .fail_with(TransportError::Timeout)
            .fail_with(TransportError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)))
            .fail_with(TransportError::Refused(ConnectCode::Other(3)));
        let link_state = s.on_disconnect(DisconnectReason::Unauthorized, &mut link);

        assert_eq!(link_state, LinkState::Up);
        assert_eq!(link.attempts(), 4);
        assert_eq!(s.connection_state(), ConnectionState::Connected);
        // Resubscribed after the reconnect.
        assert_eq!(mock.get_subscriptions().len(), 2);
    }

    #[test]
    fn test_client_close_ends_reconnect_policy() {
        let (s, _mock) = session(Some(DEVICE), true);
        let mut link = ScriptedReconnect::new();
        assert_eq!(
            s.on_disconnect(DisconnectReason::ClientClosed, &mut link),
            LinkState::Down
        );
        assert_eq!(link.attempts(), 0);
        assert_eq!(s.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_out_of_range_remaining_time_still_wakes() {
        let (s, _mock) = session(Some(DEVICE), false);
        s.on_message(REPORT, &push_status(json!({"mc_remaining_time": 30})));

        for huge in [json!(1_000_000_000_000i64), json!(1e300)] {
            let waiter = {
                let s = Arc::clone(&s);
                thread::spawn(move || s.wait())
            };
            await_waiters(&s, 1);

            s.on_message(REPORT, &push_status(json!({"mc_remaining_time": huge})));
            let seen = waiter.join().unwrap();

            assert_eq!(seen.get(StatusField::RemainingMinutes), Some(&huge));
            assert_eq!(
                seen.last_changed,
                BTreeSet::from([StatusField::RemainingMinutes])
            );
            assert!(seen.remaining.is_none());
            assert_eq!(seen.connection, ConnectionState::Connecting);
        }
    }

    #[test]
    fn test_file_channel_is_reused() {
        let (s, _mock) = session(Some(DEVICE), false);
        let channel = |files: &mut LazyFileChannel| Ok(files as *const LazyFileChannel as usize);
        let first = s.with_files(channel).unwrap();
        let second = s.with_files(channel).unwrap();
        assert_eq!(first, second);
        assert!(!s.with_files(|files| Ok(files.is_connected())).unwrap());

        let err = s
            .with_files(|_| Err::<(), _>(FileTransferError::InvalidPath("/".into())))
            .unwrap_err();
        assert!(matches!(err, SessionError::Files(FileTransferError::InvalidPath(_))));

        // Closing ends the channel; the next use opens a fresh one.
        s.close().unwrap();
        assert!(s.with_files(channel).is_ok());
    }

    #[test]
    fn test_close_disconnects_transport() {
        let (s, mock) = session(Some(DEVICE), false);
        s.close().unwrap();
        assert!(mock.is_closed());
        assert!(matches!(s.push_all(), Err(SessionError::Transport(TransportError::Closed))));
    }
}
