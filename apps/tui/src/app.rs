//! Application state and logic.
//!
//! Contains the app state (Model), input handling (Controller).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use bblp_core::events::{LogLevel, SessionEvent, SessionObserver};
use bblp_core::{DeviceSession, PubSubTransport, SessionError, StateSnapshot};
use chrono::Local;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Maximum log entries to keep.
const MAX_LOG_ENTRIES: usize = 1000;
/// Maximum undrained observer events.
const MAX_PENDING_EVENTS: usize = 100;

/// Application state.
pub struct App<T: PubSubTransport> {
    /// Current view/tab.
    pub current_tab: Tab,
    /// Latest copy of the session state, refreshed every tick.
    pub snapshot: StateSnapshot,
    pub device_id: Option<String>,
    pub host: String,
    /// Log entries.
    pub logs: VecDeque<LogEntry>,
    /// Log scroll position.
    pub log_scroll: usize,
    /// Stop needs a second press.
    pub confirm_stop: bool,
    session: Arc<DeviceSession<T, TuiObserver>>,
    observer: Arc<TuiObserver>,
}

/// Tab/view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Status,
    Logs,
    Help,
}

/// Log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: String,
}

/// TUI observer that collects events for display.
pub struct TuiObserver {
    events: Mutex<VecDeque<SessionEvent>>,
}

impl TuiObserver {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(MAX_PENDING_EVENTS)),
        }
    }

    pub fn drain_events(&self) -> Vec<SessionEvent> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.drain(..).collect()
    }
}

impl Default for TuiObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionObserver for TuiObserver {
    fn on_event(&self, event: &SessionEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= MAX_PENDING_EVENTS {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

impl<T: PubSubTransport> App<T> {
    pub fn new(session: Arc<DeviceSession<T, TuiObserver>>, observer: Arc<TuiObserver>) -> Self {
        Self {
            current_tab: Tab::Status,
            snapshot: session.snapshot(),
            device_id: session.device_id(),
            host: session.host().to_string(),
            logs: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            log_scroll: 0,
            confirm_stop: false,
            session,
            observer,
        }
    }

    /// Handle keyboard input. Returns true if app should quit.
    pub fn on_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Char('q') | KeyCode::Char('c')
                if key.modifiers.contains(KeyModifiers::CONTROL) =>
            {
                return true;
            }
            KeyCode::Esc => {
                if self.current_tab != Tab::Status {
                    self.current_tab = Tab::Status;
                    return false;
                }
                return true;
            }
            KeyCode::F(1) => {
                self.current_tab = Tab::Help;
                return false;
            }
            KeyCode::F(2) => {
                self.current_tab = Tab::Logs;
                return false;
            }
            _ => {}
        }

        match self.current_tab {
            Tab::Status => self.handle_status_key(key),
            Tab::Logs => self.handle_logs_key(key),
            Tab::Help => {
                // Any key returns to status
                self.current_tab = Tab::Status;
            }
        }

        false
    }

    fn handle_status_key(&mut self, key: KeyEvent) {
        let confirm_stop = std::mem::take(&mut self.confirm_stop);
        let result = match key.code {
            KeyCode::Char('p') => self.session.pause(),
            KeyCode::Char('r') => self.session.resume(),
            KeyCode::Char('u') => self.session.push_all(),
            KeyCode::Char('v') => self.session.request_version(),
            KeyCode::Char('s') if confirm_stop => self.session.stop(),
            KeyCode::Char('s') => {
                self.confirm_stop = true;
                self.add_log(LogLevel::Warn, "Press s again to stop the print");
                return;
            }
            _ => return,
        };

        match result {
            Ok(_) => {}
            Err(SessionError::NotReady) => {
                self.add_log(LogLevel::Warn, "Device ID not known yet, try again shortly");
            }
            Err(e) => self.add_log(LogLevel::Error, format!("Command failed: {}", e)),
        }
    }

    fn handle_logs_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.log_scroll = self.log_scroll.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.log_scroll < self.logs.len().saturating_sub(1) {
                    self.log_scroll += 1;
                }
            }
            KeyCode::PageUp => {
                self.log_scroll = self.log_scroll.saturating_sub(10);
            }
            KeyCode::PageDown => {
                self.log_scroll = (self.log_scroll + 10).min(self.logs.len().saturating_sub(1));
            }
            KeyCode::Home => {
                self.log_scroll = 0;
            }
            KeyCode::End => {
                self.log_scroll = self.logs.len().saturating_sub(1);
            }
            _ => {}
        }
    }

    /// Called on each tick - process observer events and refresh state.
    pub fn on_tick(&mut self) {
        for event in self.observer.drain_events() {
            self.process_session_event(event);
        }
        self.snapshot = self.session.snapshot();
        self.device_id = self.session.device_id();
    }

    fn process_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected { host } => {
                self.add_log(LogLevel::Info, format!("Connected to {}", host));
            }
            SessionEvent::Disconnected { reason, state } => {
                self.add_log(LogLevel::Warn, format!("Disconnected: {} ({})", reason, state));
            }
            SessionEvent::IdentityResolved { device_id } => {
                self.add_log(LogLevel::Info, format!("Printer device ID: {}", device_id));
            }
            SessionEvent::StatusChanged { changed } => {
                if !changed.is_empty() {
                    let names: Vec<String> = changed.iter().map(|f| f.to_string()).collect();
                    self.add_log(LogLevel::Debug, format!("Changed: {}", names.join(", ")));
                }
            }
            SessionEvent::VersionReceived { modules } => {
                self.add_log(LogLevel::Info, format!("Version info for {} modules", modules));
            }
            SessionEvent::CommandSent {
                namespace,
                command,
                sequence_id,
            } => {
                self.add_log(
                    LogLevel::Info,
                    format!("Sent {}.{} (#{})", namespace, command, sequence_id),
                );
            }
            SessionEvent::Undecodable { topic, reason } => {
                self.add_log(LogLevel::Warn, format!("Dropped payload on {}: {}", topic, reason));
            }
            SessionEvent::Log { level, message } => {
                self.add_log(level, message);
            }
        }
    }

    pub fn add_log(&mut self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            level,
            message: message.into(),
            timestamp: Local::now().format("%H:%M:%S").to_string(),
        };

        if self.logs.len() >= MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(entry);

        // Auto-scroll to bottom
        self.log_scroll = self.logs.len().saturating_sub(1);
    }

    /// Drop the MQTT link before exiting.
    pub fn shutdown(&self) {
        if let Err(e) = self.session.close() {
            tracing::debug!(error = %e, "Close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bblp_core::transport::{MockTransport, SessionHandler};
    use bblp_core::SessionConfig;

    const REPORT: &str = "device/01P00A000000001/report";
    const STATUS: &[u8] =
        br#"{"print": {"command": "push_status", "mc_percent": 12, "mc_print_stage": "2"}}"#;

    fn app() -> (App<MockTransport>, Arc<DeviceSession<MockTransport, TuiObserver>>, MockTransport) {
        let mock = MockTransport::new();
        let observer = Arc::new(TuiObserver::new());
        let config = SessionConfig::new("192.168.1.50", "12345678");
        let session = Arc::new(DeviceSession::with_observer(
            &config,
            mock.clone(),
            Arc::clone(&observer),
        ));
        (App::new(Arc::clone(&session), observer), session, mock)
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_tick_pulls_state_and_events() {
        let (mut app, session, _mock) = app();
        session.on_message(REPORT, STATUS);
        app.on_tick();

        assert_eq!(app.snapshot.status().percent, Some(12));
        assert_eq!(app.device_id.as_deref(), Some("01P00A000000001"));
        assert!(app.logs.iter().any(|l| l.message.contains("01P00A000000001")));
    }

    #[test]
    fn test_command_before_identity_is_logged() {
        let (mut app, _session, mock) = app();
        assert!(!app.on_key(key(KeyCode::Char('p'))));
        assert!(mock.get_publishes().is_empty());
        assert_eq!(app.logs.back().unwrap().level, LogLevel::Warn);
    }

    #[test]
    fn test_stop_needs_confirmation() {
        let (mut app, session, mock) = app();
        session.on_message(REPORT, STATUS);
        mock.clear_publishes();

        app.on_key(key(KeyCode::Char('s')));
        assert!(mock.get_publishes().is_empty());
        app.on_key(key(KeyCode::Char('s')));
        assert_eq!(mock.get_publishes().len(), 1);

        // Any other key cancels the pending confirmation
        app.on_key(key(KeyCode::Char('s')));
        app.on_key(key(KeyCode::Char('x')));
        app.on_key(key(KeyCode::Char('s')));
        assert_eq!(mock.get_publishes().len(), 1);
    }

    #[test]
    fn test_tabs_and_quit() {
        let (mut app, _session, _mock) = app();
        assert!(!app.on_key(key(KeyCode::F(2))));
        assert_eq!(app.current_tab, Tab::Logs);
        assert!(!app.on_key(key(KeyCode::Esc)));
        assert_eq!(app.current_tab, Tab::Status);
        assert!(app.on_key(key(KeyCode::Esc)));
    }
}
