//! Mock pub/sub transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{PubSubTransport, Reconnect, TransportError};

/// Mock transport for unit testing session logic.
#[derive(Clone, Default)]
pub struct MockTransport {
    /// Captured subscriptions.
    subscriptions: Arc<Mutex<Vec<String>>>,
    /// Captured publishes as (topic, payload).
    publish_log: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    /// Whether the client has been shut down.
    closed: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all captured publishes.
    pub fn get_publishes(&self) -> Vec<(String, Vec<u8>)> {
        self.publish_log.lock().unwrap().clone()
    }

    /// Clear captured publishes.
    pub fn clear_publishes(&self) {
        self.publish_log.lock().unwrap().clear();
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl PubSubTransport for MockTransport {
    fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.subscriptions.lock().unwrap().push(filter.to_string());
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.publish_log
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

/// Replays queued reconnect outcomes, then succeeds.
#[derive(Default)]
pub struct ScriptedReconnect {
    outcomes: VecDeque<Result<(), TransportError>>,
    attempts: usize,
}

impl ScriptedReconnect {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for the next attempt.
    pub fn fail_with(mut self, error: TransportError) -> Self {
        self.outcomes.push_back(Err(error));
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl Reconnect for ScriptedReconnect {
    fn reconnect(&mut self) -> Result<(), TransportError> {
        self.attempts += 1;
        self.outcomes.pop_front().unwrap_or(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_publish_capture() {
        let mock = MockTransport::new();
        mock.publish("a/b", b"Hello".to_vec()).unwrap();
        mock.publish("a/c", b"World".to_vec()).unwrap();

        let publishes = mock.get_publishes();
        assert_eq!(publishes.len(), 2);
        assert_eq!(publishes[0], ("a/b".to_string(), b"Hello".to_vec()));
        assert_eq!(publishes[1].0, "a/c");

        mock.clear_publishes();
        assert!(mock.get_publishes().is_empty());
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        mock.disconnect().unwrap();
        assert!(mock.is_closed());
        assert!(mock.publish("t", vec![]).is_err());
        assert!(mock.subscribe("#").is_err());
    }

    #[test]
    fn test_scripted_reconnect() {
        let mut r = ScriptedReconnect::new()
            .fail_with(TransportError::Timeout)
            .fail_with(TransportError::Closed);
        assert!(matches!(r.reconnect(), Err(TransportError::Timeout)));
        assert!(matches!(r.reconnect(), Err(TransportError::Closed)));
        assert!(r.reconnect().is_ok());
        assert_eq!(r.attempts(), 3);
    }
}
