//! Topic classification.
//!
//! The printer publishes on `device/{id}/report` and echoes commands sent to
//! `device/{id}/request`. Identity is taken from the middle segment.

use std::fmt;

use super::constants::{TOPIC_REPORT, TOPIC_REQUEST, TOPIC_ROOT};

/// Category taken from the last topic segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicCategory {
    Report,
    Request,
    Other(String),
}

impl fmt::Display for TopicCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicCategory::Report => write!(f, "{}", TOPIC_REPORT),
            TopicCategory::Request => write!(f, "{}", TOPIC_REQUEST),
            TopicCategory::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A classified inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    /// First segment (normally `device`).
    pub root: String,
    /// Device ID the message was published under.
    pub device_id: String,
    pub category: TopicCategory,
}

impl Topic {
    pub fn is_report(&self) -> bool {
        self.category == TopicCategory::Report
    }
}

/// Split a topic into its three fixed segments.
///
/// Returns `None` for anything that is not exactly `a/b/c`.
pub fn classify(topic: &str) -> Option<Topic> {
    let mut parts = topic.split('/');
    let root = parts.next()?;
    let device_id = parts.next()?;
    let category = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let category = match category {
        TOPIC_REPORT => TopicCategory::Report,
        TOPIC_REQUEST => TopicCategory::Request,
        other => TopicCategory::Other(other.to_string()),
    };

    Some(Topic {
        root: root.to_string(),
        device_id: device_id.to_string(),
        category,
    })
}

/// Topic commands for `device_id` are published to.
pub fn request_topic(device_id: &str) -> String {
    format!("{}/{}/{}", TOPIC_ROOT, device_id, TOPIC_REQUEST)
}
