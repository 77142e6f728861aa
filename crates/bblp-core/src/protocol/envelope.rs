//! Inbound message decoding.
//!
//! Payloads are loosely structured JSON. Decoding never fails loudly: anything
//! that cannot be understood comes back as [`Decoded::Undecodable`] and is
//! dropped by the session.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::constants::{CMD_GET_VERSION, CMD_PUSH_STATUS};
use super::framing::unframe;
use super::topic::{Topic, TopicCategory, classify};

/// One entry of a `get_version` reply.
///
/// Firmware is loose about types here; null reads as empty and numbers or
/// other values are kept in their JSON text form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleVersion {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub hw_ver: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sw_ver: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sn: String,
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Decoded body, tagged by the kinds the session models.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportBody {
    /// `print.command == "push_status"`: job telemetry.
    PushStatus(Map<String, Value>),
    /// Any other `print` command (echoes of our own commands, acks).
    PrintCommand {
        command: Option<String>,
        payload: Map<String, Value>,
    },
    /// `info.command == "get_version"`.
    Version(Vec<ModuleVersion>),
    /// Any other `info` command.
    InfoCommand {
        command: Option<String>,
        payload: Map<String, Value>,
    },
    /// Valid JSON outside the modelled namespaces.
    Unrecognized(Value),
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub topic: Topic,
    pub body: ReportBody,
}

impl Envelope {
    pub fn category(&self) -> &TopicCategory {
        &self.topic.category
    }

    /// Command tag carried by the body, when there is one.
    pub fn command_name(&self) -> Option<&str> {
        match &self.body {
            ReportBody::PushStatus(_) => Some(CMD_PUSH_STATUS),
            ReportBody::Version(_) => Some(CMD_GET_VERSION),
            ReportBody::PrintCommand { command, .. } | ReportBody::InfoCommand { command, .. } => {
                command.as_deref()
            }
            ReportBody::Unrecognized(_) => None,
        }
    }
}

/// Result of decoding one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Envelope(Envelope),
    Undecodable { reason: String },
}

/// Decode a raw MQTT message.
pub fn decode(topic: &str, payload: &[u8]) -> Decoded {
    let Some(topic) = classify(topic) else {
        return Decoded::Undecodable {
            reason: format!("unexpected topic shape: {}", topic),
        };
    };

    let data = unframe(&topic.category, payload);
    let value: Value = match serde_json::from_slice(data) {
        Ok(v) => v,
        Err(e) => {
            return Decoded::Undecodable {
                reason: e.to_string(),
            };
        }
    };

    let body = classify_body(value);
    Decoded::Envelope(Envelope { topic, body })
}

fn classify_body(value: Value) -> ReportBody {
    let mut root = match value {
        Value::Object(root) => root,
        other => return ReportBody::Unrecognized(other),
    };

    if let Some(Value::Object(print)) = root.remove("print") {
        let command = command_of(&print);
        if command.as_deref() == Some(CMD_PUSH_STATUS) {
            return ReportBody::PushStatus(print);
        }
        return ReportBody::PrintCommand {
            command,
            payload: print,
        };
    }

    if let Some(Value::Object(info)) = root.remove("info") {
        let command = command_of(&info);
        if command.as_deref() == Some(CMD_GET_VERSION) {
            if let Some(Value::Array(entries)) = info.get("module") {
                return ReportBody::Version(modules_of(entries));
            }
            tracing::debug!("get_version reply without a usable module list");
        }
        return ReportBody::InfoCommand {
            command,
            payload: info,
        };
    }

    ReportBody::Unrecognized(Value::Object(root))
}

/// Entries that are not objects are dropped, never the whole list.
fn modules_of(entries: &[Value]) -> Vec<ModuleVersion> {
    entries
        .iter()
        .filter_map(|entry| match ModuleVersion::deserialize(entry) {
            Ok(module) => Some(module),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping module entry");
                None
            }
        })
        .collect()
}

fn command_of(map: &Map<String, Value>) -> Option<String> {
    map.get("command").and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REPORT: &str = "device/01P00A000000001/report";
    const REQUEST: &str = "device/01P00A000000001/request";

    #[test]
    fn test_push_status() {
        let payload = json!({"print": {"command": "push_status", "mc_percent": 42}});
        let Decoded::Envelope(env) = decode(REPORT, payload.to_string().as_bytes()) else {
            panic!("expected envelope");
        };
        assert_eq!(env.category(), &TopicCategory::Report);
        assert_eq!(env.command_name(), Some("push_status"));
        match env.body {
            ReportBody::PushStatus(map) => assert_eq!(map["mc_percent"], 42),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_other_print_command() {
        let payload = br#"{"print": {"command": "project_file", "sequence_id": 3}}"#;
        let Decoded::Envelope(env) = decode(REPORT, payload) else {
            panic!("expected envelope");
        };
        assert_eq!(env.command_name(), Some("project_file"));
        assert!(matches!(env.body, ReportBody::PrintCommand { .. }));
    }

    #[test]
    fn test_version() {
        let payload = json!({"info": {"command": "get_version", "module": [
            {"name": "ota", "hw_ver": "", "sw_ver": "01.04.00.00", "sn": "SN1"},
            {"name": "mc", "sw_ver": "00.00.22.41"}
        ]}});
        let Decoded::Envelope(env) = decode(REPORT, payload.to_string().as_bytes()) else {
            panic!("expected envelope");
        };
        match env.body {
            ReportBody::Version(modules) => {
                assert_eq!(modules.len(), 2);
                assert_eq!(modules[0].sw_ver, "01.04.00.00");
                assert_eq!(modules[1].sn, "");
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_version_with_loose_field_types() {
        let payload = json!({"info": {"command": "get_version", "module": [
            {"name": "ota", "hw_ver": null, "sw_ver": "01.04.00.00", "sn": 1234},
            {"name": "ams/0", "sw_ver": 22, "sn": null, "flag": true},
            "garbage"
        ]}});
        let Decoded::Envelope(env) = decode(REPORT, payload.to_string().as_bytes()) else {
            panic!("expected envelope");
        };
        match env.body {
            ReportBody::Version(modules) => {
                assert_eq!(modules.len(), 2);
                assert_eq!(modules[0].hw_ver, "");
                assert_eq!(modules[0].sn, "1234");
                assert_eq!(modules[1].sw_ver, "22");
                assert_eq!(modules[1].sn, "");
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_request_echo_is_unframed() {
        let mut payload = br#"{"pushing": {"command": "pushall", "sequence_id": 1}}"#.to_vec();
        payload.push(0);
        let Decoded::Envelope(env) = decode(REQUEST, &payload) else {
            panic!("expected envelope");
        };
        assert_eq!(env.category(), &TopicCategory::Request);
        assert!(matches!(env.body, ReportBody::Unrecognized(_)));
        assert_eq!(env.command_name(), None);
    }

    #[test]
    fn test_nul_on_report_is_undecodable() {
        let payload = b"{\"print\": {}}\0";
        assert!(matches!(decode(REPORT, payload), Decoded::Undecodable { .. }));
    }

    #[test]
    fn test_garbage_is_undecodable() {
        assert!(matches!(
            decode(REPORT, b"not json"),
            Decoded::Undecodable { .. }
        ));
        assert!(matches!(
            decode("nonsense", b"{}"),
            Decoded::Undecodable { .. }
        ));
    }
}
