//! Session configuration.

use std::net::IpAddr;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::protocol::constants::DISCOVERY_TIMEOUT_SECS;

/// Configuration for a device session.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Printer address. Discovered when unset.
    pub host: Option<String>,
    /// LAN access code, used for MQTT and FTPS.
    pub access_code: String,
    /// Device ID. Learned from the first report when unset.
    pub device_id: Option<String>,
    /// Keep reconnecting forever instead of giving up on disconnect.
    pub reconnect: bool,
    /// Local address the discovery listener binds to.
    pub listen: Option<IpAddr>,
    /// Discovery timeout in seconds.
    pub discovery_timeout_secs: u64,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, access_code: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            access_code: access_code.into(),
            ..Default::default()
        }
        .with_defaults()
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay values given on the command line.
    pub fn merge(
        mut self,
        host: Option<String>,
        access_code: Option<String>,
        device_id: Option<String>,
        reconnect: bool,
        listen: Option<IpAddr>,
    ) -> Self {
        if host.is_some() {
            self.host = host;
        }
        if let Some(code) = access_code {
            self.access_code = code;
        }
        if device_id.is_some() {
            self.device_id = device_id;
        }
        self.reconnect |= reconnect;
        if listen.is_some() {
            self.listen = listen;
        }
        self
    }

    /// Fill in anything still unset.
    pub fn with_defaults(mut self) -> Self {
        if self.listen.is_none() {
            self.listen = Some(IpAddr::from([0, 0, 0, 0]));
        }
        if self.discovery_timeout_secs == 0 {
            self.discovery_timeout_secs = DISCOVERY_TIMEOUT_SECS;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = SessionConfig::default().with_defaults();
        assert_eq!(c.listen, Some(IpAddr::from([0, 0, 0, 0])));
        assert_eq!(c.discovery_timeout_secs, 10);
        assert!(!c.reconnect);
    }

    #[test]
    fn test_merge_overrides_only_given_values() {
        let base = SessionConfig {
            host: Some("10.0.0.2".into()),
            access_code: "filecode".into(),
            device_id: Some("DEV".into()),
            ..Default::default()
        };
        let merged = base.merge(None, Some("cli".into()), None, true, None);
        assert_eq!(merged.host.as_deref(), Some("10.0.0.2"));
        assert_eq!(merged.access_code, "cli");
        assert_eq!(merged.device_id.as_deref(), Some("DEV"));
        assert!(merged.reconnect);
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("bblp-config-{}.toml", std::process::id()));
        let config = SessionConfig::new("192.168.1.20", "12345678");
        config.save_to_file(&path).unwrap();
        let loaded = SessionConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_toml() {
        let c: SessionConfig = toml::from_str("access_code = \"abc\"\nreconnect = true\n").unwrap();
        assert_eq!(c.access_code, "abc");
        assert!(c.reconnect);
        assert!(c.host.is_none());
    }
}
