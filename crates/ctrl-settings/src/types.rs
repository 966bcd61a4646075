use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use ctrl_core::ConfigDefaults;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

const DATABASE_FILE: &str = "ctrl.db";

/// Process-level settings. Unlike [`ctrl_core::Config`] these are fixed for
/// the lifetime of the process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// External `host[:port]` of the proxy, when known ahead of time.
    /// Targets resolving to it are refused even if the admin request
    /// arrived through a different name.
    pub public_authority: Option<String>,
    pub connect_timeout_ms: u64,
    pub upstream_timeout_ms: u64,
    pub max_request_body_bytes: usize,
    /// Text bodies are buffered whole for rewriting; larger ones pass through untouched.
    pub max_rewrite_body_bytes: usize,
    pub log_json: bool,
    pub defaults: ConfigDefaults,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1337,
            data_dir: PathBuf::from("./data"),
            public_authority: None,
            connect_timeout_ms: 10_000,
            upstream_timeout_ms: 60_000,
            max_request_body_bytes: 10 * 1024 * 1024,
            max_rewrite_body_bytes: 32 * 1024 * 1024,
            log_json: true,
            defaults: ConfigDefaults::default(),
        }
    }
}

impl ProxySettings {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| SettingsError::InvalidValue(format!("listen address {}:{}: {e}", self.host, self.port)))
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    /// Check the resolved settings before anything is started.
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        ctrl_core::validate_target(&self.defaults.target_url, self.public_authority.as_deref())?;
        if self.max_request_body_bytes == 0 || self.max_rewrite_body_bytes == 0 {
            return Err(SettingsError::InvalidValue("body limits must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = ProxySettings::default();
        assert_eq!(settings.port, 1337);
        assert_eq!(settings.database_path(), PathBuf::from("./data/ctrl.db"));
        assert_eq!(settings.upstream_timeout(), Duration::from_secs(60));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn invalid_host_rejected() {
        let settings = ProxySettings {
            host: "not an ip".into(),
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn looping_default_target_rejected() {
        let mut settings = ProxySettings {
            public_authority: Some("kiosk.local:1337".into()),
            ..Default::default()
        };
        settings.defaults.target_url = "http://kiosk.local:1337/".into();
        assert!(matches!(settings.validate(), Err(SettingsError::Target(_))));
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(ProxySettings::default()).unwrap();
        assert_eq!(json["dataDir"], "./data");
        assert_eq!(json["defaults"]["scrollSpeed"], 50);
    }
}
