//! Session configuration: endpoint, credentials and connection options.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{AuthMethod, ConnectRequest};

pub const URL_ENV: &str = "MOJOCODE_WS_URL";
pub const TOKEN_ENV: &str = "MOJOCODE_TOKEN";
pub const LEGACY_URL_ENV: &str = "BEAM_WS_URL";
pub const LEGACY_TOKEN_ENV: &str = "BEAM_TOKEN";
pub const CONNECT_TIMEOUT_ENV: &str = "MOJOCODE_CONNECT_TIMEOUT_SECS";
pub const AUTH_MODE_ENV: &str = "MOJOCODE_AUTH_MODE";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },
}

fn default_connect_timeout_secs() -> u64 {
    15
}

/// Everything [`crate::manager::SessionManager::init`] needs to build a session.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub auth: AuthMethod,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Connect once as part of `init`. Off unless asked for.
    #[serde(default)]
    pub auto_connect: bool,
    /// Sent as a `user` message after the first successful connect.
    #[serde(default)]
    pub initial_prompt: Option<String>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("url", &self.url)
            .field("token", &crate::session::redacted(&self.token))
            .field("auth", &self.auth)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("auto_connect", &self.auto_connect)
            .field("initial_prompt", &self.initial_prompt)
            .finish()
    }
}

impl SessionConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            auth: AuthMethod::default(),
            connect_timeout_secs: default_connect_timeout_secs(),
            auto_connect: false,
            initial_prompt: None,
        }
    }

    pub fn with_auth(mut self, auth: AuthMethod) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn with_initial_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.initial_prompt = if prompt.trim().is_empty() {
            None
        } else {
            Some(prompt)
        };
        self
    }

    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn connect_request(&self) -> ConnectRequest {
        ConnectRequest::new(self.url.clone(), self.token.clone()).with_auth(self.auth.clone())
    }

    /// Checks the values a real connection attempt needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ConfigError::Missing(URL_ENV));
        }
        let scheme_ok = ["ws://", "wss://"].iter().any(|scheme| {
            url.len() > scheme.len() && url[..scheme.len()].eq_ignore_ascii_case(scheme)
        });
        if !scheme_ok {
            return Err(ConfigError::Invalid {
                key: URL_ENV,
                reason: format!("'{url}' must start with ws:// or wss://"),
            });
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: CONNECT_TIMEOUT_ENV,
                reason: "must be at least 1 second".to_string(),
            });
        }
        Ok(())
    }

    /// Read configuration from the process environment, loading `.env` first
    /// when one is present.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!("ignoring unreadable .env file: {e}"),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |primary: &str, legacy: Option<&str>| {
            lookup(primary)
                .or_else(|| legacy.and_then(&lookup))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let url = read(URL_ENV, Some(LEGACY_URL_ENV)).ok_or(ConfigError::Missing(URL_ENV))?;
        let token = read(TOKEN_ENV, Some(LEGACY_TOKEN_ENV)).unwrap_or_default();
        if token.is_empty() {
            tracing::warn!("{TOKEN_ENV} is not set, connecting without credentials");
        }

        let mut config = Self::new(url, token);

        if let Some(raw) = read(CONNECT_TIMEOUT_ENV, None) {
            config.connect_timeout_secs = raw.parse().map_err(|_| ConfigError::Invalid {
                key: CONNECT_TIMEOUT_ENV,
                reason: format!("'{raw}' is not a whole number of seconds"),
            })?;
        }

        if let Some(raw) = read(AUTH_MODE_ENV, None) {
            config.auth = raw.parse().map_err(|reason| ConfigError::Invalid {
                key: AUTH_MODE_ENV,
                reason,
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_reads_primary_keys() {
        let config = SessionConfig::from_lookup(lookup_from(&[
            (URL_ENV, "wss://agent.test/ws"),
            (TOKEN_ENV, "abc"),
            (CONNECT_TIMEOUT_ENV, "5"),
            (AUTH_MODE_ENV, "query"),
        ]))
        .unwrap();

        assert_eq!(config.url, "wss://agent.test/ws");
        assert_eq!(config.token, "abc");
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.auth,
            AuthMethod::QueryParam {
                name: "token".to_string()
            }
        );
        assert!(!config.auto_connect);
    }

    #[test]
    fn test_from_lookup_falls_back_to_legacy_keys() {
        let config = SessionConfig::from_lookup(lookup_from(&[
            (LEGACY_URL_ENV, "ws://localhost:8080"),
            (LEGACY_TOKEN_ENV, "legacy"),
        ]))
        .unwrap();

        assert_eq!(config.url, "ws://localhost:8080");
        assert_eq!(config.token, "legacy");
        assert_eq!(config.auth, AuthMethod::BearerHeader);
    }

    #[test]
    fn test_from_lookup_prefers_primary_over_legacy() {
        let config = SessionConfig::from_lookup(lookup_from(&[
            (URL_ENV, "wss://new.test"),
            (LEGACY_URL_ENV, "wss://old.test"),
        ]))
        .unwrap();
        assert_eq!(config.url, "wss://new.test");
        assert_eq!(config.token, "");
    }

    #[test]
    fn test_from_lookup_errors() {
        assert_eq!(
            SessionConfig::from_lookup(lookup_from(&[])).unwrap_err(),
            ConfigError::Missing(URL_ENV)
        );

        let err = SessionConfig::from_lookup(lookup_from(&[
            (URL_ENV, "wss://agent.test"),
            (CONNECT_TIMEOUT_ENV, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == CONNECT_TIMEOUT_ENV));

        let err = SessionConfig::from_lookup(lookup_from(&[
            (URL_ENV, "wss://agent.test"),
            (AUTH_MODE_ENV, "cookie"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == AUTH_MODE_ENV));
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        assert!(SessionConfig::new("", "t").validate().is_err());
        assert!(SessionConfig::new("https://agent.test", "t").validate().is_err());
        assert!(SessionConfig::new("wss://", "t").validate().is_err());
        assert!(SessionConfig::new("WSS://agent.test", "t").validate().is_ok());
        assert!(SessionConfig::new("ws://127.0.0.1:9000/ws", "").validate().is_ok());
        assert!(SessionConfig::new("wss://agent.test", "t")
            .with_connect_timeout_secs(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = SessionConfig::new("wss://agent.test", "super-secret-token");
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_initial_prompt_ignores_blank() {
        let config = SessionConfig::new("wss://agent.test", "t").with_initial_prompt("   ");
        assert_eq!(config.initial_prompt, None);
        let config = config.with_initial_prompt("Build a landing page");
        assert_eq!(config.initial_prompt.as_deref(), Some("Build a landing page"));
    }

    #[test]
    fn test_connect_request_carries_auth() {
        let config = SessionConfig::new("wss://agent.test", "abc").with_auth(AuthMethod::QueryParam {
            name: "key".to_string(),
        });
        let request = config.connect_request();
        assert_eq!(request.url, "wss://agent.test");
        assert_eq!(request.authorized_url(), "wss://agent.test?key=abc");
    }

    #[test]
    fn test_from_json_file_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"url":"wss://agent.test","token":"abc","auto_connect":true}}"#).unwrap();

        let config = SessionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.connect_timeout_secs, 15);
        assert!(config.auto_connect);
        assert_eq!(config.auth, AuthMethod::BearerHeader);
        assert_eq!(config.initial_prompt, None);
    }

    #[test]
    fn test_from_json_file_reports_read_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            SessionConfig::from_json_file(&missing),
            Err(ConfigError::Read { .. })
        ));
    }
}
