// src/settings.rs
//! Layered service configuration.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. `verifier.toml` in the working directory (optional)
//! 3. Environment variables prefixed `VERIFIER__`, nested with `__`
//!    (e.g. `VERIFIER__LEDGER__TIMEOUT_SECS=10`)

use crate::models::subject::{AccountId, InvalidAccountId};
use crate::storage::history_store::MAX_PAGE_SIZE;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Sepolia deployment of the user registry.
pub const DEFAULT_REGISTRY_ADDRESS: &str = "0x2B63013176D551b98045703f41A00f6BcCa04DdC";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerSettings {
    pub rpc_url: String,
    pub registry_address: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistorySettings {
    pub page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSettings {
    pub channel_capacity: usize,
    #[serde(default)]
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub ledger: LedgerSettings,
    pub history: HistorySettings,
    pub notifications: NotificationSettings,
}

impl Settings {
    /// Loads settings from defaults, `verifier.toml` and the environment.
    pub fn load() -> Result<Self, SettingsError> {
        let config = Self::defaults()?
            .add_source(File::with_name("verifier").required(false))
            .add_source(
                Environment::with_prefix("VERIFIER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::from_config(config)
    }

    /// Builder pre-populated with every default.
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000_i64)?
            .set_default("ledger.rpc_url", "https://rpc.sepolia.org")?
            .set_default("ledger.registry_address", DEFAULT_REGISTRY_ADDRESS)?
            .set_default("ledger.timeout_secs", 5_i64)?
            .set_default("history.page_size", MAX_PAGE_SIZE as i64)?
            .set_default("notifications.channel_capacity", 64_i64)?
            .set_default("notifications.webhook_timeout_secs", 5_i64)
    }

    /// Deserializes and validates an already-built configuration.
    pub fn from_config(config: Config) -> Result<Self, SettingsError> {
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.ledger.timeout_secs == 0 {
            return Err(SettingsError::Invalid {
                key: "ledger.timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.history.page_size) {
            return Err(SettingsError::Invalid {
                key: "history.page_size",
                reason: format!("must be between 1 and {}", MAX_PAGE_SIZE),
            });
        }
        if self.notifications.channel_capacity == 0 {
            return Err(SettingsError::Invalid {
                key: "notifications.channel_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        if self.notifications.webhook_timeout_secs == 0 {
            return Err(SettingsError::Invalid {
                key: "notifications.webhook_timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        self.registry_address()?;
        Ok(())
    }

    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger.timeout_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.notifications.webhook_timeout_secs)
    }

    pub fn registry_address(&self) -> Result<AccountId, SettingsError> {
        self.ledger
            .registry_address
            .parse()
            .map_err(|e: InvalidAccountId| SettingsError::Invalid {
                key: "ledger.registry_address",
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(overrides: &[(&str, &str)]) -> Result<Settings, SettingsError> {
        let mut builder = Settings::defaults().unwrap();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value).unwrap();
        }
        Settings::from_config(builder.build().unwrap())
    }

    #[test]
    fn test_defaults() {
        let settings = build(&[]).unwrap();
        assert_eq!(settings.bind_address(), "127.0.0.1:3000".parse().unwrap());
        assert_eq!(settings.ledger_timeout(), Duration::from_secs(5));
        assert_eq!(settings.history.page_size, 50);
        assert_eq!(settings.notifications.channel_capacity, 64);
        assert!(settings.notifications.webhook_url.is_none());
        assert_eq!(settings.webhook_timeout(), Duration::from_secs(5));
        assert_eq!(
            settings.registry_address().unwrap().to_string(),
            DEFAULT_REGISTRY_ADDRESS.to_lowercase()
        );
    }

    #[test]
    fn test_overrides_apply() {
        let settings = build(&[
            ("server.port", "8080"),
            ("ledger.timeout_secs", "2"),
            ("notifications.webhook_url", "http://localhost:9000/events"),
        ])
        .unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.ledger_timeout(), Duration::from_secs(2));
        assert_eq!(
            settings.notifications.webhook_url.as_deref(),
            Some("http://localhost:9000/events")
        );
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let cases = [
            ("ledger.timeout_secs", "0", "ledger.timeout_secs"),
            ("history.page_size", "0", "history.page_size"),
            ("history.page_size", "51", "history.page_size"),
            ("notifications.channel_capacity", "0", "notifications.channel_capacity"),
            ("notifications.webhook_timeout_secs", "0", "notifications.webhook_timeout_secs"),
            ("ledger.registry_address", "2B63013176D551b98045703f41A00f6BcCa04DdC", "ledger.registry_address"),
        ];
        for (key, value, expected) in cases {
            match build(&[(key, value)]) {
                Err(SettingsError::Invalid { key, .. }) => assert_eq!(key, expected),
                other => panic!("{}={} should be invalid, got {:?}", key, value, other),
            }
        }
    }
}
