//! Client settings, layered from defaults, an optional TOML file and
//! `DWALLET_*` environment variables (later sources win).

use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CeremonyError, Result};
use crate::types::ObjectId;

/// Environment prefix for overrides, e.g. `DWALLET_TIMEOUT_MS`.
pub const ENV_PREFIX: &str = "DWALLET";

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9000";
pub const DEFAULT_TIMEOUT_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
/// Upper bound the ledger accepts for one event page.
pub const MAX_PAGE_LIMIT: usize = 1000;
pub const DEFAULT_GAS_BUDGET: u64 = 1_000_000_000;

/// How the correlator walks the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStrategy {
    /// Resume strictly after the last event seen, starting at the
    /// start-session event.
    #[default]
    Cursor,
    /// Re-query the trailing `[now - 2 * interval, now]` time window.
    Window,
}

impl std::str::FromStr for PollStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cursor" => Ok(Self::Cursor),
            "window" => Ok(Self::Window),
            other => Err(format!("Unknown poll strategy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    pub rpc_url: String,
    /// Budget for a single completion wait.
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub page_limit: usize,
    #[serde(default)]
    pub poll_strategy: PollStrategy,
    pub gas_budget: u64,

    /// Package publishing the `ika` coin type.
    #[serde(default)]
    pub ika_package_id: Option<ObjectId>,
    /// Package publishing the `dwallet_2pc_mpc_secp256k1` module.
    #[serde(default)]
    pub ika_system_package_id: Option<ObjectId>,
    /// Root system object; protocol state hangs off its dynamic fields.
    #[serde(default)]
    pub system_object_id: Option<ObjectId>,
    #[serde(default)]
    pub protocol_state_object_id: Option<ObjectId>,
    #[serde(default)]
    pub network_decryption_key_id: Option<ObjectId>,
    pub network_version: u64,

    /// File holding the hex-encoded ed25519 seed used to sign transactions.
    #[serde(default)]
    pub keystore_path: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            page_limit: MAX_PAGE_LIMIT,
            poll_strategy: PollStrategy::Cursor,
            gas_budget: DEFAULT_GAS_BUDGET,
            ika_package_id: None,
            ika_system_package_id: None,
            system_object_id: None,
            protocol_state_object_id: None,
            network_decryption_key_id: None,
            network_version: 0,
            keystore_path: None,
        }
    }
}

impl ClientSettings {
    /// Load settings from defaults, `path` (if given and present) and the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Self::defaults_builder()?;

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading client settings file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let settings: ClientSettings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| CeremonyError::Configuration(format!("Failed to load settings: {}", e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from an in-memory TOML document layered over the
    /// defaults. Environment variables are not consulted.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings: ClientSettings = Self::defaults_builder()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| CeremonyError::Configuration(format!("Invalid settings: {}", e)))?;

        settings.validate()?;
        Ok(settings)
    }

    fn defaults_builder() -> Result<::config::ConfigBuilder<::config::builder::DefaultState>> {
        let d = Self::default();
        let to_err = |e: ::config::ConfigError| CeremonyError::Configuration(e.to_string());

        Config::builder()
            .set_default("rpc_url", d.rpc_url)
            .and_then(|b| b.set_default("timeout_ms", d.timeout_ms))
            .and_then(|b| b.set_default("poll_interval_ms", d.poll_interval_ms))
            .and_then(|b| b.set_default("page_limit", d.page_limit as u64))
            .and_then(|b| b.set_default("poll_strategy", "cursor"))
            .and_then(|b| b.set_default("gas_budget", d.gas_budget))
            .and_then(|b| b.set_default("network_version", d.network_version))
            .map_err(to_err)
    }

    /// Reject settings the correlator cannot run with.
    pub fn validate(&self) -> Result<()> {
        validate_polling(self.timeout(), self.poll_interval())?;
        if self.page_limit == 0 || self.page_limit > MAX_PAGE_LIMIT {
            return Err(CeremonyError::Configuration(format!(
                "page_limit must be within 1..={}, got {}",
                MAX_PAGE_LIMIT, self.page_limit
            )));
        }
        if self.rpc_url.is_empty() {
            return Err(CeremonyError::Configuration("rpc_url is empty".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Fetch a required package/object id, naming the setting when absent.
    pub fn require(&self, value: Option<ObjectId>, name: &str) -> Result<ObjectId> {
        value.ok_or_else(|| CeremonyError::Configuration(format!("{} is not configured", name)))
    }
}

/// The poll interval must be non-zero and fit at least once in the timeout.
pub fn validate_polling(timeout: Duration, poll_interval: Duration) -> Result<()> {
    if poll_interval.is_zero() {
        return Err(CeremonyError::Configuration(
            "poll_interval_ms must be greater than zero".into(),
        ));
    }
    if timeout < poll_interval {
        return Err(CeremonyError::Configuration(format!(
            "timeout_ms ({}) must be at least poll_interval_ms ({})",
            timeout.as_millis(),
            poll_interval.as_millis()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ClientSettings::from_toml_str("").unwrap();
        assert_eq!(settings, ClientSettings::default());
        assert_eq!(settings.timeout(), Duration::from_secs(300));
        assert_eq!(settings.poll_interval(), Duration::from_secs(5));
        assert_eq!(settings.poll_strategy, PollStrategy::Cursor);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let package = ObjectId::from_u8(7);
        let toml = format!(
            r#"
            rpc_url = "https://fullnode.example:443"
            timeout_ms = 60000
            poll_strategy = "window"
            ika_package_id = "{}"
            "#,
            package
        );
        let settings = ClientSettings::from_toml_str(&toml).unwrap();
        assert_eq!(settings.rpc_url, "https://fullnode.example:443");
        assert_eq!(settings.timeout_ms, 60_000);
        assert_eq!(settings.poll_strategy, PollStrategy::Window);
        assert_eq!(settings.ika_package_id, Some(package));
        assert_eq!(settings.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let err = ClientSettings::from_toml_str("poll_interval_ms = 0").unwrap_err();
        assert!(matches!(err, CeremonyError::Configuration(_)));
    }

    #[test]
    fn test_validation_rejects_timeout_below_interval() {
        let settings = ClientSettings {
            timeout_ms: 1_000,
            poll_interval_ms: 5_000,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_page_limit_bounds() {
        let mut settings = ClientSettings {
            page_limit: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        settings.page_limit = MAX_PAGE_LIMIT + 1;
        assert!(settings.validate().is_err());
        settings.page_limit = MAX_PAGE_LIMIT;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_require_names_missing_setting() {
        let settings = ClientSettings::default();
        let err = settings
            .require(settings.ika_package_id, "ika_package_id")
            .unwrap_err();
        assert!(err.to_string().contains("ika_package_id"));
    }

    #[test]
    fn test_poll_strategy_from_str() {
        assert_eq!("Window".parse::<PollStrategy>().unwrap(), PollStrategy::Window);
        assert!("latest".parse::<PollStrategy>().is_err());
    }
}
