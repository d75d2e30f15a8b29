//! Configuration loading and typed config structures for the Multiverse engine.
//!
//! The canonical configuration lives in `multiverse-config.yaml` at the
//! project root. This module defines strongly-typed structs that mirror the
//! YAML structure, and provides a loader that reads and validates the file.

use std::collections::BTreeSet;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::time::Duration;

use multiverse_types::{GameId, RealmId};
use serde::Deserialize;

use crate::orchestrator::GameRegistrationRequest;

/// Environment variable overriding `store.data_dir`.
pub const DATA_DIR_ENV: &str = "MULTIVERSE_DATA_DIR";

/// Environment variable overriding `logging.level`.
pub const LOG_LEVEL_ENV: &str = "MULTIVERSE_LOG_LEVEL";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `multiverse-config.yaml`. Every section is
/// optional and falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MultiverseConfig {
    /// Event store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Orchestration loop settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Realms registered and driven at startup.
    #[serde(default)]
    pub realms: Vec<RealmConfig>,

    /// Command harness settings.
    #[serde(default)]
    pub harness: HarnessConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MultiverseConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `MULTIVERSE_DATA_DIR` overrides `store.data_dir`
    /// - `MULTIVERSE_LOG_LEVEL` overrides `logging.level`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string. Environment
    /// overrides are not applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Override values with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(DATA_DIR_ENV) {
            self.store.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var(LOG_LEVEL_ENV) {
            self.logging.level = val;
        }
    }

    /// Check cross-field constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on zero intervals, zero snapshot
    /// cadences, or duplicate game/realm ids.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.control_tick_interval_ms == 0 {
            return Err(invalid("orchestrator.control_tick_interval_ms must be > 0"));
        }
        if self.harness.max_cascade_depth == 0 {
            return Err(invalid("harness.max_cascade_depth must be > 0"));
        }

        let mut games = BTreeSet::new();
        let mut realms = BTreeSet::new();
        for realm in &self.realms {
            if realm.tick_interval_ms == 0 {
                return Err(invalid(&format!(
                    "realm {}: tick_interval_ms must be > 0",
                    realm.realm_id
                )));
            }
            if realm.snapshot_every == Some(0) {
                return Err(invalid(&format!(
                    "realm {}: snapshot_every must be > 0 when set",
                    realm.realm_id
                )));
            }
            if !games.insert(realm.game_id.clone()) {
                return Err(invalid(&format!("duplicate game id {}", realm.game_id)));
            }
            if !realms.insert(realm.realm_id.clone()) {
                return Err(invalid(&format!("duplicate realm id {}", realm.realm_id)));
            }
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}

/// Event store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Root directory for stream logs and snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Orchestration loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrchestratorConfig {
    /// Wall-clock milliseconds between control ticks.
    #[serde(default = "default_control_tick_interval_ms")]
    pub control_tick_interval_ms: u64,

    /// Stop after this many control ticks (0 = run until stopped).
    #[serde(default)]
    pub max_control_ticks: u64,

    /// Actors allowed to mutate the registry (empty = everyone).
    #[serde(default)]
    pub allowed_actors: Vec<String>,
}

impl OrchestratorConfig {
    /// Control tick limit as an option (`None` = unbounded).
    pub const fn max_ticks(&self) -> Option<u64> {
        if self.max_control_ticks == 0 {
            None
        } else {
            Some(self.max_control_ticks)
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            control_tick_interval_ms: default_control_tick_interval_ms(),
            max_control_ticks: 0,
            allowed_actors: Vec::new(),
        }
    }
}

/// One realm to register and drive at startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RealmConfig {
    /// Game that owns the realm.
    pub game_id: GameId,

    /// Realm identifier.
    pub realm_id: RealmId,

    /// Developer responsible for the game.
    pub developer_name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Realm classification (defaults to `material`).
    #[serde(default)]
    pub realm_type: Option<String>,

    /// Neighbouring realms.
    #[serde(default)]
    pub adjacency: Vec<RealmId>,

    /// Resonance in `[0, 1]`.
    #[serde(default)]
    pub resonance: Option<f64>,

    /// Density in `[0, 1]`.
    #[serde(default)]
    pub density: Option<f64>,

    /// Wall-clock milliseconds between realm ticks.
    #[serde(default = "default_realm_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Snapshot the realm stream every N ticks (absent = never).
    #[serde(default)]
    pub snapshot_every: Option<u64>,
}

impl RealmConfig {
    /// The realm's tick interval.
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Snapshot cadence, if enabled.
    pub fn snapshot_cadence(&self) -> Option<NonZeroU64> {
        self.snapshot_every.and_then(NonZeroU64::new)
    }

    /// Build the registration request for this realm.
    pub fn registration_request(&self) -> GameRegistrationRequest {
        let mut request = GameRegistrationRequest::new(
            self.game_id.clone(),
            self.realm_id.clone(),
            &self.developer_name,
            &self.description,
        )
        .with_adjacency(self.adjacency.clone());
        if let Some(realm_type) = &self.realm_type {
            request = request.with_realm_type(realm_type);
        }
        if let Some(resonance) = self.resonance {
            request = request.with_resonance(resonance);
        }
        if let Some(density) = self.density {
            request = request.with_density(density);
        }
        request
    }
}

/// Command harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HarnessConfig {
    /// Maximum depth of a command cascade.
    #[serde(default = "default_max_cascade_depth")]
    pub max_cascade_depth: u32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: default_max_cascade_depth(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./multiverse-data")
}

const fn default_control_tick_interval_ms() -> u64 {
    1000
}

const fn default_realm_tick_interval_ms() -> u64 {
    250
}

const fn default_max_cascade_depth() -> u32 {
    16
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MultiverseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.orchestrator.control_tick_interval_ms, 1000);
        assert_eq!(config.orchestrator.max_ticks(), None);
        assert_eq!(config.harness.max_cascade_depth, 16);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.realms.is_empty());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
store:
  data_dir: "/tmp/multiverse"

orchestrator:
  control_tick_interval_ms: 500
  max_control_ticks: 20
  allowed_actors: ["ops"]

realms:
  - game_id: dungeon
    realm_id: underdark
    developer_name: "Ada"
    description: "Caves"
    realm_type: shadow
    adjacency: [overworld]
    resonance: 0.7
    density: 0.4
    tick_interval_ms: 100
    snapshot_every: 10
  - game_id: skies
    realm_id: overworld
    developer_name: "Lin"

harness:
  max_cascade_depth: 4

logging:
  level: debug
  format: json
"#;
        let config = MultiverseConfig::parse(yaml).unwrap();
        assert_eq!(config.store.data_dir, PathBuf::from("/tmp/multiverse"));
        assert_eq!(config.orchestrator.max_ticks(), Some(20));
        assert_eq!(config.orchestrator.allowed_actors, vec!["ops".to_owned()]);
        assert_eq!(config.realms.len(), 2);
        assert_eq!(config.realms[0].snapshot_cadence().map(NonZeroU64::get), Some(10));
        assert_eq!(config.realms[0].tick_interval(), Duration::from_millis(100));
        assert_eq!(config.realms[1].tick_interval_ms, 250);
        assert_eq!(config.realms[1].snapshot_cadence(), None);
        assert_eq!(config.harness.max_cascade_depth, 4);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn empty_yaml_uses_defaults() {
        let config = MultiverseConfig::parse("{}").unwrap();
        assert_eq!(config, MultiverseConfig::default());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let yaml = "orchestrator:\n  control_tick_interval_ms: 0\n";
        assert!(matches!(
            MultiverseConfig::parse(yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn duplicate_realm_is_rejected() {
        let yaml = r"
realms:
  - game_id: a
    realm_id: shared
    developer_name: x
  - game_id: b
    realm_id: shared
    developer_name: y
";
        let err = MultiverseConfig::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate realm id shared"));
    }

    #[test]
    fn zero_snapshot_cadence_is_rejected() {
        let yaml = r"
realms:
  - game_id: a
    realm_id: r
    developer_name: x
    snapshot_every: 0
";
        assert!(MultiverseConfig::parse(yaml).is_err());
    }

    #[test]
    fn realm_config_builds_registration() {
        let yaml = r"
realms:
  - game_id: a
    realm_id: r
    developer_name: x
    realm_type: Astral
    resonance: 0.9
";
        let config = MultiverseConfig::parse(yaml).unwrap();
        let request = config.realms[0].registration_request();
        assert_eq!(request.game_id.as_str(), "a");
        assert_eq!(request.realm_type.as_deref(), Some("Astral"));
        assert_eq!(request.resonance, Some(0.9));
        assert_eq!(request.density, None);
    }

    #[test]
    fn invalid_yaml_is_error() {
        assert!(matches!(
            MultiverseConfig::parse("realms: [unclosed"),
            Err(ConfigError::Yaml { .. })
        ));
    }
}
