//! Configuration system for Sandwatch
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Sensor settings
    pub sensor: SensorSettings,

    /// Event bus connection
    pub bus: BusSettings,

    /// Event stream ingestion
    pub ingest: IngestSettings,

    /// TLS key recovery
    pub tls: TlsSettings,

    /// Per-context resource cache
    pub tracker: TrackerSettings,
}

/// Sensor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Event bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Events to subscribe to
    pub subscriptions: Vec<String>,

    /// First reconnect delay in milliseconds
    pub reconnect_initial_delay_ms: u64,

    /// Cap for the reconnect delay in milliseconds
    pub reconnect_max_delay_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            subscriptions: vec![
                "massurltask".to_string(),
                "longtermtask".to_string(),
                "dumptls".to_string(),
            ],
            reconnect_initial_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
        }
    }
}

impl BusSettings {
    pub fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

/// Event stream ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Delay between checks for the event file in milliseconds
    pub poll_interval_ms: u64,

    /// Number of checks before the task is abandoned
    pub max_attempts: u32,

    /// Size the event file must reach before decoding starts
    pub min_file_size: u64,

    /// Skip frames with an unknown kind tag instead of failing the stream
    pub skip_unknown_kinds: bool,

    /// Event log location relative to the analysis directory
    pub event_log: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            max_attempts: 600,
            min_file_size: 4,
            skip_unknown_kinds: false,
            event_log: "logs/onemon.pb".to_string(),
        }
    }
}

impl IngestSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// TLS key recovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Capture location relative to the analysis directory
    pub capture: String,

    /// Secrets log location; `{pid}` is replaced by the key-holding process id
    pub secrets_log_template: String,

    /// TCP port carrying TLS
    pub port: u16,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            capture: "dump.pcap".to_string(),
            secrets_log_template: "logs/{pid}.bson".to_string(),
            port: 443,
        }
    }
}

impl TlsSettings {
    pub fn secrets_log(&self, pid: u64) -> String {
        self.secrets_log_template.replace("{pid}", &pid.to_string())
    }
}

/// Resource tracker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Interval between eviction sweeps in seconds
    pub sweep_interval_secs: u64,

    /// Idle time after which a context is evicted in seconds
    pub idle_ttl_secs: u64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            idle_ttl_secs: 15 * 60,
        }
    }
}

impl TrackerSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. SANDWATCH_CONFIG environment variable
    /// 3. ~/.config/sandwatch/config.toml
    /// 4. /etc/sandwatch/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<SensorConfig> {
        let config_path = self.find_config_file();

        let mut config = if let Some(path) = config_path {
            info!("Loading configuration from: {}", path.display());
            self.load_from_file(&path)?
        } else {
            debug!("No config file found, using defaults");
            SensorConfig::default()
        };

        self.apply_env_overrides(&mut config);
        self.validate(&config)?;

        Ok(config)
    }

    /// Find the config file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("SANDWATCH_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("SANDWATCH_CONFIG path does not exist: {}", env_path);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("sandwatch").join("config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/sandwatch/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Load configuration from a TOML file
    fn load_from_file(&self, path: &Path) -> ConfigResult<SensorConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: SensorConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut SensorConfig) {
        if let Ok(val) = std::env::var("SANDWATCH_LOG_LEVEL") {
            config.sensor.log_level = val;
        }

        if let Ok(val) = std::env::var("SANDWATCH_RECONNECT_MAX_DELAY_MS") {
            if let Ok(ms) = val.parse() {
                config.bus.reconnect_max_delay_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("SANDWATCH_INGEST_MAX_ATTEMPTS") {
            if let Ok(attempts) = val.parse() {
                config.ingest.max_attempts = attempts;
            }
        }
        if let Ok(val) = std::env::var("SANDWATCH_SKIP_UNKNOWN_KINDS") {
            config.ingest.skip_unknown_kinds =
                val.parse().unwrap_or(config.ingest.skip_unknown_kinds);
        }

        if let Ok(val) = std::env::var("SANDWATCH_TRACKER_TTL_SECS") {
            if let Ok(secs) = val.parse() {
                config.tracker.idle_ttl_secs = secs;
            }
        }
    }

    /// Validate configuration
    fn validate(&self, config: &SensorConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.sensor.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.sensor.log_level, valid_levels
            )));
        }

        if config.bus.subscriptions.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one bus subscription is required".to_string(),
            ));
        }

        if config.bus.reconnect_initial_delay_ms == 0
            || config.bus.reconnect_max_delay_ms < config.bus.reconnect_initial_delay_ms
        {
            return Err(ConfigError::ValidationError(format!(
                "Invalid reconnect delays: initial {}ms, max {}ms",
                config.bus.reconnect_initial_delay_ms, config.bus.reconnect_max_delay_ms
            )));
        }

        if config.ingest.poll_interval_ms == 0 || config.ingest.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "Ingest poll interval and attempt count must be non-zero".to_string(),
            ));
        }

        if config.tracker.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "Tracker sweep interval cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper module for platform-specific directories
mod dirs {
    use std::path::PathBuf;

    /// Get the user's config directory
    pub fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }

        #[cfg(not(target_os = "windows"))]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SensorConfig::default();
        assert_eq!(config.sensor.log_level, "info");
        assert_eq!(
            config.bus.subscriptions,
            vec!["massurltask", "longtermtask", "dumptls"]
        );
        assert_eq!(config.ingest.event_log, "logs/onemon.pb");
        assert!(!config.ingest.skip_unknown_kinds);
        assert_eq!(config.tracker.idle_ttl(), Duration::from_secs(900));
        assert_eq!(config.tracker.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.tls.port, 443);
    }

    #[test]
    fn test_secrets_log_template() {
        let tls = TlsSettings::default();
        assert_eq!(tls.secrets_log(612), "logs/612.bson");
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [sensor]
            log_level = "debug"

            [ingest]
            max_attempts = 10
            skip_unknown_kinds = true

            [tracker]
            idle_ttl_secs = 60
        "#;
        let config: SensorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sensor.log_level, "debug");
        assert_eq!(config.ingest.max_attempts, 10);
        assert!(config.ingest.skip_unknown_kinds);
        assert_eq!(config.ingest.poll_interval_ms, 100);
        assert_eq!(config.tracker.idle_ttl_secs, 60);
        assert_eq!(config.bus.subscriptions.len(), 3);
    }

    #[test]
    fn test_load_from_cli_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bus]\nsubscriptions = [\"dumptls\"]").unwrap();

        let config = ConfigLoader::new()
            .with_cli_path(Some(file.path().to_path_buf()))
            .load()
            .unwrap();
        assert_eq!(config.bus.subscriptions, vec!["dumptls"]);
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let config = SensorConfig {
            sensor: SensorSettings {
                log_level: "loud".to_string(),
            },
            ..Default::default()
        };
        assert!(ConfigLoader::new().validate(&config).is_err());
    }

    #[test]
    fn test_validation_empty_subscriptions() {
        let config = SensorConfig {
            bus: BusSettings {
                subscriptions: Vec::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(ConfigLoader::new().validate(&config).is_err());
    }

    #[test]
    fn test_validation_zero_sweep_interval() {
        let config = SensorConfig {
            tracker: TrackerSettings {
                sweep_interval_secs: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(ConfigLoader::new().validate(&config).is_err());
    }

    #[test]
    fn test_serialize_config() {
        let config = SensorConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[ingest]"));
        assert!(toml_str.contains("idle_ttl_secs"));
    }
}
