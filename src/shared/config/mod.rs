//! Engine configuration
//!
//! Configuration is layered: built-in defaults, then an optional TOML file named
//! by `COLLAB_CONFIG`, then environment variables. Every layer goes through
//! [`CollabConfig::validate`].
//!
//! ```toml
//! server_port = 4000
//!
//! [presence]
//! idle_threshold_secs = 300
//! offline_threshold_secs = 900
//!
//! [relay]
//! bus = "postgres"
//! channel_prefix = "collab"
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Presence state machine thresholds and sweep intervals
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceConfig {
    pub idle_threshold: Duration,
    pub offline_threshold: Duration,
    /// How long a session may stay offline before it is removed
    pub cleanup_threshold: Duration,
    pub heartbeat_check_interval: Duration,
    pub cleanup_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(5 * MINUTE),
            offline_threshold: Duration::from_secs(15 * MINUTE),
            cleanup_threshold: Duration::from_secs(HOUR),
            heartbeat_check_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(5 * MINUTE),
        }
    }
}

/// Stale connection sweep
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub stale_timeout: Duration,
    pub stale_sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_secs(30 * MINUTE),
            stale_sweep_interval: Duration::from_secs(5 * MINUTE),
        }
    }
}

/// Detector windows and cache bounds
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub conflict_window: Duration,
    pub scan_interval: Duration,
    /// History considered when looking for location experts
    pub expertise_window: Duration,
    pub expert_min_activities: usize,
    /// Per-project cap for each of the conflict and opportunity caches
    pub cache_capacity: usize,
    pub cache_retention: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            conflict_window: Duration::from_secs(5 * MINUTE),
            scan_interval: Duration::from_secs(MINUTE),
            expertise_window: Duration::from_secs(30 * DAY),
            expert_min_activities: 5,
            cache_capacity: 100,
            cache_retention: Duration::from_secs(DAY),
        }
    }
}

/// Which shared bus the relay publishes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// In-process bus, for single-instance deployments and tests
    Memory,
    /// Postgres LISTEN/NOTIFY
    Postgres,
}

impl std::str::FromStr for BusBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "pg" => Ok(Self::Postgres),
            other => Err(ConfigError::InvalidValue {
                key: "COLLAB_BUS",
                value: other.to_string(),
            }),
        }
    }
}

/// Cross-instance relay settings
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub bus: BusBackend,
    pub channel_prefix: String,
    pub instance_id: String,
    /// Pause before re-subscribing after the bus stream ends
    pub resubscribe_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bus: BusBackend::Memory,
            channel_prefix: "collab".to_string(),
            instance_id: uuid::Uuid::new_v4().to_string(),
            resubscribe_delay: Duration::from_secs(1),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CollabConfig {
    pub server_port: u16,
    pub database_url: Option<String>,
    /// Token required by the admin routes; admin routes are refused when unset
    pub admin_token: Option<String>,
    pub presence: PresenceConfig,
    pub registry: RegistryConfig,
    pub detector: DetectorConfig,
    pub relay: RelayConfig,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            server_port: 3000,
            database_url: None,
            admin_token: None,
            presence: PresenceConfig::default(),
            registry: RegistryConfig::default(),
            detector: DetectorConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    server_port: Option<u16>,
    database_url: Option<String>,
    admin_token: Option<String>,
    #[serde(default)]
    presence: PresenceFile,
    #[serde(default)]
    registry: RegistryFile,
    #[serde(default)]
    detector: DetectorFile,
    #[serde(default)]
    relay: RelayFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PresenceFile {
    idle_threshold_secs: Option<u64>,
    offline_threshold_secs: Option<u64>,
    cleanup_threshold_secs: Option<u64>,
    heartbeat_check_interval_secs: Option<u64>,
    cleanup_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryFile {
    stale_timeout_secs: Option<u64>,
    stale_sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DetectorFile {
    conflict_window_secs: Option<u64>,
    scan_interval_secs: Option<u64>,
    expertise_window_secs: Option<u64>,
    expert_min_activities: Option<usize>,
    cache_capacity: Option<usize>,
    cache_retention_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RelayFile {
    bus: Option<BusBackend>,
    channel_prefix: Option<String>,
    instance_id: Option<String>,
    resubscribe_delay_secs: Option<u64>,
}

fn set_secs(target: &mut Duration, secs: Option<u64>) {
    if let Some(secs) = secs {
        *target = Duration::from_secs(secs);
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl CollabConfig {
    /// Create a new CollabConfigBuilder
    pub fn builder() -> CollabConfigBuilder {
        CollabConfigBuilder::default()
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_file(toml::from_str(source)?);
        config.validate()?;
        Ok(config)
    }

    /// Load defaults, then `COLLAB_CONFIG` (if set), then environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("COLLAB_CONFIG") {
            config.apply_file(read_file(Path::new(&path))?);
        }
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        set(&mut self.server_port, file.server_port);
        if file.database_url.is_some() {
            self.database_url = file.database_url;
        }
        if file.admin_token.is_some() {
            self.admin_token = file.admin_token;
        }

        let p = &mut self.presence;
        set_secs(&mut p.idle_threshold, file.presence.idle_threshold_secs);
        set_secs(&mut p.offline_threshold, file.presence.offline_threshold_secs);
        set_secs(&mut p.cleanup_threshold, file.presence.cleanup_threshold_secs);
        set_secs(&mut p.heartbeat_check_interval, file.presence.heartbeat_check_interval_secs);
        set_secs(&mut p.cleanup_interval, file.presence.cleanup_interval_secs);

        set_secs(&mut self.registry.stale_timeout, file.registry.stale_timeout_secs);
        set_secs(&mut self.registry.stale_sweep_interval, file.registry.stale_sweep_interval_secs);

        let d = &mut self.detector;
        set_secs(&mut d.conflict_window, file.detector.conflict_window_secs);
        set_secs(&mut d.scan_interval, file.detector.scan_interval_secs);
        set_secs(&mut d.expertise_window, file.detector.expertise_window_secs);
        set(&mut d.expert_min_activities, file.detector.expert_min_activities);
        set(&mut d.cache_capacity, file.detector.cache_capacity);
        set_secs(&mut d.cache_retention, file.detector.cache_retention_secs);

        set(&mut self.relay.bus, file.relay.bus);
        set(&mut self.relay.channel_prefix, file.relay.channel_prefix);
        set(&mut self.relay.instance_id, file.relay.instance_id);
        set_secs(&mut self.relay.resubscribe_delay, file.relay.resubscribe_delay_secs);
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        set(&mut self.server_port, env_parse("SERVER_PORT")?);
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Ok(token) = std::env::var("COLLAB_ADMIN_TOKEN") {
            self.admin_token = Some(token);
        }
        set(&mut self.relay.bus, env_parse("COLLAB_BUS")?);
        set(&mut self.relay.instance_id, env_parse("COLLAB_INSTANCE_ID")?);
        set(&mut self.relay.channel_prefix, env_parse("COLLAB_CHANNEL_PREFIX")?);
        set_secs(&mut self.presence.idle_threshold, env_parse("COLLAB_IDLE_THRESHOLD_SECS")?);
        set_secs(&mut self.presence.offline_threshold, env_parse("COLLAB_OFFLINE_THRESHOLD_SECS")?);
        set_secs(&mut self.detector.conflict_window, env_parse("COLLAB_CONFLICT_WINDOW_SECS")?);
        set_secs(&mut self.detector.scan_interval, env_parse("COLLAB_SCAN_INTERVAL_SECS")?);
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.presence;
        if p.idle_threshold >= p.offline_threshold {
            return Err(ConfigError::Invalid(
                "presence idle threshold must be shorter than the offline threshold".to_string(),
            ));
        }
        if p.offline_threshold > p.cleanup_threshold {
            return Err(ConfigError::Invalid(
                "presence cleanup threshold cannot be shorter than the offline threshold"
                    .to_string(),
            ));
        }
        let intervals = [
            ("presence.heartbeat_check_interval", p.heartbeat_check_interval),
            ("presence.cleanup_interval", p.cleanup_interval),
            ("registry.stale_sweep_interval", self.registry.stale_sweep_interval),
            ("detector.scan_interval", self.detector.scan_interval),
            ("detector.conflict_window", self.detector.conflict_window),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        if self.detector.cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "detector.cache_capacity must be non-zero".to_string(),
            ));
        }
        if self.relay.instance_id.trim().is_empty() {
            return Err(ConfigError::MissingValue("relay.instance_id"));
        }
        if self.relay.bus == BusBackend::Postgres && self.database_url.is_none() {
            return Err(ConfigError::MissingValue("DATABASE_URL"));
        }
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let source = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&source)?)
}

fn env_parse<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        Err(_) => Ok(None),
    }
}

/// Builder for CollabConfig
#[derive(Debug, Default)]
pub struct CollabConfigBuilder {
    config: CollabConfig,
}

impl CollabConfigBuilder {
    pub fn server_port(mut self, port: u16) -> Self {
        self.config.server_port = port;
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    pub fn admin_token(mut self, token: impl Into<String>) -> Self {
        self.config.admin_token = Some(token.into());
        self
    }

    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.config.relay.instance_id = id.into();
        self
    }

    pub fn bus(mut self, bus: BusBackend) -> Self {
        self.config.relay.bus = bus;
        self
    }

    pub fn presence(mut self, presence: PresenceConfig) -> Self {
        self.config.presence = presence;
        self
    }

    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.config.registry = registry;
        self
    }

    pub fn detector(mut self, detector: DetectorConfig) -> Self {
        self.config.detector = detector;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<CollabConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}
