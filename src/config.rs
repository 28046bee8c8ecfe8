//! Layered configuration
//!
//! Sources are applied in order, later ones overriding earlier ones. Every
//! field has a default, so an empty source list yields a usable
//! [`SupervisorConfig`].

use std::fmt::Debug;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{LevelFilter, debug, warn};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, SupervisorError};
#[cfg(feature = "monitor")]
use crate::monitor::MonitorConfig;
use crate::process::FallbackPlan;
use crate::recovery::RecoveryConfig;
#[cfg(feature = "service")]
use crate::retry::RetryConfig;
#[cfg(feature = "service")]
use crate::service::ServiceManager;
use crate::watchdog::WatchdogConfig;

/// Prefix for environment overrides, e.g. `GATEWARDEN__RECOVERY__COOLDOWN_SECS`
pub const ENV_PREFIX: &str = "GATEWARDEN";

/// Source of configuration
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// TOML file; skipped with a warning when missing
    File(PathBuf),
    /// Environment variables with a prefix
    Environment(String),
    /// TOML string
    Toml(String),
    /// Built-in defaults only
    Defaults,
}

/// Load configuration from the given sources
pub fn load_config<T>(sources: Vec<ConfigSource>) -> Result<T>
where
    T: DeserializeOwned + Debug,
{
    let mut builder = config::Config::builder();

    for source in sources {
        match source {
            ConfigSource::File(path) => {
                if !path.exists() {
                    warn!("Configuration file not found: {}", path.display());
                    continue;
                }
                debug!("Loading configuration from {}", path.display());
                builder = builder.add_source(
                    config::File::from(path.as_path()).format(config::FileFormat::Toml),
                );
            }
            ConfigSource::Environment(prefix) => {
                debug!("Loading configuration from environment with prefix {}", prefix);
                builder = builder.add_source(
                    config::Environment::with_prefix(&prefix)
                        .prefix_separator("__")
                        .separator("__")
                        .try_parsing(true),
                );
            }
            ConfigSource::Toml(toml) => {
                builder = builder
                    .add_source(config::File::from_str(&toml, config::FileFormat::Toml));
            }
            ConfigSource::Defaults => debug!("Using default configuration values"),
        }
    }

    let config = builder
        .build()
        .map_err(|e| SupervisorError::Config(format!("Failed to build configuration: {}", e)))?;

    let result = config.try_deserialize().map_err(|e| {
        SupervisorError::Config(format!("Failed to deserialize configuration: {}", e))
    })?;
    debug!("Configuration loaded: {:?}", result);

    Ok(result)
}

/// Collects sources for [`load_config`]
pub struct ConfigBuilder<T> {
    sources: Vec<ConfigSource>,
    _marker: PhantomData<T>,
}

impl<T> Default for ConfigBuilder<T> {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned + Debug> ConfigBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.sources
            .push(ConfigSource::File(path.as_ref().to_path_buf()));
        self
    }

    pub fn add_env(mut self, prefix: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Environment(prefix.into()));
        self
    }

    pub fn add_toml(mut self, toml: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Toml(toml.into()));
        self
    }

    pub fn use_defaults(mut self) -> Self {
        self.sources.push(ConfigSource::Defaults);
        self
    }

    pub fn build(self) -> Result<T> {
        load_config::<T>(self.sources)
    }
}

/// Logging level
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// `[recovery]`: in-process EBADF escalation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    pub error_threshold: u32,
    pub sliding_window_secs: u64,
    pub cooldown_secs: u64,
    /// Delay before the restart requested by a recovery
    pub restart_delay_ms: u64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            error_threshold: 3,
            sliding_window_secs: 60,
            cooldown_secs: 120,
            restart_delay_ms: 1000,
        }
    }
}

impl RecoverySection {
    pub fn tracker_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            error_threshold: self.error_threshold,
            sliding_window: Duration::from_secs(self.sliding_window_secs),
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// `[watchdog]`: spawn failure rate
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogSection {
    pub check_interval_secs: u64,
    pub failure_window_secs: u64,
    pub failure_threshold: usize,
    pub restart_cooldown_secs: u64,
    pub restart_delay_ms: u64,
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            failure_window_secs: 120,
            failure_threshold: 5,
            restart_cooldown_secs: 300,
            restart_delay_ms: 2000,
        }
    }
}

impl WatchdogSection {
    pub fn watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            check_interval: Duration::from_secs(self.check_interval_secs),
            failure_window: Duration::from_secs(self.failure_window_secs),
            failure_threshold: self.failure_threshold,
            restart_cooldown: Duration::from_secs(self.restart_cooldown_secs),
            restart_delay: Duration::from_millis(self.restart_delay_ms),
        }
    }
}

/// `[restart]`: how the service manager is asked to restart the service
#[cfg(feature = "service")]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RestartSection {
    pub manager: ServiceManager,
    pub retry: RetryConfig,
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Service-manager label of the supervised service
    pub service_label: String,
    pub log_level: LogLevel,
    pub recovery: RecoverySection,
    pub watchdog: WatchdogSection,
    pub spawn: FallbackPlan,
    #[cfg(feature = "service")]
    pub restart: RestartSection,
    #[cfg(feature = "monitor")]
    pub monitor: MonitorConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            service_label: "ai.gateway".to_string(),
            log_level: LogLevel::default(),
            recovery: RecoverySection::default(),
            watchdog: WatchdogSection::default(),
            spawn: FallbackPlan::default(),
            #[cfg(feature = "service")]
            restart: RestartSection::default(),
            #[cfg(feature = "monitor")]
            monitor: MonitorConfig::default(),
        }
    }
}

impl SupervisorConfig {
    /// Defaults, then `path` if given and present, then `GATEWARDEN__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigBuilder::new().use_defaults();
        if let Some(path) = path {
            builder = builder.add_file(path);
        }
        builder.add_env(ENV_PREFIX).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ErrorCode;
    use std::io::Write;

    #[test]
    fn test_empty_sources_give_defaults() {
        let config: SupervisorConfig = ConfigBuilder::new().use_defaults().build().unwrap();

        assert_eq!(config.service_label, "ai.gateway");
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.recovery.error_threshold, 3);
        assert_eq!(
            config.recovery.tracker_config().sliding_window,
            Duration::from_secs(60)
        );
        assert_eq!(
            config.watchdog.watchdog_config().restart_cooldown,
            Duration::from_secs(300)
        );
        assert_eq!(config.spawn, FallbackPlan::default());
    }

    #[test]
    fn test_toml_overrides_sections() {
        let config: SupervisorConfig = ConfigBuilder::new()
            .add_toml(
                r#"
                service_label = "com.example.gateway"
                log_level = "debug"

                [recovery]
                error_threshold = 5
                cooldown_secs = 30

                [watchdog]
                check_interval_secs = 10

                [spawn]
                retryable_codes = ["ebadf", "EMFILE"]

                [[spawn.fallbacks]]
                label = "quiet"
                options = { stdio = ["ignore", "ignore", "ignore"] }
                "#,
            )
            .build()
            .unwrap();

        assert_eq!(config.service_label, "com.example.gateway");
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.recovery.error_threshold, 5);
        assert_eq!(config.recovery.sliding_window_secs, 60);
        assert_eq!(config.recovery.cooldown_secs, 30);
        assert_eq!(config.watchdog.check_interval_secs, 10);
        assert_eq!(config.watchdog.failure_threshold, 5);

        assert_eq!(config.spawn.fallbacks.len(), 1);
        assert_eq!(config.spawn.fallbacks[0].label, "quiet");
        assert!(config.spawn.retryable_codes.contains(&ErrorCode::ebadf()));
        assert!(config.spawn.retryable_codes.contains(&ErrorCode::new("EMFILE")));
    }

    #[cfg(feature = "service")]
    #[test]
    fn test_restart_section() {
        let config: SupervisorConfig = ConfigBuilder::new()
            .add_toml(
                r#"
                [restart]
                manager = "launchd"

                [restart.retry]
                max_attempts = 5
                jitter = false
                "#,
            )
            .build()
            .unwrap();

        assert_eq!(config.restart.manager, ServiceManager::Launchd);
        assert_eq!(config.restart.retry.max_attempts, 5);
        assert!(!config.restart.retry.jitter);
        assert_eq!(config.restart.retry.initial_delay_ms, 500);
    }

    #[test]
    fn test_file_source_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatewarden.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[recovery]\nrestart_delay_ms = 250").unwrap();

        let config: SupervisorConfig = ConfigBuilder::new()
            .add_file(dir.path().join("absent.toml"))
            .add_file(&path)
            .build()
            .unwrap();
        assert_eq!(
            config.recovery.restart_delay(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_later_sources_win() {
        let config: SupervisorConfig = ConfigBuilder::new()
            .add_toml("[recovery]\nerror_threshold = 4")
            .add_toml("[recovery]\nerror_threshold = 6")
            .build()
            .unwrap();
        assert_eq!(config.recovery.error_threshold, 6);
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let result: Result<SupervisorConfig> = ConfigBuilder::new()
            .add_toml("[recovery]\nerror_threshold = \"many\"")
            .build();
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SupervisorError>(),
            Some(SupervisorError::Config(_))
        ));
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(LevelFilter::from(LogLevel::Warn), LevelFilter::Warn);
        assert_eq!(LevelFilter::from(LogLevel::default()), LevelFilter::Info);
    }
}
