//! Configuration management for pathgauge.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::loss::{LossConfig, MAX_TAU};
use crate::probe::ProbeConfig;
use crate::report::ReportConfig;
use crate::session::SessionConfig;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// ICMP probing.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Sender cycles.
    #[serde(default)]
    pub session: SessionConfig,

    /// Loss model.
    #[serde(default)]
    pub loss: LossConfig,

    /// Bulk-probe engine.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Statistics output.
    #[serde(default)]
    pub report: ReportConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml()?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.probe.ping_gap.is_zero() {
            return Err(Error::InvalidConfig("probe.ping_gap must be non-zero".into()));
        }

        if self.probe.ping_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "probe.ping_timeout must be non-zero".into(),
            ));
        }

        if self.loss.tau > MAX_TAU {
            return Err(Error::InvalidConfig(format!(
                "loss.tau must be at most {MAX_TAU}, got {}",
                self.loss.tau
            )));
        }

        if self.loss.consistency_threshold == 0 {
            return Err(Error::InvalidConfig(
                "loss.consistency_threshold must be at least 1".into(),
            ));
        }

        if self.engine.ctrl_port == self.engine.probe_port {
            return Err(Error::InvalidConfig(format!(
                "engine control and probe ports must differ (both {})",
                self.engine.ctrl_port
            )));
        }

        self.session.validate()
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("net", "pathgauge", "pathgauge").map_or_else(
            || PathBuf::from("pathgauge.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Load `path` if given, else the default location if it exists, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default = Self::default_path();
        if default.exists() {
            Self::load(default)
        } else {
            Ok(Self::default())
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl LoggingConfig {
    /// Effective filter directive for a `-v` count.
    pub fn level_for(&self, verbosity: u8) -> &str {
        match verbosity {
            0 => &self.level,
            1 => "debug",
            _ => "trace",
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
///
/// `RUST_LOG` wins unless `-v` was given.
pub fn init_logging(config: &LoggingConfig, verbosity: u8) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = config.level_for(verbosity);
    let filter = if verbosity > 0 {
        EnvFilter::try_new(level)
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))
    }
    .map_err(|e| Error::Config(format!("Invalid log level {level:?}: {e}")))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_ansi(config.color)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}
