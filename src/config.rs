// Configuration File Support
//
// TOML configuration with environment variable overrides, loaded from the
// XDG config directory: ~/.config/sshfleet/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Path to the TOML fleet file describing hosts and accounts
    pub fleet_file: String,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// SSH transport configuration
    pub ssh: SshConfig,

    /// Connection-limit enforcement configuration
    pub enforcer: EnforcerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// SSH transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshConfig {
    /// Connect/handshake timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
        }
    }
}

impl SshConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Connection-limit enforcement configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnforcerConfig {
    /// Whether the periodic enforcement schedule runs
    pub enabled: bool,

    /// Minutes between enforcement cycles
    pub interval_minutes: u64,

    /// Milliseconds to pause between hosts within a cycle
    pub host_pause_ms: u64,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 5,
            host_pause_ms: 1000,
        }
    }
}

impl EnforcerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn host_pause(&self) -> Duration {
        Duration::from_millis(self.host_pause_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fleet_file: "fleet.toml".to_string(),
            logging: LoggingConfig::default(),
            ssh: SshConfig::default(),
            enforcer: EnforcerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory.
    /// A missing file yields the default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path, applying environment
    /// variable overrides and validating the result.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default().apply_env_overrides());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        let config = config.apply_env_overrides();
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// `~/.config/sshfleet/config.toml` on Linux/Mac
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "sshfleet", "sshfleet") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("sshfleet")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values:
    /// - SSHFLEET_LOG_LEVEL
    /// - SSHFLEET_LOG_FORMAT
    /// - SSHFLEET_FLEET_FILE
    /// - SSHFLEET_CONNECT_TIMEOUT_SECS
    /// - SSHFLEET_ENFORCER_ENABLED
    /// - SSHFLEET_ENFORCER_INTERVAL_MINUTES
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("SSHFLEET_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("SSHFLEET_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(path) = std::env::var("SSHFLEET_FLEET_FILE") {
            self.fleet_file = path;
        }

        if let Ok(timeout) = std::env::var("SSHFLEET_CONNECT_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                if timeout > 0 {
                    self.ssh.connect_timeout_secs = timeout;
                }
            }
        }

        if let Ok(enabled) = std::env::var("SSHFLEET_ENFORCER_ENABLED") {
            self.enforcer.enabled = enabled.parse().unwrap_or(self.enforcer.enabled);
        }
        if let Ok(interval) = std::env::var("SSHFLEET_ENFORCER_INTERVAL_MINUTES") {
            if let Ok(interval) = interval.parse::<u64>() {
                if interval > 0 {
                    self.enforcer.interval_minutes = interval;
                }
            }
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.ssh.connect_timeout_secs == 0 {
            anyhow::bail!("SSH connect timeout must be > 0");
        }

        if self.enforcer.interval_minutes == 0 {
            anyhow::bail!("Enforcer interval must be at least 1 minute");
        }

        if self.fleet_file.is_empty() {
            anyhow::bail!("Fleet file path must not be empty");
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
