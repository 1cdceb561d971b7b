//! Configuration management for FloodGuard.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::detector::{Thresholds, DEFAULT_MIN_RATE_INTERVAL};
use crate::error::FloodguardError;
use crate::validation::parse_duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/floodguard/config.yaml";

/// Poll interval used when `monitor.interval` cannot be parsed
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Firewall backend (auto, nftables, iptables, dummy)
    pub backend: Backend,

    /// Detection settings
    pub monitor: MonitorConfig,

    /// Enforcement settings
    pub ban: BanConfig,

    /// Addresses and CIDRs that are never blocked
    #[serde(alias = "whitelist")]
    pub allowlist: Vec<String>,

    /// Addresses and CIDRs blocked unconditionally at startup
    #[serde(alias = "blacklist")]
    pub denylist: Vec<String>,

    /// Logging settings
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Auto,
            monitor: MonitorConfig::default(),
            ban: BanConfig::default(),
            allowlist: default_allowlist(),
            denylist: Vec::new(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Bad allowlist/denylist entries and an unparsable poll interval are not
    /// fatal; they are reported when the monitor starts.
    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.log.level.to_ascii_lowercase().as_str()) {
            return Err(FloodguardError::Config(format!(
                "Invalid log level '{}'. Valid values: {}",
                self.log.level,
                VALID_LOG_LEVELS.join(", ")
            ))
            .into());
        }

        if let Some(file) = &self.log.file {
            if file.as_os_str().is_empty() {
                return Err(
                    FloodguardError::Config("log.file must not be empty".to_string()).into(),
                );
            }
        }

        if let Err(e) = parse_duration(&self.monitor.min_rate_interval) {
            return Err(FloodguardError::Config(format!(
                "Invalid monitor.min_rate_interval '{}': {}",
                self.monitor.min_rate_interval, e
            ))
            .into());
        }

        Ok(())
    }

    /// Save configuration to YAML file atomically
    ///
    /// Uses tempfile + rename so a crash never leaves a truncated file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let path = path.as_ref();
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        let parent_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", parent_dir))?;

        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .context("Failed to create temporary file for config")?;

        temp_file.write_all(content.as_bytes())?;
        temp_file.as_file().sync_all()?;

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {:?}", path))?;

        Ok(())
    }

    /// Default configuration with `extra` addresses appended to the allowlist.
    ///
    /// Duplicates of existing entries are dropped.
    pub fn with_extra_allowlist<S: AsRef<str>>(extra: &[S]) -> Self {
        let mut config = Self::default();
        for entry in extra {
            let entry = entry.as_ref().trim();
            if !entry.is_empty() && !config.allowlist.iter().any(|e| e == entry) {
                config.allowlist.push(entry.to_string());
            }
        }
        config
    }

    /// Poll interval, falling back to the default when unparsable or zero.
    pub fn poll_interval(&self) -> Duration {
        match parse_duration(&self.monitor.interval) {
            Ok(d) if !d.is_zero() => d,
            Ok(_) => {
                warn!(
                    "monitor.interval must be positive, using default {:?}",
                    DEFAULT_POLL_INTERVAL
                );
                DEFAULT_POLL_INTERVAL
            }
            Err(e) => {
                warn!(
                    "Invalid monitor.interval '{}' ({}), using default {:?}",
                    self.monitor.interval, e, DEFAULT_POLL_INTERVAL
                );
                DEFAULT_POLL_INTERVAL
            }
        }
    }

    /// Detection thresholds derived from the monitor section.
    pub fn thresholds(&self) -> Thresholds {
        let min_rate_interval =
            parse_duration(&self.monitor.min_rate_interval).unwrap_or(DEFAULT_MIN_RATE_INTERVAL);

        Thresholds {
            max_connections: self.monitor.max_connections,
            max_rate: self.monitor.max_qps,
            min_rate_interval,
        }
    }

    /// Ban duration; `None` when bans are permanent.
    pub fn ban_duration(&self) -> Option<Duration> {
        match self.ban.duration {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Auto-detect backend (checks nftables first, then iptables)
    #[default]
    Auto,
    /// Use nftables
    Nftables,
    /// Use iptables/ip6tables
    Iptables,
    /// Log only, never touch the firewall
    Dummy,
}

/// Detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Poll interval (e.g., "10s", "1m")
    pub interval: String,

    /// Max simultaneous connections per address (0 disables)
    pub max_connections: u32,

    /// Max new connections per second per address (0 disables)
    pub max_qps: u32,

    /// Rate check is skipped when cycles are closer together than this
    pub min_rate_interval: String,

    /// Only count connections to these local ports (empty = all)
    pub ports: Vec<u16>,

    /// Accepted for compatibility, not used
    pub check_http: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: "10s".to_string(),
            max_connections: 100,
            max_qps: 50,
            min_rate_interval: "1s".to_string(),
            ports: Vec::new(),
            check_http: false,
        }
    }
}

/// Enforcement settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BanConfig {
    /// Ban duration in seconds (0 = permanent)
    pub duration: u64,

    /// auto (block) or monitor (log only)
    pub mode: BanMode,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            duration: 3600,
            mode: BanMode::Auto,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BanMode {
    /// Block offending addresses
    #[default]
    Auto,
    /// Detect and log only
    Monitor,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,

    /// Append log output to this file instead of stdout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_allowlist() -> Vec<String> {
    vec![
        "127.0.0.1".to_string(),
        "::1".to_string(),
        "0.0.0.0".to_string(),
        "::".to_string(),
    ]
}
