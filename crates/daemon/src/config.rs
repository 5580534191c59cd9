//! Configuration management for the USB2FA agent.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/usb2fa/config.toml`.
//!
//! Configuration is never fatal: a missing file yields defaults, and a
//! reload that cannot be parsed keeps whatever was loaded before.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::devices::LedgerPaths;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("loop_delay_ms must be greater than 0, got {0}")]
    InvalidLoopDelay(u64),

    #[error("throttle_ticks must be greater than 0, got {0}")]
    InvalidThrottleTicks(u32),

    #[error("timeout_secs must be between 1 and 600 seconds, got {0}")]
    InvalidPushTimeout(u64),

    #[error("push_timeout_secs must be between 1 and 600 seconds, got {0}")]
    InvalidPushWait(u64),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("{0} must not be empty")]
    EmptyCommand(&'static str),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the USB2FA agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Trust ledger file locations.
    pub ledger: LedgerConfig,

    /// Paranoia levels for connect and reject outcomes.
    pub paranoia: ParanoiaConfig,

    /// Push-authentication provider access.
    pub push_auth: PushAuthConfig,

    /// Host actions used by the policy engine.
    pub actions: ActionsConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log file, rolled daily. `None` logs to stderr only.
    pub log_file: Option<PathBuf>,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// PID file of the running agent.
    pub pid_file: PathBuf,

    /// Delay between poll cycles in milliseconds.
    pub loop_delay_ms: u64,

    /// Poll cycles an escalated device stays throttled.
    pub throttle_ticks: u32,
}

/// Trust ledger file locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Trusted devices.
    pub devices_file: PathBuf,

    /// Snapshot of the trusted devices taken before every change.
    pub backup_file: PathBuf,

    /// Devices that failed second-factor approval.
    pub rejected_file: PathBuf,
}

/// Paranoia levels: 1 = log, 2 = lock session, 3 = shut down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParanoiaConfig {
    /// Level applied when an unknown or rejected device is attached.
    pub connect: u8,

    /// Level applied when a device fails approval.
    pub reject: u8,
}

/// Push-authentication provider access.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PushAuthConfig {
    /// API hostname, e.g. `api-xxxxxxxx.duosecurity.com`.
    pub host: String,

    /// Integration key.
    pub integration_key: String,

    /// Secret key.
    pub secret_key: String,

    /// Principal whose phone receives the push.
    pub username: String,

    /// Per-request timeout in seconds for ping, check and preauth.
    pub timeout_secs: u64,

    /// Timeout for the push itself, which returns only once the approver
    /// answers. Keep it above the provider's push window.
    pub push_timeout_secs: u64,
}

/// Commands run by the policy engine and notifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActionsConfig {
    /// Command that locks the user session.
    pub lock_command: Vec<String>,

    /// Command that shuts the host down.
    pub shutdown_command: Vec<String>,

    /// Show desktop notifications.
    pub notify: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_file: Some(default_data_dir().join("usb2fac.log")),
            log_level: "info".to_string(),
            pid_file: default_data_dir().join("usb2fac.pid"),
            loop_delay_ms: 200,
            throttle_ticks: 300,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let dir = default_data_dir();
        Self {
            devices_file: dir.join("usb2fac.json"),
            backup_file: dir.join("usb2fac.bak"),
            rejected_file: dir.join("rejected.json"),
        }
    }
}

impl Default for ParanoiaConfig {
    fn default() -> Self {
        Self {
            connect: 1,
            reject: 2,
        }
    }
}

impl Default for PushAuthConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            integration_key: String::new(),
            secret_key: String::new(),
            username: String::new(),
            timeout_secs: 30,
            push_timeout_secs: 75,
        }
    }
}

impl std::fmt::Debug for PushAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushAuthConfig")
            .field("host", &self.host)
            .field("integration_key", &self.integration_key)
            .field("secret_key", &"<redacted>")
            .field("username", &self.username)
            .field("timeout_secs", &self.timeout_secs)
            .field("push_timeout_secs", &self.push_timeout_secs)
            .finish()
    }
}

impl PushAuthConfig {
    /// Returns true when host and both keys are present.
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && !self.integration_key.is_empty() && !self.secret_key.is_empty()
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            lock_command: default_lock_command(),
            shutdown_command: default_shutdown_command(),
            notify: true,
        }
    }
}

/// Values given on the command line. They win over file and environment,
/// and are re-applied after every reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    pub paranoia_connect: Option<u8>,
    pub paranoia_reject: Option<u8>,
    pub devices_file: Option<PathBuf>,
    pub backup_file: Option<PathBuf>,
    pub rejected_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
    pub username: Option<String>,
}

impl CliOverrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(level) = self.paranoia_connect {
            config.paranoia.connect = level;
        }
        if let Some(level) = self.paranoia_reject {
            config.paranoia.reject = level;
        }
        if let Some(path) = &self.devices_file {
            config.ledger.devices_file = path.clone();
        }
        if let Some(path) = &self.backup_file {
            config.ledger.backup_file = path.clone();
        }
        if let Some(path) = &self.rejected_file {
            config.ledger.rejected_file = path.clone();
        }
        if let Some(path) = &self.log_file {
            config.daemon.log_file = Some(path.clone());
        }
        if let Some(path) = &self.pid_file {
            config.daemon.pid_file = path.clone();
        }
        if let Some(username) = &self.username {
            config.push_auth.username = username.clone();
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("usb2fa")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("usb2fa")
}

fn to_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn default_lock_command() -> Vec<String> {
    if cfg!(target_os = "macos") {
        to_args(&[
            "/System/Library/CoreServices/Menu Extras/User.menu/Contents/Resources/CGSession",
            "-suspend",
        ])
    } else {
        to_args(&["loginctl", "lock-session"])
    }
}

fn default_shutdown_command() -> Vec<String> {
    to_args(&["shutdown", "-r", "now"])
}

impl Config {
    /// Ledger file locations as a single value.
    pub fn ledger_paths(&self) -> LedgerPaths {
        LedgerPaths {
            trusted: self.ledger.devices_file.clone(),
            rejected: self.ledger.rejected_file.clone(),
            backup: self.ledger.backup_file.clone(),
        }
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - USB2FA_PUSH_HOST: Override the provider hostname
    /// - USB2FA_USERNAME: Override the principal to notify
    /// - USB2FA_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("USB2FA_PUSH_HOST") {
            if !host.is_empty() {
                tracing::info!("Overriding push_auth.host from environment: {}", host);
                self.push_auth.host = host;
            }
        }

        if let Ok(username) = std::env::var("USB2FA_USERNAME") {
            if !username.is_empty() {
                tracing::info!("Overriding push_auth.username from environment: {}", username);
                self.push_auth.username = username;
            }
        }

        if let Ok(level) = std::env::var("USB2FA_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Paranoia levels are deliberately not checked: unrecognized levels
    /// degrade to log-only in the policy engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.loop_delay_ms == 0 {
            return Err(ConfigError::InvalidLoopDelay(self.daemon.loop_delay_ms));
        }

        if self.daemon.throttle_ticks == 0 {
            return Err(ConfigError::InvalidThrottleTicks(self.daemon.throttle_ticks));
        }

        if self.push_auth.timeout_secs == 0 || self.push_auth.timeout_secs > 600 {
            return Err(ConfigError::InvalidPushTimeout(self.push_auth.timeout_secs));
        }

        if self.push_auth.push_timeout_secs == 0 || self.push_auth.push_timeout_secs > 600 {
            return Err(ConfigError::InvalidPushWait(self.push_auth.push_timeout_secs));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if self.actions.lock_command.is_empty() {
            return Err(ConfigError::EmptyCommand("lock_command"));
        }

        if self.actions.shutdown_command.is_empty() {
            return Err(ConfigError::EmptyCommand("shutdown_command"));
        }

        Ok(())
    }

    /// Resets every invalid field to its default, returning what was fixed.
    ///
    /// Loops until [`Config::validate`] passes, so the result is always
    /// usable by the agent.
    pub fn repair(&mut self) -> Vec<ConfigError> {
        let mut fixed = Vec::new();
        while let Err(err) = self.validate() {
            match &err {
                ConfigError::InvalidLoopDelay(_) => {
                    self.daemon.loop_delay_ms = DaemonConfig::default().loop_delay_ms
                }
                ConfigError::InvalidThrottleTicks(_) => {
                    self.daemon.throttle_ticks = DaemonConfig::default().throttle_ticks
                }
                ConfigError::InvalidPushTimeout(_) => {
                    self.push_auth.timeout_secs = PushAuthConfig::default().timeout_secs
                }
                ConfigError::InvalidPushWait(_) => {
                    self.push_auth.push_timeout_secs = PushAuthConfig::default().push_timeout_secs
                }
                ConfigError::InvalidLogLevel(_) => {
                    self.daemon.log_level = DaemonConfig::default().log_level
                }
                ConfigError::EmptyCommand("lock_command") => {
                    self.actions.lock_command = default_lock_command()
                }
                ConfigError::EmptyCommand(_) => {
                    self.actions.shutdown_command = default_shutdown_command()
                }
            }
            tracing::warn!("Invalid configuration value, using default: {}", err);
            fixed.push(err);
        }
        fixed
    }

    /// Load configuration from a file.
    ///
    /// Never fails. A missing file yields the defaults. Anything else the
    /// file gets wrong is reported in the returned list and replaced by its
    /// default, field by field, so a single bad value does not discard the
    /// rest of the file. The caller logs the problems once logging is up.
    pub fn load<P: AsRef<Path>>(path: P) -> (Self, Vec<String>) {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return (Self::default(), Vec::new());
        }

        match Self::default().merge_file(path) {
            Ok(loaded) => loaded,
            Err(problem) => (Self::default(), vec![format!("{}; using defaults", problem)]),
        }
    }

    /// Re-read `path`, falling back to `self` for whatever cannot be parsed.
    ///
    /// An unreadable file or a TOML syntax error keeps the current
    /// configuration whole. Otherwise every field is taken from the file;
    /// a field that fails to deserialize keeps its current value and a
    /// field absent from the file takes its default. The result is always
    /// repaired, so it passes [`Config::validate`].
    pub fn reload<P: AsRef<Path>>(&self, path: P) -> Self {
        let path = path.as_ref();

        let (mut config, problems) = match self.merge_file(path) {
            Ok(loaded) => loaded,
            Err(problem) => {
                tracing::warn!("{}; keeping current configuration", problem);
                return self.clone();
            }
        };
        for problem in &problems {
            tracing::warn!("{}", problem);
        }
        config.repair();

        tracing::info!("Configuration reloaded from {}", path.display());
        config
    }

    /// Reads `path` over `self`. `Err` means nothing in the file was usable.
    fn merge_file(&self, path: &Path) -> std::result::Result<(Self, Vec<String>), String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        if let Ok(config) = Self::from_toml(&contents) {
            return Ok((config, Vec::new()));
        }

        let table: toml::Table = toml::from_str(&contents).map_err(|e| {
            format!("Invalid TOML in {}: {}", path.display(), format_toml_error(&e))
        })?;

        let mut problems = Vec::new();
        let config = Config {
            daemon: section(&table, "daemon", &self.daemon, &mut problems),
            ledger: section(&table, "ledger", &self.ledger, &mut problems),
            paranoia: section(&table, "paranoia", &self.paranoia, &mut problems),
            push_auth: section(&table, "push_auth", &self.push_auth, &mut problems),
            actions: section(&table, "actions", &self.actions, &mut problems),
        };
        Ok((config, problems))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Deserializes one section of a parsed file.
///
/// Fields absent from the file take their defaults. When the section as a
/// whole does not deserialize, each field is tried on its own and a field
/// that still fails keeps its value from `current`.
fn section<T>(table: &toml::Table, name: &str, current: &T, problems: &mut Vec<String>) -> T
where
    T: Serialize + DeserializeOwned + Default + Clone,
{
    let Some(value) = table.get(name) else {
        return T::default();
    };

    if let Ok(parsed) = value.clone().try_into::<T>() {
        return parsed;
    }

    let Some(fields) = value.as_table() else {
        problems.push(format!("[{}] is not a table; keeping current values", name));
        return current.clone();
    };

    // Absent fields start from the default, present ones from `current`
    // until they prove parseable.
    let mut merged = match toml::Value::try_from(T::default()) {
        Ok(toml::Value::Table(defaults)) => defaults,
        _ => return current.clone(),
    };
    let kept = match toml::Value::try_from(current) {
        Ok(toml::Value::Table(kept)) => kept,
        _ => return current.clone(),
    };

    for (key, value) in fields {
        let mut candidate = merged.clone();
        candidate.insert(key.clone(), value.clone());
        match toml::Value::Table(candidate).try_into::<T>() {
            Ok(_) => {
                merged.insert(key.clone(), value.clone());
            }
            Err(e) => {
                problems.push(format!(
                    "Invalid {}.{}: {}; keeping current value",
                    name,
                    key,
                    format_toml_error(&e)
                ));
                match kept.get(key) {
                    Some(previous) => {
                        merged.insert(key.clone(), previous.clone());
                    }
                    None => {
                        merged.remove(key);
                    }
                }
            }
        }
    }

    toml::Value::Table(merged)
        .try_into::<T>()
        .unwrap_or_else(|_| current.clone())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
