/*!
 * Configuration types for Pulsar
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{PulsarError, Result};

/// Node key entropy in bytes
pub const DEFAULT_NODE_KEY_BYTES: usize = 24;

/// Upper bound for every `*_secs` duration setting (ten years)
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Seconds as a `chrono::Duration`, or `None` above [`MAX_DURATION_SECS`]
pub fn checked_duration(secs: u64) -> Option<chrono::Duration> {
    if secs > MAX_DURATION_SECS {
        return None;
    }
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

/// Seconds as a `chrono::Duration`, clamped to [`MAX_DURATION_SECS`]
pub fn saturating_duration(secs: u64) -> chrono::Duration {
    checked_duration(secs.min(MAX_DURATION_SECS)).unwrap_or_else(chrono::Duration::zero)
}

/// Main configuration for the control plane
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulsarConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub enrollment: EnrollmentConfig,

    #[serde(default)]
    pub campaigns: CampaignConfig,

    #[serde(default)]
    pub host_refresh: HostRefreshConfig,

    /// Defaults pushed into every agent config document
    #[serde(default)]
    pub agent_options: AgentOptionsConfig,

    #[serde(default)]
    pub log_sinks: LogSinksConfig,
}

/// Diagnostic logging
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for level = debug)
    #[serde(default)]
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Enrollment and node key issuance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentConfig {
    /// Random bytes per node key
    #[serde(default = "default_node_key_bytes")]
    pub node_key_bytes: usize,

    /// Key regenerations allowed on collision before giving up
    #[serde(default = "default_max_key_attempts")]
    pub max_key_attempts: u32,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            node_key_bytes: default_node_key_bytes(),
            max_key_attempts: default_max_key_attempts(),
        }
    }
}

/// Distributed query campaigns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Running campaigns older than this are expired
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,

    /// Accelerate window applied when a campaign does not specify one
    #[serde(default = "default_accelerate")]
    pub default_accelerate_secs: u64,

    /// How often the sentinel sweeps for expiry and archival
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Closed campaigns are archived after this long
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            max_lifetime_secs: default_max_lifetime(),
            default_accelerate_secs: default_accelerate(),
            sweep_interval_secs: default_sweep_interval(),
            retention_secs: default_retention(),
        }
    }
}

/// Host detail and label refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRefreshConfig {
    /// Re-run detail queries after this long
    #[serde(default = "default_refresh_interval")]
    pub detail_interval_secs: u64,

    /// Re-run label queries after this long
    #[serde(default = "default_refresh_interval")]
    pub label_interval_secs: u64,

    /// Accelerate hosts whose platform is still unknown
    #[serde(default = "default_new_host_accelerate")]
    pub new_host_accelerate_secs: u64,
}

impl Default for HostRefreshConfig {
    fn default() -> Self {
        Self {
            detail_interval_secs: default_refresh_interval(),
            label_interval_secs: default_refresh_interval(),
            new_host_accelerate_secs: default_new_host_accelerate(),
        }
    }
}

/// Agent option defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOptionsConfig {
    /// How often agents re-fetch their config
    #[serde(default = "default_config_refresh")]
    pub config_refresh_secs: u64,

    /// How often agents poll for distributed queries
    #[serde(default = "default_distributed_interval")]
    pub distributed_interval_secs: u64,

    /// Agent-side logger plugin
    #[serde(default = "default_logger_plugin")]
    pub logger_plugin: String,

    /// How often agents flush buffered logs
    #[serde(default = "default_logger_period")]
    pub logger_tls_period_secs: u64,

    /// Additional options passed through verbatim
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for AgentOptionsConfig {
    fn default() -> Self {
        Self {
            config_refresh_secs: default_config_refresh(),
            distributed_interval_secs: default_distributed_interval(),
            logger_plugin: default_logger_plugin(),
            logger_tls_period_secs: default_logger_period(),
            extra: BTreeMap::new(),
        }
    }
}

/// Downstream sinks for agent status and result logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSinksConfig {
    #[serde(default = "default_status_sink")]
    pub status: SinkKind,

    #[serde(default = "default_result_sink")]
    pub result: SinkKind,

    /// Per-batch forwarding timeout
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_secs: u64,
}

impl Default for LogSinksConfig {
    fn default() -> Self {
        Self {
            status: default_status_sink(),
            result: default_result_sink(),
            forward_timeout_secs: default_forward_timeout(),
        }
    }
}

/// Log sink selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkKind {
    /// Append newline-delimited records to a file
    Filesystem { path: PathBuf },
    /// Write newline-delimited records to stdout
    Stdout,
    /// Accept and drop
    Discard,
}

fn default_node_key_bytes() -> usize {
    DEFAULT_NODE_KEY_BYTES
}

fn default_max_key_attempts() -> u32 {
    5
}

fn default_max_lifetime() -> u64 {
    24 * 60 * 60
}

fn default_accelerate() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_retention() -> u64 {
    7 * 24 * 60 * 60
}

fn default_refresh_interval() -> u64 {
    60 * 60
}

fn default_new_host_accelerate() -> u64 {
    10
}

fn default_config_refresh() -> u64 {
    60
}

fn default_distributed_interval() -> u64 {
    10
}

fn default_logger_plugin() -> String {
    "tls".to_string()
}

fn default_logger_period() -> u64 {
    10
}

fn default_status_sink() -> SinkKind {
    SinkKind::Filesystem {
        path: PathBuf::from("/var/log/pulsar/status.log"),
    }
}

fn default_result_sink() -> SinkKind {
    SinkKind::Filesystem {
        path: PathBuf::from("/var/log/pulsar/result.log"),
    }
}

fn default_forward_timeout() -> u64 {
    10
}

impl PulsarConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: PulsarConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values that would make the control plane misbehave
    pub fn validate(&self) -> Result<()> {
        if self.enrollment.node_key_bytes < 16 {
            return Err(PulsarError::Config(
                "enrollment.node_key_bytes must be at least 16".to_string(),
            ));
        }
        if self.enrollment.max_key_attempts == 0 {
            return Err(PulsarError::Config(
                "enrollment.max_key_attempts must be at least 1".to_string(),
            ));
        }
        if self.campaigns.max_lifetime_secs == 0 {
            return Err(PulsarError::Config(
                "campaigns.max_lifetime_secs must be greater than 0".to_string(),
            ));
        }
        if self.campaigns.sweep_interval_secs == 0 {
            return Err(PulsarError::Config(
                "campaigns.sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.host_refresh.detail_interval_secs == 0 || self.host_refresh.label_interval_secs == 0
        {
            return Err(PulsarError::Config(
                "host_refresh intervals must be greater than 0".to_string(),
            ));
        }
        if self.log_sinks.forward_timeout_secs == 0 {
            return Err(PulsarError::Config(
                "log_sinks.forward_timeout_secs must be greater than 0".to_string(),
            ));
        }
        let durations = [
            ("campaigns.max_lifetime_secs", self.campaigns.max_lifetime_secs),
            ("campaigns.default_accelerate_secs", self.campaigns.default_accelerate_secs),
            ("campaigns.sweep_interval_secs", self.campaigns.sweep_interval_secs),
            ("campaigns.retention_secs", self.campaigns.retention_secs),
            ("host_refresh.detail_interval_secs", self.host_refresh.detail_interval_secs),
            ("host_refresh.label_interval_secs", self.host_refresh.label_interval_secs),
            ("host_refresh.new_host_accelerate_secs", self.host_refresh.new_host_accelerate_secs),
            ("log_sinks.forward_timeout_secs", self.log_sinks.forward_timeout_secs),
        ];
        for (name, secs) in durations {
            if secs > MAX_DURATION_SECS {
                return Err(PulsarError::Config(format!(
                    "{} must be at most {} seconds",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        let sinks = [
            ("status", &self.log_sinks.status),
            ("result", &self.log_sinks.result),
        ];
        for (name, sink) in sinks {
            if let SinkKind::Filesystem { path } = sink {
                if path.as_os_str().is_empty() {
                    return Err(PulsarError::Config(format!(
                        "log_sinks.{} path must not be empty",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}
