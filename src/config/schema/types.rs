use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - resolved at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub extension: ExtensionConfig,

    #[serde(default)]
    pub host_ga: HostGaConfig,

    #[serde(default)]
    pub reliability: ReliabilityConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config.toml"),
            extension: ExtensionConfig::default(),
            host_ga: HostGaConfig::default(),
            reliability: ReliabilityConfig::default(),
            dispatcher: DispatcherConfig::default(),
            paths: PathsConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extension.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "extension.name must not be empty".into(),
            ));
        }
        if self.dispatcher.max_concurrent_tasks == 0 {
            return Err(ConfigError::Validation(
                "dispatcher.max_concurrent_tasks must be at least 1".into(),
            ));
        }
        if self.reliability.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "reliability.max_attempts must be at least 1".into(),
            ));
        }
        if self.log_level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::Validation(format!(
                "log_level '{}' is not one of trace, debug, info, warn, error",
                self.log_level
            )));
        }
        Ok(())
    }

    /// Configured log level, falling back to INFO when unparseable.
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionConfig {
    /// Handler identity; goal states are matched against it case-insensitively.
    #[serde(default = "default_extension_name")]
    pub name: String,
    #[serde(default = "default_extension_version")]
    pub version: String,
}

fn default_extension_name() -> String {
    "Microsoft.CPlat.Core.RunCommandHandlerLinux".into()
}

fn default_extension_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            name: default_extension_name(),
            version: default_extension_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostGaConfig {
    #[serde(default = "default_host_ga_url")]
    pub base_url: String,
    #[serde(default = "default_vm_settings_path")]
    pub vm_settings_path: String,
    #[serde(default = "default_status_path")]
    pub status_path: String,
}

fn default_host_ga_url() -> String {
    "http://168.63.129.16:32526".into()
}

fn default_vm_settings_path() -> String {
    "/immediateVMSettings".into()
}

fn default_status_path() -> String {
    "/immediateStatus".into()
}

impl Default for HostGaConfig {
    fn default() -> Self {
        Self {
            base_url: default_host_ga_url(),
            vm_settings_path: default_vm_settings_path(),
            status_path: default_status_path(),
        }
    }
}

impl HostGaConfig {
    pub fn vm_settings_url(&self) -> String {
        join_url(&self.base_url, &self.vm_settings_path)
    }

    pub fn status_url(&self) -> String {
        join_url(&self.base_url, &self.status_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
    /// Bounds dial plus TLS handshake.
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Bounds waiting for response headers and body reads.
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_restart_backoff_secs")]
    pub restart_initial_backoff_secs: u64,
    #[serde(default = "default_restart_backoff_max_secs")]
    pub restart_max_backoff_secs: u64,
}

fn default_max_attempts() -> u32 {
    7
}

fn default_base_backoff_secs() -> u64 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_restart_backoff_secs() -> u64 {
    2
}

fn default_restart_backoff_max_secs() -> u64 {
    60
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff_secs(),
            connect_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
            restart_initial_backoff_secs: default_restart_backoff_secs(),
            restart_max_backoff_secs: default_restart_backoff_max_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_max_concurrent_tasks() -> usize {
    5
}

fn default_poll_interval_secs() -> u64 {
    120
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Persisted sequence numbers.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// `<seq>.settings` files for the synchronous path.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    #[serde(default = "default_status_dir")]
    pub status_dir: PathBuf,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,
}

const HANDLER_ROOT: &str = "/var/lib/waagent/run-command-handler";

fn default_state_dir() -> PathBuf {
    PathBuf::from(HANDLER_ROOT).join("state")
}

fn default_config_dir() -> PathBuf {
    PathBuf::from(HANDLER_ROOT).join("config")
}

fn default_status_dir() -> PathBuf {
    PathBuf::from(HANDLER_ROOT).join("status")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from(HANDLER_ROOT).join("download")
}

fn default_cert_dir() -> PathBuf {
    PathBuf::from("/var/lib/waagent")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            config_dir: default_config_dir(),
            status_dir: default_status_dir(),
            download_dir: default_download_dir(),
            cert_dir: default_cert_dir(),
        }
    }
}
