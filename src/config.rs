/*!
 * Configuration types for Ferry
 *
 * Configuration is layered: TOML file (or built-in defaults), then
 * `FERRY_*` environment overrides, then validation.
 */

use crate::link::AccessPolicy;
use crate::store::{DEFAULT_PART_SIZE, MAX_PART_SIZE, MIN_PART_SIZE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Longest expiry S3 accepts for a pre-signed URL (7 days)
pub const MAX_PRESIGN_TTL_SECS: u64 = 604_800;

/// Configuration loading or validation failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value {value:?} for {var}")]
    Env { var: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FerryConfig {
    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub links: LinkSettings,

    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Object store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Bucket name
    #[serde(default)]
    pub bucket: String,

    /// Region (e.g. "us-east-1"); falls back to the AWS provider chain
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible services (Wasabi, MinIO, R2)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Path-style addressing (required by MinIO and LocalStack)
    #[serde(default)]
    pub force_path_style: bool,

    /// Access key id (uses the AWS credential chain if omitted)
    #[serde(default)]
    pub access_key: Option<String>,

    /// Secret access key
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Multipart part size in bytes
    #[serde(default = "default_part_size")]
    pub part_size: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_store_timeout")]
    pub timeout_seconds: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: None,
            endpoint: None,
            force_path_style: false,
            access_key: None,
            secret_key: None,
            part_size: default_part_size(),
            timeout_seconds: default_store_timeout(),
        }
    }
}

impl StoreSettings {
    /// Check if using explicit credentials
    pub fn has_explicit_credentials(&self) -> bool {
        self.access_key.is_some() && self.secret_key.is_some()
    }
}

/// Relay pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Largest declared file size accepted, in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Directory for temporary artifacts
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Minimum seconds between progress renders
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,

    /// Seconds without an upload progress signal before giving up
    #[serde(default = "default_upload_idle_timeout")]
    pub upload_idle_timeout_secs: u64,

    /// Read size for download streams
    #[serde(default = "default_download_chunk_size")]
    pub download_chunk_size: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            scratch_dir: default_scratch_dir(),
            progress_interval_secs: default_progress_interval(),
            upload_idle_timeout_secs: default_upload_idle_timeout(),
            download_chunk_size: default_download_chunk_size(),
        }
    }
}

impl RelaySettings {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn upload_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_idle_timeout_secs)
    }
}

/// How the primary URL of a relayed file is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkPolicyKind {
    /// Pre-signed, time-limited URL
    #[default]
    Presigned,

    /// Static URL on a public-read bucket
    Public,
}

/// Link generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    #[serde(default)]
    pub policy: LinkPolicyKind,

    /// Pre-signed URL lifetime in seconds
    #[serde(default = "default_link_ttl")]
    pub ttl_secs: u64,

    /// Base URL of the public bucket (required for the public policy)
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Base URL of the embeddable web player
    #[serde(default = "default_player_base_url")]
    pub player_base_url: String,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            policy: LinkPolicyKind::default(),
            ttl_secs: default_link_ttl(),
            public_base_url: None,
            player_base_url: default_player_base_url(),
        }
    }
}

impl LinkSettings {
    /// Resolve the configured access policy
    pub fn access_policy(&self) -> Result<AccessPolicy, ConfigError> {
        match self.policy {
            LinkPolicyKind::Presigned => Ok(AccessPolicy::Presigned {
                ttl: Duration::from_secs(self.ttl_secs),
            }),
            LinkPolicyKind::Public => {
                let base = self.public_base_url.as_deref().ok_or_else(|| {
                    ConfigError::Invalid(
                        "links.public_base_url is required for the public policy".to_string(),
                    )
                })?;
                let base_url = url::Url::parse(base).map_err(|e| {
                    ConfigError::Invalid(format!("links.public_base_url {:?}: {}", base, e))
                })?;
                Ok(AccessPolicy::Public { base_url })
            }
        }
    }
}

/// Relay registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Maximum age of a registry entry in seconds
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Seconds between background sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            retention_secs: default_retention(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl RegistrySettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// HTTP query surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Accept local paths (not just http(s) URLs) in relay requests
    #[serde(default)]
    pub allow_local_sources: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allow_local_sources: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Shorthand for level = debug
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
    /// Convert to tracing::Level
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

fn default_part_size() -> usize {
    DEFAULT_PART_SIZE
}

fn default_store_timeout() -> u64 {
    300
}

fn default_max_file_size() -> u64 {
    4 * 1024 * 1024 * 1024 // 4 GiB
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("ferry")
}

fn default_progress_interval() -> u64 {
    3
}

fn default_upload_idle_timeout() -> u64 {
    300
}

fn default_download_chunk_size() -> usize {
    256 * 1024
}

fn default_link_ttl() -> u64 {
    MAX_PRESIGN_TTL_SECS
}

fn default_player_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_retention() -> u64 {
    604_800
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

impl FerryConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File (or defaults), then process environment, then validation
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FERRY_*` overrides read through `lookup`
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FERRY_BUCKET") {
            self.store.bucket = v;
        }
        if let Some(v) = lookup("FERRY_REGION") {
            self.store.region = Some(v);
        }
        if let Some(v) = lookup("FERRY_ENDPOINT") {
            self.store.endpoint = Some(v);
        }
        if let Some(v) = lookup("FERRY_ACCESS_KEY") {
            self.store.access_key = Some(v);
        }
        if let Some(v) = lookup("FERRY_SECRET_KEY") {
            self.store.secret_key = Some(v);
        }
        if let Some(v) = lookup("FERRY_MAX_FILE_SIZE") {
            self.relay.max_file_size = parse_env("FERRY_MAX_FILE_SIZE", v)?;
        }
        if let Some(v) = lookup("FERRY_SCRATCH_DIR") {
            self.relay.scratch_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FERRY_RETENTION_SECS") {
            self.registry.retention_secs = parse_env("FERRY_RETENTION_SECS", v)?;
        }
        if let Some(v) = lookup("FERRY_PLAYER_BASE_URL") {
            self.links.player_base_url = v;
        }
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.bucket.is_empty() {
            return Err(ConfigError::Invalid(
                "store.bucket cannot be empty".to_string(),
            ));
        }

        if !is_valid_bucket_name(&self.store.bucket) {
            return Err(ConfigError::Invalid(format!(
                "Invalid bucket name: {}. Bucket names must be 3-63 characters, \
                 lowercase letters, numbers, hyphens, and periods only",
                self.store.bucket
            )));
        }

        if self.store.access_key.is_some() != self.store.secret_key.is_some() {
            return Err(ConfigError::Invalid(
                "Both access_key and secret_key must be provided together".to_string(),
            ));
        }

        if !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&self.store.part_size) {
            return Err(ConfigError::Invalid(format!(
                "store.part_size {} must be between {} and {}",
                self.store.part_size, MIN_PART_SIZE, MAX_PART_SIZE
            )));
        }

        if self.relay.max_file_size == 0 {
            return Err(ConfigError::Invalid(
                "relay.max_file_size must be greater than zero".to_string(),
            ));
        }

        if self.relay.upload_idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "relay.upload_idle_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.relay.download_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "relay.download_chunk_size must be greater than zero".to_string(),
            ));
        }

        if self.links.policy == LinkPolicyKind::Presigned
            && !(1..=MAX_PRESIGN_TTL_SECS).contains(&self.links.ttl_secs)
        {
            return Err(ConfigError::Invalid(format!(
                "links.ttl_secs must be between 1 and {}",
                MAX_PRESIGN_TTL_SECS
            )));
        }

        url::Url::parse(&self.links.player_base_url).map_err(|e| {
            ConfigError::Invalid(format!(
                "links.player_base_url {:?}: {}",
                self.links.player_base_url, e
            ))
        })?;

        self.links.access_policy()?;

        if self.registry.retention_secs == 0 {
            return Err(ConfigError::Invalid(
                "registry.retention_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value,
    })
}

/// Validate S3 bucket name according to AWS rules
fn is_valid_bucket_name(name: &str) -> bool {
    if !(3..=63).contains(&name.len()) {
        return false;
    }

    let edge_ok = |c: Option<char>| matches!(c, Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return false;
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return false;
    }

    if name.contains("..") {
        return false;
    }

    // Cannot be formatted as IP address
    if name.split('.').count() == 4 && name.split('.').all(|s| s.parse::<u8>().is_ok()) {
        return false;
    }

    !name.starts_with("xn--")
}
