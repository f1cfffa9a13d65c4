/*!
 * Error types for Ferry
 */

use crate::config::ConfigError;
use crate::link::LinkError;
use crate::stage::UploadFailure;
use crate::store::StoreError;
use crate::transport::DownloadError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

/// Failure of a relay task, or of the relay entry point as a whole
#[derive(Debug, Error)]
pub enum RelayError {
    /// Store unreachable or misconfigured; no tasks are accepted
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Declared size exceeds the configured maximum
    #[error("file size {declared} bytes exceeds the limit of {max} bytes")]
    SizeLimit { declared: u64, max: u64 },

    #[error("download failed: {0}")]
    Download(#[source] DownloadError),

    #[error("upload failed: {0}")]
    Upload(#[source] UploadFailure),

    /// No progress signal from the upload worker within `idle`
    #[error("upload timed out after {}s without progress", idle.as_secs())]
    UploadTimeout { idle: Duration },

    /// The object was stored but no link could be produced for it
    #[error("link generation failed for {key}: {source}")]
    LinkGeneration {
        key: String,
        #[source]
        source: LinkError,
    },

    /// Relink target is absent from the bucket
    #[error("no object stored under {key}")]
    NotStored { key: String },

    #[error("cannot look up {key}: {source}")]
    Lookup {
        key: String,
        #[source]
        source: StoreError,
    },
}

impl RelayError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            EXIT_FATAL
        } else {
            EXIT_PARTIAL
        }
    }

    /// Fatal errors disable the relay entry point altogether
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::Configuration(_))
    }

    /// Whether retrying the same request later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::UploadTimeout { .. } => true,
            RelayError::Upload(UploadFailure::Store(e)) => e.is_retryable(),
            RelayError::Download(DownloadError::Http(e)) => e.is_timeout() || e.is_connect(),
            RelayError::LinkGeneration {
                source: LinkError::Sign { source, .. },
                ..
            } => source.is_retryable(),
            RelayError::Lookup { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::Configuration(_) => ErrorCategory::Configuration,
            RelayError::SizeLimit { .. } => ErrorCategory::Validation,
            RelayError::Download(_) => ErrorCategory::Transport,
            RelayError::Upload(_)
            | RelayError::UploadTimeout { .. }
            | RelayError::NotStored { .. }
            | RelayError::Lookup { .. } => ErrorCategory::Storage,
            RelayError::LinkGeneration { .. } => ErrorCategory::Link,
        }
    }

    /// Text reported back to whoever asked for the relay
    pub fn user_message(&self) -> String {
        match self {
            RelayError::Configuration(_) => {
                "File relay is unavailable: storage is not configured correctly.".to_string()
            }
            RelayError::SizeLimit { declared, max } => format!(
                "File is too large ({}). The maximum is {}.",
                crate::format::format_bytes(*declared),
                crate::format::format_bytes(*max)
            ),
            RelayError::Download(e) => format!("Could not download the file: {}", e),
            RelayError::Upload(e) => format!("Upload to storage failed: {}", e),
            RelayError::UploadTimeout { idle } => format!(
                "Upload stalled for {}; please try again.",
                crate::format::format_duration(idle.as_secs())
            ),
            RelayError::LinkGeneration { .. } => {
                "The file was stored, but a download link could not be created.".to_string()
            }
            RelayError::NotStored { key } => format!("Nothing is stored under {}.", key),
            RelayError::Lookup { .. } => {
                "Storage could not be reached; please try again.".to_string()
            }
        }
    }
}

impl From<DownloadError> for RelayError {
    fn from(e: DownloadError) -> Self {
        match e {
            DownloadError::TooLarge { limit, received } => RelayError::SizeLimit {
                declared: received,
                max: limit,
            },
            other => RelayError::Download(other),
        }
    }
}

impl From<UploadFailure> for RelayError {
    fn from(e: UploadFailure) -> Self {
        match e {
            UploadFailure::Timeout { idle } => RelayError::UploadTimeout { idle },
            other => RelayError::Upload(other),
        }
    }
}

impl From<ConfigError> for RelayError {
    fn from(e: ConfigError) -> Self {
        RelayError::Configuration(e.to_string())
    }
}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        RelayError::Upload(UploadFailure::Store(e))
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    Transport,
    Storage,
    Link,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Link => write!(f, "link"),
        }
    }
}
