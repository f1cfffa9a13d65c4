//! Object store failures

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// S3 error codes worth another attempt
const RETRYABLE_CODES: &[&str] = &[
    "RequestTimeout",
    "ServiceUnavailable",
    "InternalError",
    "SlowDown",
    "RequestTimeTooSkewed",
];

/// Codes that mean the credentials themselves were refused
const AUTH_CODES: &[&str] = &[
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
];

/// Failure reported by an [`ObjectStore`](super::ObjectStore)
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Request never produced a response
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// Error response not covered by a more specific variant
    #[error("store returned {code}: {message}")]
    Service { code: String, message: String },

    #[error("object {bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },

    #[error("bucket {0} does not exist or is not reachable")]
    BucketNotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("credentials rejected: {0}")]
    Authentication(String),

    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("multipart upload failed: {0}")]
    MultipartUpload(String),

    #[error("cannot sign URL: {0}")]
    Presign(String),

    #[error("local I/O failed: {0}")]
    Io(String),

    /// SDK failure outside the request/response cycle (construction, serialization)
    #[error("SDK error: {0}")]
    Sdk(String),
}

impl StoreError {
    /// Whether repeating the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Network(_) | StoreError::Timeout(_) | StoreError::Io(_) => true,
            StoreError::Service { code, .. } => RETRYABLE_CODES.contains(&code.as_str()),
            _ => false,
        }
    }

    /// 404-class failure, whether for a key or a bucket
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound { .. } | StoreError::BucketNotFound(_) => true,
            StoreError::Service { code, .. } => {
                matches!(code.as_str(), "NotFound" | "NoSuchKey" | "NoSuchBucket")
            }
            _ => false,
        }
    }

    /// Classify an error response by S3 code, falling back to the HTTP status
    /// (HEAD responses carry no body, hence no code).
    pub fn from_response(code: Option<&str>, message: Option<&str>, status: Option<u16>) -> Self {
        let message = message.unwrap_or_default().to_string();
        let code = match (code, status) {
            (Some(code), _) => code,
            (None, Some(404)) => "NotFound",
            (None, Some(403)) => "AccessDenied",
            (None, Some(503)) => "ServiceUnavailable",
            (None, Some(500)) => "InternalError",
            (None, _) => "Unknown",
        };

        if code == "AccessDenied" {
            StoreError::AccessDenied(message)
        } else if AUTH_CODES.contains(&code) {
            StoreError::Authentication(format!("{}: {}", code, message))
        } else {
            StoreError::Service {
                code: code.to_string(),
                message,
            }
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl<E> From<SdkError<E>> for StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    fn from(error: SdkError<E>) -> Self {
        match &error {
            SdkError::TimeoutError(_) => StoreError::Timeout(DisplayErrorContext(&error).to_string()),
            SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                StoreError::Network(DisplayErrorContext(&error).to_string())
            }
            SdkError::ServiceError(_) => {
                let status = error.raw_response().map(|r| r.status().as_u16());
                StoreError::from_response(error.code(), error.message(), status)
            }
            _ => StoreError::Sdk(DisplayErrorContext(&error).to_string()),
        }
    }
}
