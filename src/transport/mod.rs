//! Messaging transport seam
//!
//! A [`Transport`] knows how to describe an inbound file and pull its bytes
//! into a local artifact. [`SourceTransport`] dispatches between the local
//! filesystem and HTTP(S) sources.

mod fs;
mod http;

pub use fs::FsTransport;
pub use http::HttpTransport;

use crate::media::{IncomingFile, SourceLocator};
use crate::progress::ProgressSink;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Transport-side failure while describing or fetching a file
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("unsupported source: {0}")]
    Unsupported(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The source produced more than `limit` bytes
    #[error("source exceeds {limit} bytes (at least {received} received)")]
    TooLarge { limit: u64, received: u64 },
}

impl DownloadError {
    /// Error out once `received` passes `limit`
    pub(crate) fn check_limit(received: u64, limit: u64) -> Result<(), Self> {
        if received > limit {
            Err(DownloadError::TooLarge { limit, received })
        } else {
            Ok(())
        }
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        DownloadError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Source of inbound files
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve name, media variant and declared size without fetching bytes.
    /// `name` overrides whatever the source itself suggests.
    async fn describe(
        &self,
        locator: &SourceLocator,
        message_id: &str,
        name: Option<String>,
    ) -> Result<IncomingFile, DownloadError>;

    /// Write the file's bytes to `dest`, reporting cumulative progress
    /// against the declared size. Returns the number of bytes written.
    ///
    /// Fails with [`DownloadError::TooLarge`] as soon as more than `limit`
    /// bytes arrive, whatever size was declared.
    async fn download(
        &self,
        file: &IncomingFile,
        dest: &Path,
        limit: u64,
        progress: &mut dyn ProgressSink,
    ) -> Result<u64, DownloadError>;
}

/// Routes local paths to [`FsTransport`] and URLs to [`HttpTransport`]
#[derive(Debug, Clone, Default)]
pub struct SourceTransport {
    fs: FsTransport,
    http: HttpTransport,
}

impl SourceTransport {
    pub fn new(fs: FsTransport, http: HttpTransport) -> Self {
        Self { fs, http }
    }

    fn route(&self, locator: &SourceLocator) -> &dyn Transport {
        match locator {
            SourceLocator::Path(_) => &self.fs,
            SourceLocator::Url(_) => &self.http,
        }
    }
}

#[async_trait]
impl Transport for SourceTransport {
    async fn describe(
        &self,
        locator: &SourceLocator,
        message_id: &str,
        name: Option<String>,
    ) -> Result<IncomingFile, DownloadError> {
        self.route(locator).describe(locator, message_id, name).await
    }

    async fn download(
        &self,
        file: &IncomingFile,
        dest: &Path,
        limit: u64,
        progress: &mut dyn ProgressSink,
    ) -> Result<u64, DownloadError> {
        self.route(&file.locator)
            .download(file, dest, limit, progress)
            .await
    }
}
