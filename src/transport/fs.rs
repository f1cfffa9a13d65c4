//! Local filesystem source

use super::{DownloadError, Transport};
use crate::media::{IncomingFile, SourceLocator, SourceMedia};
use crate::progress::ProgressSink;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Copies files from a local path in fixed-size chunks
#[derive(Debug, Clone)]
pub struct FsTransport {
    chunk_size: usize,
}

impl FsTransport {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    fn source_path(locator: &SourceLocator) -> Result<&PathBuf, DownloadError> {
        match locator {
            SourceLocator::Path(path) => Ok(path),
            other => Err(DownloadError::Unsupported(other.to_string())),
        }
    }
}

impl Default for FsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

#[async_trait]
impl Transport for FsTransport {
    async fn describe(
        &self,
        locator: &SourceLocator,
        message_id: &str,
        name: Option<String>,
    ) -> Result<IncomingFile, DownloadError> {
        let path = Self::source_path(locator)?;
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DownloadError::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(DownloadError::io(path, e)),
        };
        if !metadata.is_file() {
            return Err(DownloadError::Unsupported(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let name = name.or_else(|| locator.file_name_hint());
        let media = SourceMedia::classify(name, metadata.len());
        Ok(IncomingFile::new(message_id, media, locator.clone()))
    }

    async fn download(
        &self,
        file: &IncomingFile,
        dest: &Path,
        limit: u64,
        progress: &mut dyn ProgressSink,
    ) -> Result<u64, DownloadError> {
        let path = Self::source_path(&file.locator)?;
        let total = file.declared_size();

        let mut reader = File::open(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        let mut writer = File::create(dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;

        let mut buffer = vec![0u8; self.chunk_size];
        let mut written = 0u64;
        loop {
            let n = reader
                .read(&mut buffer)
                .await
                .map_err(|e| DownloadError::io(path, e))?;
            if n == 0 {
                break;
            }
            written += n as u64;
            DownloadError::check_limit(written, limit)?;
            writer
                .write_all(&buffer[..n])
                .await
                .map_err(|e| DownloadError::io(dest, e))?;
            progress.on_progress(written, total).await;
        }

        writer.flush().await.map_err(|e| DownloadError::io(dest, e))?;
        Ok(written)
    }
}
