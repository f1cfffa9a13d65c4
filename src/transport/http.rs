//! HTTP(S) source

use super::{DownloadError, Transport};
use crate::media::{IncomingFile, SourceLocator, SourceMedia};
use crate::progress::ProgressSink;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Streams a URL's body to disk
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn source_url(locator: &SourceLocator) -> Result<&url::Url, DownloadError> {
        match locator {
            SourceLocator::Url(url) => Ok(url),
            other => Err(DownloadError::Unsupported(other.to_string())),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn describe(
        &self,
        locator: &SourceLocator,
        message_id: &str,
        name: Option<String>,
    ) -> Result<IncomingFile, DownloadError> {
        let url = Self::source_url(locator)?;
        let response = self.client.head(url.clone()).send().await?;

        let size = if response.status().is_success() {
            response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0)
        } else if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DownloadError::NotFound(url.to_string()));
        } else {
            // some servers refuse HEAD; the size is then only known after download
            tracing::warn!(url = %url, status = %response.status(), "HEAD failed, size unknown");
            0
        };

        let name = name.or_else(|| locator.file_name_hint());
        let media = SourceMedia::classify(name, size);
        Ok(IncomingFile::new(message_id, media, locator.clone()))
    }

    async fn download(
        &self,
        file: &IncomingFile,
        dest: &Path,
        limit: u64,
        progress: &mut dyn ProgressSink,
    ) -> Result<u64, DownloadError> {
        let url = Self::source_url(&file.locator)?;
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(length) = response.content_length() {
            DownloadError::check_limit(length, limit)?;
        }

        let total = match file.declared_size() {
            0 => response.content_length().unwrap_or(0),
            declared => declared,
        };

        let mut writer = File::create(dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            DownloadError::check_limit(written, limit)?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(dest, e))?;
            progress.on_progress(written, total).await;
        }

        writer.flush().await.map_err(|e| DownloadError::io(dest, e))?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use axum::routing::get;
    use axum::Router;
    use std::net::SocketAddr;

    async fn serve_fixture() -> SocketAddr {
        let app = Router::new()
            .route("/files/clip.mp4", get(|| async { vec![5u8; 2048] }))
            .route(
                "/files/chunked.bin",
                get(|| async {
                    let chunks = (0..10).map(|_| Ok::<_, std::io::Error>(bytes::Bytes::from(vec![1u8; 1000])));
                    axum::body::Body::from_stream(futures::stream::iter(chunks))
                }),
            )
            .route(
                "/files/missing.bin",
                get(|| async { (axum::http::StatusCode::NOT_FOUND, "gone") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_describe_and_download() {
        let addr = serve_fixture().await;
        let locator = SourceLocator::parse(&format!("http://{}/files/clip.mp4", addr));

        let transport = HttpTransport::default();
        let file = transport.describe(&locator, "m7", None).await.unwrap();
        assert_eq!(file.name, "clip.mp4");
        assert_eq!(file.declared_size(), 2048);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clip.part");
        let written = transport
            .download(&file, &dest, u64::MAX, &mut NoProgress)
            .await
            .unwrap();
        assert_eq!(written, 2048);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 2048);
    }

    #[tokio::test]
    async fn test_missing_url() {
        let addr = serve_fixture().await;
        let locator = SourceLocator::parse(&format!("http://{}/files/missing.bin", addr));
        let transport = HttpTransport::default();

        let result = transport.describe(&locator, "m7", None).await;
        assert!(matches!(result, Err(DownloadError::NotFound(_))));

        let file = IncomingFile::new("m7", SourceMedia::classify(None, 0), locator);
        let dir = tempfile::tempdir().unwrap();
        let result = transport
            .download(&file, &dir.path().join("x"), u64::MAX, &mut NoProgress)
            .await;
        assert!(matches!(result, Err(DownloadError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_content_length_over_limit_rejected_before_body() {
        let addr = serve_fixture().await;
        let locator = SourceLocator::parse(&format!("http://{}/files/clip.mp4", addr));
        let file = IncomingFile::new("m7", SourceMedia::classify(None, 0), locator);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clip.part");

        let result = HttpTransport::default()
            .download(&file, &dest, 1024, &mut NoProgress)
            .await;
        assert!(matches!(
            result,
            Err(DownloadError::TooLarge { limit: 1024, received: 2048 })
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_unsized_body_stops_past_limit() {
        let addr = serve_fixture().await;
        let locator = SourceLocator::parse(&format!("http://{}/files/chunked.bin", addr));
        let transport = HttpTransport::default();
        let file = transport.describe(&locator, "m7", None).await.unwrap();
        assert_eq!(file.declared_size(), 0);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("chunked.part");
        let result = transport.download(&file, &dest, 2500, &mut NoProgress).await;

        assert!(matches!(result, Err(DownloadError::TooLarge { limit: 2500, .. })));
        assert!(std::fs::metadata(&dest).unwrap().len() <= 2500);
    }
}
