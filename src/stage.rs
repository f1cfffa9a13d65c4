/*!
 * Transfer stages: download into a local artifact, upload to the store
 *
 * The download stage runs cooperatively on the async scheduler. The upload
 * stage hands the blocking store primitive to a dedicated worker thread and
 * listens for its signals on a bounded channel, giving up when nothing
 * arrives within the inactivity timeout.
 */

use crate::media::IncomingFile;
use crate::progress::ProgressSink;
use crate::store::{ObjectRef, ObjectStore, StoreError};
use crate::transport::{DownloadError, Transport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity of the worker-to-stage signal channel
const SIGNAL_CAPACITY: usize = 64;

/// Local artifact produced by a download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
}

/// Pulls inbound files into the scratch directory
#[derive(Clone)]
pub struct DownloadStage {
    transport: Arc<dyn Transport>,
}

impl DownloadStage {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Download `file` into `dest`, refusing to write more than `limit` bytes
    pub async fn run(
        &self,
        file: &IncomingFile,
        dest: &Path,
        limit: u64,
        progress: &mut dyn ProgressSink,
    ) -> Result<Artifact, DownloadError> {
        let size = self.transport.download(file, dest, limit, progress).await?;

        let declared = file.declared_size();
        if size != declared {
            tracing::warn!(
                file = %file.name,
                declared,
                actual = size,
                "declared size differs from bytes downloaded"
            );
        }
        progress.on_complete(size).await;

        Ok(Artifact {
            path: dest.to_path_buf(),
            size,
        })
    }
}

/// Message from the upload worker
#[derive(Debug)]
pub enum UploadSignal {
    /// Cumulative bytes sent
    Progress(u64),
    Done(ObjectRef),
    Failed(StoreError),
}

/// Why an upload did not produce an object
#[derive(Debug, Error)]
pub enum UploadFailure {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no upload progress for {}s", idle.as_secs())]
    Timeout { idle: Duration },

    #[error("upload worker exited without a result")]
    WorkerLost,

    #[error("failed to start upload worker: {0}")]
    Spawn(String),

    #[error("cannot read artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Pushes a local artifact to the object store
#[derive(Clone)]
pub struct UploadStage {
    store: Arc<dyn ObjectStore>,
    idle_timeout: Duration,
}

impl UploadStage {
    pub fn new(store: Arc<dyn ObjectStore>, idle_timeout: Duration) -> Self {
        Self {
            store,
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub async fn run(
        &self,
        artifact: &Path,
        key: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<ObjectRef, UploadFailure> {
        let total = tokio::fs::metadata(artifact)
            .await
            .map_err(|source| UploadFailure::Artifact {
                path: artifact.to_path_buf(),
                source,
            })?
            .len();

        let mut signals = self.spawn_worker(artifact, key)?;

        loop {
            let signal = match tokio::time::timeout(self.idle_timeout, signals.recv()).await {
                Ok(Some(signal)) => signal,
                Ok(None) => return Err(UploadFailure::WorkerLost),
                Err(_) => {
                    return Err(UploadFailure::Timeout {
                        idle: self.idle_timeout,
                    })
                }
            };

            match signal {
                UploadSignal::Progress(sent) => progress.on_progress(sent, total).await,
                UploadSignal::Done(object) => {
                    progress.on_complete(object.size).await;
                    return Ok(object);
                }
                UploadSignal::Failed(e) => return Err(UploadFailure::Store(e)),
            }
        }
    }

    /// Start the blocking upload on its own thread.
    ///
    /// If the receiver goes away (timeout, cancellation) the worker's sends
    /// fail silently and the thread finishes on its own.
    fn spawn_worker(
        &self,
        artifact: &Path,
        key: &str,
    ) -> Result<mpsc::Receiver<UploadSignal>, UploadFailure> {
        let (tx, rx) = mpsc::channel(SIGNAL_CAPACITY);
        let store = Arc::clone(&self.store);
        let path = artifact.to_path_buf();
        let key = key.to_string();

        std::thread::Builder::new()
            .name("ferry-upload".to_string())
            .spawn(move || {
                let progress_tx = tx.clone();
                let result = store.upload_chunked(&path, &key, &mut |sent| {
                    let _ = progress_tx.blocking_send(UploadSignal::Progress(sent));
                });

                let signal = match result {
                    Ok(object) => UploadSignal::Done(object),
                    Err(e) => UploadSignal::Failed(e),
                };
                if tx.blocking_send(signal).is_err() {
                    tracing::debug!(key = %key, "upload finished after the stage stopped listening");
                }
            })
            .map_err(|e| UploadFailure::Spawn(e.to_string()))?;

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{SourceLocator, SourceMedia};
    use crate::store::{MemoryStore, UploadFault};
    use crate::transport::FsTransport;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingSink(Vec<(u64, u64)>);

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn on_progress(&mut self, current: u64, total: u64) {
            self.0.push((current, total));
        }
    }

    fn write_file(dir: &Path, name: &str, size: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![3u8; size]).unwrap();
        path
    }

    #[tokio::test]
    async fn test_download_stage_reports_completion() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "a.bin", 1000);
        let file = IncomingFile::new(
            "1",
            SourceMedia::classify(Some("a.bin".into()), 1000),
            SourceLocator::Path(src),
        );

        let stage = DownloadStage::new(Arc::new(FsTransport::new(256)));
        let mut sink = RecordingSink::default();
        let artifact = stage
            .run(&file, &dir.path().join("a.part"), u64::MAX, &mut sink)
            .await
            .unwrap();

        assert_eq!(artifact.size, 1000);
        assert_eq!(sink.0.last(), Some(&(1000, 1000)));
        assert!(sink.0.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[tokio::test]
    async fn test_download_stage_tolerates_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "a.bin", 10);
        let file = IncomingFile::new(
            "1",
            SourceMedia::classify(Some("a.bin".into()), 999),
            SourceLocator::Path(src),
        );

        let stage = DownloadStage::new(Arc::new(FsTransport::default()));
        let artifact = stage
            .run(&file, &dir.path().join("a.part"), u64::MAX, &mut RecordingSink::default())
            .await
            .unwrap();
        assert_eq!(artifact.size, 10);
    }

    #[tokio::test]
    async fn test_upload_stage_relays_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "clip.mp4", 200 * 1024);
        let store = MemoryStore::new("media");

        let stage = UploadStage::new(Arc::new(store.clone()), Duration::from_secs(5));
        let mut sink = RecordingSink::default();
        let object = stage.run(&path, "clip.mp4", &mut sink).await.unwrap();

        assert_eq!(object.key, "clip.mp4");
        assert_eq!(object.size, 200 * 1024);
        assert_eq!(sink.0.last(), Some(&(200 * 1024, 200 * 1024)));
        assert!(sink.0.windows(2).all(|w| w[0].0 <= w[1].0));
        assert!(store.object_data("clip.mp4").is_some());
    }

    #[tokio::test]
    async fn test_upload_stage_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "empty.txt", 0);
        let stage = UploadStage::new(Arc::new(MemoryStore::new("media")), Duration::from_secs(5));

        let mut sink = RecordingSink::default();
        let object = stage.run(&path, "empty.txt", &mut sink).await.unwrap();
        assert_eq!(object.size, 0);
        assert_eq!(sink.0.last(), Some(&(0, 0)));
    }

    #[tokio::test]
    async fn test_upload_stage_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "clip.mp4", 10);
        let store = MemoryStore::new("media");
        store.set_upload_fault(Some(UploadFault::Fail(StoreError::AccessDenied(
            "no write".to_string(),
        ))));

        let stage = UploadStage::new(Arc::new(store), Duration::from_secs(5));
        let result = stage.run(&path, "clip.mp4", &mut RecordingSink::default()).await;
        assert!(matches!(
            result,
            Err(UploadFailure::Store(StoreError::AccessDenied(_)))
        ));
    }

    #[tokio::test]
    async fn test_upload_stage_times_out_without_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "clip.mp4", 10);
        let store = MemoryStore::new("media");
        store.set_upload_fault(Some(UploadFault::Stall(Duration::from_millis(500))));

        let stage = UploadStage::new(Arc::new(store), Duration::from_millis(50));
        let result = stage.run(&path, "clip.mp4", &mut RecordingSink::default()).await;
        assert!(matches!(result, Err(UploadFailure::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_upload_stage_missing_artifact() {
        let stage = UploadStage::new(Arc::new(MemoryStore::new("media")), Duration::from_secs(1));
        let result = stage
            .run(Path::new("/no/such/artifact"), "k", &mut RecordingSink::default())
            .await;
        assert!(matches!(result, Err(UploadFailure::Artifact { .. })));
    }
}
