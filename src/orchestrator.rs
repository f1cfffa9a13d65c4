/*!
 * Relay orchestration
 *
 * One call to [`RelayOrchestrator::relay`] drives a single file through
 * download, upload, link generation and registration:
 *
 * ```text
 * Pending -> Downloading -> Uploading -> LinkReady -> Registered -> Cleaned
 *                 |              |            |
 *                 +--------------+------------+-----> Failed -> Cleaned
 * ```
 *
 * The local artifact is owned by an [`ArtifactGuard`], so it is removed on
 * every path, including when the relay future is dropped mid-transfer.
 */

use crate::config::FerryConfig;
use crate::error::{RelayError, Result};
use crate::link::{LinkGenerator, LinkRecord};
use crate::media::{object_key, IncomingFile, SourceLocator};
use crate::progress::{ProgressReporter, ProgressSink, StatusSurface};
use crate::registry::{FileId, RegistryError, RelayRegistry};
use crate::stage::{DownloadStage, UploadStage};
use crate::store::ObjectStore;
use crate::transport::Transport;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;

/// Lifecycle position of one relay task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStage {
    Pending,
    Downloading,
    Uploading,
    LinkReady,
    Registered,
    Failed,
    Cleaned,
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStage::Pending => "pending",
            TaskStage::Downloading => "downloading",
            TaskStage::Uploading => "uploading",
            TaskStage::LinkReady => "link_ready",
            TaskStage::Registered => "registered",
            TaskStage::Failed => "failed",
            TaskStage::Cleaned => "cleaned",
        };
        f.write_str(name)
    }
}

/// State of one in-flight relay, owned by a single `relay` call
#[derive(Debug, Clone)]
pub struct TransferTask {
    file_id: FileId,
    name: String,
    declared_size: u64,
    key: String,
    stage: TaskStage,
    current: u64,
    total: u64,
}

impl TransferTask {
    fn new(file_id: FileId, file: &IncomingFile) -> Self {
        Self {
            file_id,
            name: file.name.clone(),
            declared_size: file.declared_size(),
            key: object_key(&file.name),
            stage: TaskStage::Pending,
            current: 0,
            total: file.declared_size(),
        }
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    pub fn stage(&self) -> TaskStage {
        self.stage
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Bytes moved in the current stage, and the stage's expected total
    pub fn bytes(&self) -> (u64, u64) {
        (self.current, self.total)
    }

    fn advance(&mut self, stage: TaskStage) {
        tracing::info!(
            file_id = %self.file_id,
            file = %self.name,
            from = %self.stage,
            stage = %stage,
            "relay stage"
        );
        self.stage = stage;
        self.current = 0;
    }

    fn record_progress(&mut self, current: u64, total: u64) {
        self.current = current;
        self.total = total;
    }
}

/// Feeds stage progress into both the task counters and the reporter
struct TrackedProgress<'a> {
    task: &'a mut TransferTask,
    reporter: ProgressReporter,
}

#[async_trait]
impl<'a> ProgressSink for TrackedProgress<'a> {
    async fn on_progress(&mut self, current: u64, total: u64) {
        self.task.record_progress(current, total);
        self.reporter.report(current, total).await;
    }

    async fn on_complete(&mut self, total: u64) {
        self.task.record_progress(total, total);
        self.reporter.finish(total).await;
    }
}

/// Owns a uniquely named scratch file and removes it when done
#[derive(Debug)]
pub struct ArtifactGuard {
    path: PathBuf,
    temp: Option<TempPath>,
    removed: bool,
}

impl ArtifactGuard {
    /// Reserve a fresh `<prefix>XXXXXX.part` file inside `dir`
    pub fn create(dir: &Path, prefix: &str) -> std::io::Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".part")
            .tempfile_in(dir)?
            .into_temp_path();
        Ok(Self {
            path: temp.to_path_buf(),
            temp: Some(temp),
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the artifact. Safe to call repeatedly; a missing file counts
    /// as removed. Returns whether the file is gone.
    pub fn cleanup(&mut self) -> bool {
        let Some(temp) = self.temp.take() else {
            return self.removed;
        };
        match temp.close() {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "removed artifact");
                self.removed = true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.removed = true,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove artifact");
            }
        }
        self.removed
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Relay knobs taken from [`FerryConfig`]
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub max_file_size: u64,
    pub scratch_dir: PathBuf,
    pub progress_interval: Duration,
    pub upload_idle_timeout: Duration,
}

impl RelayOptions {
    pub fn from_config(config: &FerryConfig) -> Self {
        Self {
            max_file_size: config.relay.max_file_size,
            scratch_dir: config.relay.scratch_dir.clone(),
            progress_interval: config.relay.progress_interval(),
            upload_idle_timeout: config.relay.upload_idle_timeout(),
        }
    }
}

/// Sequences the relay pipeline for any number of concurrent tasks
pub struct RelayOrchestrator {
    store: Arc<dyn ObjectStore>,
    download: DownloadStage,
    upload: UploadStage,
    links: LinkGenerator,
    registry: Arc<RelayRegistry>,
    options: RelayOptions,
    store_ready: AtomicBool,
}

impl RelayOrchestrator {
    /// Build an orchestrator that refuses work until
    /// [`verify_store`](Self::verify_store) succeeds.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transport: Arc<dyn Transport>,
        links: LinkGenerator,
        registry: Arc<RelayRegistry>,
        options: RelayOptions,
    ) -> Self {
        Self {
            download: DownloadStage::new(transport),
            upload: UploadStage::new(Arc::clone(&store), options.upload_idle_timeout),
            store,
            links,
            registry,
            options,
            store_ready: AtomicBool::new(false),
        }
    }

    /// Build and probe the store in one go
    pub async fn connect(
        store: Arc<dyn ObjectStore>,
        transport: Arc<dyn Transport>,
        links: LinkGenerator,
        registry: Arc<RelayRegistry>,
        options: RelayOptions,
    ) -> Result<Self> {
        let orchestrator = Self::new(store, transport, links, registry, options);
        orchestrator.verify_store().await?;
        Ok(orchestrator)
    }

    /// Probe the object store and enable or disable the relay entry point
    pub async fn verify_store(&self) -> Result<()> {
        match self.store.probe().await {
            Ok(()) => {
                self.store_ready.store(true, Ordering::SeqCst);
                tracing::info!(bucket = self.store.bucket(), "object store reachable");
                Ok(())
            }
            Err(e) => {
                self.store_ready.store(false, Ordering::SeqCst);
                tracing::error!(bucket = self.store.bucket(), error = %e, "object store probe failed");
                Err(RelayError::Configuration(format!(
                    "object store {} is unavailable: {}",
                    self.store.bucket(),
                    e
                )))
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.store_ready.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Arc<RelayRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Registry query surface
    pub fn resolve(&self, id: &FileId) -> std::result::Result<LinkRecord, RegistryError> {
        self.registry.resolve(id)
    }

    /// Describe `source` (a local path or URL) through the transport, then relay it
    pub async fn relay_source(
        &self,
        source: &str,
        name: Option<String>,
        surface: Arc<dyn StatusSurface>,
    ) -> Result<LinkRecord> {
        if !self.is_ready() {
            return Err(self.unavailable());
        }
        let locator = SourceLocator::parse(source);
        let message_id = self.registry.clock().now().timestamp_millis().to_string();

        let file = match self
            .download
            .transport()
            .describe(&locator, &message_id, name)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                let err = RelayError::from(e);
                report_failure(surface.as_ref(), &err).await;
                return Err(err);
            }
        };
        self.relay(&file, surface).await
    }

    /// Issue fresh links for an object already in the bucket and register
    /// them under a new identifier. Nothing is downloaded or uploaded.
    pub async fn relink(&self, name: &str) -> Result<LinkRecord> {
        if !self.is_ready() {
            return Err(self.unavailable());
        }
        let key = object_key(name);

        let object = match self.store.head(&key).await {
            Ok(Some(object)) => object,
            Ok(None) => return Err(RelayError::NotStored { key }),
            Err(source) => return Err(RelayError::Lookup { key, source }),
        };

        let links = self
            .links
            .generate(&key, &object)
            .await
            .map_err(|source| RelayError::LinkGeneration {
                key: key.clone(),
                source,
            })?;

        let now = self.registry.clock().now();
        let record = LinkRecord::new(FileId::generate(&key, now), key, &object, links, now);
        self.registry.insert(record.file_id.clone(), record.clone());
        tracing::info!(
            file_id = %record.file_id,
            key = %record.object_key,
            bytes = record.size,
            "relinked stored object"
        );
        Ok(record)
    }

    /// Relay one inbound file end to end.
    ///
    /// Every per-task failure is returned (and reported on `surface`) without
    /// leaving a temporary artifact behind.
    pub async fn relay(
        &self,
        file: &IncomingFile,
        surface: Arc<dyn StatusSurface>,
    ) -> Result<LinkRecord> {
        if !self.is_ready() {
            return Err(self.unavailable());
        }

        let file_id = FileId::generate(&file.name, self.registry.clock().now());
        let mut task = TransferTask::new(file_id, file);

        let declared = file.declared_size();
        if declared > self.options.max_file_size {
            let err = RelayError::SizeLimit {
                declared,
                max: self.options.max_file_size,
            };
            task.advance(TaskStage::Failed);
            task.advance(TaskStage::Cleaned);
            report_failure(surface.as_ref(), &err).await;
            return Err(err);
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.options.scratch_dir).await {
            let err = RelayError::Configuration(format!(
                "cannot create scratch directory {}: {}",
                self.options.scratch_dir.display(),
                e
            ));
            report_failure(surface.as_ref(), &err).await;
            return Err(err);
        }

        let prefix = format!("{}-", task.file_id());
        let mut artifact = match ArtifactGuard::create(&self.options.scratch_dir, &prefix) {
            Ok(artifact) => artifact,
            Err(e) => {
                let err = RelayError::Configuration(format!(
                    "cannot create artifact in {}: {}",
                    self.options.scratch_dir.display(),
                    e
                ));
                task.advance(TaskStage::Failed);
                task.advance(TaskStage::Cleaned);
                report_failure(surface.as_ref(), &err).await;
                return Err(err);
            }
        };

        let result = self
            .run_stages(&mut task, file, artifact.path(), &surface)
            .await;

        if result.is_err() {
            task.advance(TaskStage::Failed);
        }
        let removed = artifact.cleanup();
        task.advance(TaskStage::Cleaned);

        match &result {
            Ok(record) => {
                tracing::info!(file_id = %record.file_id, key = %record.object_key, bytes = record.size, removed, "relay complete");
                let summary = format!("Link ready for {}\n{}", record.file_name, record.primary_url);
                if let Err(e) = surface.update(&summary).await {
                    tracing::debug!(error = %e, "status update dropped");
                }
            }
            Err(e) => {
                tracing::warn!(
                    file_id = %task.file_id(),
                    category = %e.category(),
                    transient = e.is_transient(),
                    error = %e,
                    removed,
                    "relay failed"
                );
                report_failure(surface.as_ref(), e).await;
            }
        }
        result
    }

    async fn run_stages(
        &self,
        task: &mut TransferTask,
        file: &IncomingFile,
        artifact: &Path,
        surface: &Arc<dyn StatusSurface>,
    ) -> Result<LinkRecord> {
        task.advance(TaskStage::Downloading);
        let downloaded = {
            let mut progress = TrackedProgress {
                reporter: ProgressReporter::new(
                    format!("Downloading {}", file.name),
                    self.options.progress_interval,
                    Arc::clone(surface),
                ),
                task: &mut *task,
            };
            self.download
                .run(file, artifact, self.options.max_file_size, &mut progress)
                .await?
        };

        task.advance(TaskStage::Uploading);
        let object = {
            let key = task.key().to_string();
            let mut progress = TrackedProgress {
                reporter: ProgressReporter::new(
                    format!("Uploading {}", file.name),
                    self.options.progress_interval,
                    Arc::clone(surface),
                ),
                task: &mut *task,
            };
            self.upload
                .run(&downloaded.path, &key, &mut progress)
                .await?
        };

        task.advance(TaskStage::LinkReady);
        let links = match self.links.generate(&file.name, &object).await {
            Ok(links) => links,
            Err(source) => {
                tracing::error!(
                    orphaned_object = true,
                    file_id = %task.file_id(),
                    bucket = self.store.bucket(),
                    key = %object.key,
                    bytes = object.size,
                    error = %source,
                    "object stored but link generation failed"
                );
                return Err(RelayError::LinkGeneration {
                    key: object.key,
                    source,
                });
            }
        };

        let record = LinkRecord::new(
            task.file_id().clone(),
            file.name.clone(),
            &object,
            links,
            self.registry.clock().now(),
        );
        self.registry.insert(record.file_id.clone(), record.clone());
        task.advance(TaskStage::Registered);

        Ok(record)
    }

    fn unavailable(&self) -> RelayError {
        RelayError::Configuration(format!(
            "object store {} has not passed its connectivity probe",
            self.store.bucket()
        ))
    }
}

async fn report_failure(surface: &dyn StatusSurface, err: &RelayError) {
    if let Err(e) = surface.update(&err.user_message()).await {
        tracing::debug!(error = %e, "status update dropped");
    }
}
