//! Object store abstraction
//!
//! The relay pipeline talks to object storage only through [`ObjectStore`].
//! Two implementations ship with the crate:
//!
//! - [`S3Store`]: AWS S3 and S3-compatible services (Wasabi, MinIO, R2)
//!   through the official AWS SDK
//! - [`MemoryStore`]: an in-memory store with fault injection, used by tests
//!   and dry runs
//!
//! # Blocking upload primitive
//!
//! [`ObjectStore::upload_chunked`] is deliberately synchronous. Callers must
//! run it on a dedicated worker thread and bridge progress back to async code
//! (see [`crate::stage::UploadStage`]). Everything else is async.

mod error;
mod memory;
mod s3;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, UploadFault};
pub use s3::S3Store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Minimum multipart part size accepted by S3
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default multipart part size (8 MiB)
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Maximum multipart part size (5 GiB)
pub const MAX_PART_SIZE: usize = 5 * 1024 * 1024 * 1024;

/// Canonical reference to an object after a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object key within the bucket
    pub key: String,

    /// Stored size in bytes
    pub size: u64,

    /// Store-assigned content identifier (ETag for S3)
    pub content_id: Option<String>,
}

/// Operations the relay pipeline needs from an object store.
///
/// Implementations are shared handles (`Arc<dyn ObjectStore>`) and must be
/// safe for concurrent use from many relay tasks.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket (or namespace) objects are written to
    fn bucket(&self) -> &str;

    /// Lightweight connectivity check, run once at startup
    async fn probe(&self) -> StoreResult<()>;

    /// Upload `local_path` under `key`, calling `progress` with the
    /// cumulative number of bytes sent after each chunk.
    ///
    /// This call blocks the current thread until the upload finishes. It must
    /// not be invoked from inside an async task.
    fn upload_chunked(
        &self,
        local_path: &Path,
        key: &str,
        progress: &mut dyn FnMut(u64),
    ) -> StoreResult<ObjectRef>;

    /// Produce a time-limited URL granting read access to `object`
    async fn sign_url(&self, object: &ObjectRef, ttl: Duration) -> StoreResult<String>;

    /// Look up the object stored under `key`; `None` when there is none
    async fn head(&self, key: &str) -> StoreResult<Option<ObjectRef>>;
}
