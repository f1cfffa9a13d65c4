//! In-memory object store for tests and dry runs
//!
//! Objects live in a shared map. Faults can be injected per operation so the
//! relay pipeline's failure paths can be exercised without a real service.

use super::error::{StoreError, StoreResult};
use super::{ObjectRef, ObjectStore};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Bytes read per progress callback
const CHUNK_SIZE: usize = 64 * 1024;

/// Failure injected into the next uploads
#[derive(Debug, Clone)]
pub enum UploadFault {
    /// Fail immediately with the given error
    Fail(StoreError),

    /// Sleep before sending anything, simulating a hung connection
    Stall(Duration),

    /// Fail once this many bytes have been reported
    FailAfter(u64),
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    etag: String,
}

/// In-memory [`ObjectStore`]
///
/// Cloning yields another handle to the same objects and fault settings.
///
/// # Example
///
/// ```rust
/// use ferry::store::MemoryStore;
///
/// let store = MemoryStore::new("media");
/// store.put_object("clip.mp4", b"frames");
/// assert_eq!(store.object_data("clip.mp4").unwrap(), b"frames");
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    bucket: String,
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    available: Arc<AtomicBool>,
    upload_fault: Arc<RwLock<Option<UploadFault>>>,
    sign_fault: Arc<RwLock<Option<StoreError>>>,
    upload_attempts: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
            upload_fault: Arc::new(RwLock::new(None)),
            sign_fault: Arc::new(RwLock::new(None)),
            upload_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make `probe` fail (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Inject a fault into every following upload (`None` clears it)
    pub fn set_upload_fault(&self, fault: Option<UploadFault>) {
        if let Ok(mut slot) = self.upload_fault.write() {
            *slot = fault;
        }
    }

    /// Inject a fault into every following `sign_url` call
    pub fn set_sign_fault(&self, fault: Option<StoreError>) {
        if let Ok(mut slot) = self.sign_fault.write() {
            *slot = fault;
        }
    }

    /// Number of times `upload_chunked` was entered
    pub fn upload_attempts(&self) -> usize {
        self.upload_attempts.load(Ordering::SeqCst)
    }

    /// Insert an object directly
    pub fn put_object(&self, key: &str, data: &[u8]) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(
                key.to_string(),
                StoredObject {
                    data: data.to_vec(),
                    etag: etag_for(data),
                },
            );
        }
    }

    /// Contents of a stored object
    pub fn object_data(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .ok()
            .and_then(|objects| objects.get(key).map(|o| o.data.clone()))
    }

    /// ETag recorded for a stored object
    pub fn object_etag(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .ok()
            .and_then(|objects| objects.get(key).map(|o| o.etag.clone()))
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    fn current_upload_fault(&self) -> Option<UploadFault> {
        self.upload_fault.read().ok().and_then(|f| f.clone())
    }

    fn poisoned() -> StoreError {
        StoreError::Io("memory store lock poisoned".to_string())
    }
}

fn etag_for(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn probe(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::BucketNotFound(self.bucket.clone()))
        }
    }

    fn upload_chunked(
        &self,
        local_path: &Path,
        key: &str,
        progress: &mut dyn FnMut(u64),
    ) -> StoreResult<ObjectRef> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);

        if key.is_empty() {
            return Err(StoreError::InvalidKey("empty key".to_string()));
        }

        let fault = self.current_upload_fault();
        match &fault {
            Some(UploadFault::Fail(err)) => return Err(err.clone()),
            Some(UploadFault::Stall(duration)) => std::thread::sleep(*duration),
            _ => {}
        }

        let mut file = File::open(local_path)?;
        let mut data = Vec::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buffer[..n]);

            if let Some(UploadFault::FailAfter(limit)) = &fault {
                if data.len() as u64 >= *limit {
                    return Err(StoreError::Network(format!(
                        "connection reset after {} bytes",
                        data.len()
                    )));
                }
            }
            progress(data.len() as u64);
        }

        if data.is_empty() {
            progress(0);
        }

        let size = data.len() as u64;
        let etag = etag_for(&data);
        self.objects
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(
                key.to_string(),
                StoredObject {
                    data,
                    etag: etag.clone(),
                },
            );

        Ok(ObjectRef {
            key: key.to_string(),
            size,
            content_id: Some(etag),
        })
    }

    async fn sign_url(&self, object: &ObjectRef, ttl: Duration) -> StoreResult<String> {
        if let Some(err) = self.sign_fault.read().ok().and_then(|f| f.clone()) {
            return Err(err);
        }
        if self.head(&object.key).await?.is_none() {
            return Err(StoreError::NotFound {
                bucket: self.bucket.clone(),
                key: object.key.clone(),
            });
        }

        let mut url = url::Url::parse("https://memory.invalid/")
            .map_err(|e| StoreError::Presign(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Presign("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .push(&self.bucket)
            .push(&object.key);
        url.query_pairs_mut()
            .append_pair("X-Expires", &ttl.as_secs().to_string());
        Ok(url.to_string())
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectRef>> {
        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        Ok(objects.get(key).map(|o| ObjectRef {
            key: key.to_string(),
            size: o.data.len() as u64,
            content_id: Some(o.etag.clone()),
        }))
    }
}
