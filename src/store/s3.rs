//! S3 and S3-compatible object store backed by the AWS SDK

use super::error::{StoreError, StoreResult};
use super::{ObjectRef, ObjectStore};
use crate::config::StoreSettings;
use crate::credentials::CredentialProvider;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as AwsS3Client;
use bytes::Bytes;
use secrecy::ExposeSecret;
use std::path::Path;
use std::time::Duration;
use std::fs::File;
use std::io::Read;
use tokio::runtime::Handle;

/// Object store speaking the S3 API
#[derive(Clone)]
pub struct S3Store {
    client: AwsS3Client,
    bucket: String,
    part_size: usize,
    runtime: Handle,
}

impl S3Store {
    /// Build a client from settings.
    ///
    /// Must be called from within a Tokio runtime; the runtime handle is kept
    /// so the blocking upload primitive can drive SDK futures from a worker
    /// thread.
    pub async fn connect(
        settings: &StoreSettings,
        credentials: Option<&dyn CredentialProvider>,
    ) -> StoreResult<Self> {
        let client = Self::build_aws_client(settings, credentials).await?;
        Ok(Self {
            client,
            bucket: settings.bucket.clone(),
            part_size: settings.part_size,
            runtime: Handle::current(),
        })
    }

    async fn build_aws_client(
        settings: &StoreSettings,
        credentials: Option<&dyn CredentialProvider>,
    ) -> StoreResult<AwsS3Client> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        let region_provider = if let Some(region) = &settings.region {
            RegionProviderChain::first_try(Region::new(region.clone()))
        } else {
            RegionProviderChain::default_provider().or_else(Region::new("us-east-1"))
        };
        loader = loader.region(region_provider);

        if let Some(provider) = credentials {
            let credential = provider
                .credential()
                .await
                .map_err(|e| StoreError::Authentication(e.to_string()))?;
            loader = loader.credentials_provider(Credentials::new(
                credential.access_key(),
                credential.secret_key().expose_secret(),
                credential.session_token().map(|t| t.expose_secret().to_string()),
                None,
                "ferry-explicit",
            ));
        }

        let aws_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&aws_config);

        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }

        let timeout_config = aws_sdk_s3::config::timeout::TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(settings.timeout_seconds))
            .build();
        builder = builder.timeout_config(timeout_config);

        Ok(AwsS3Client::from_conf(builder.build()))
    }

    /// Upload with `put_object` for small files, multipart otherwise.
    ///
    /// Each SDK request is driven with `block_on` on its own so `progress`
    /// always runs outside the runtime context.
    fn upload_blocking(
        &self,
        local_path: &Path,
        key: &str,
        progress: &mut dyn FnMut(u64),
    ) -> StoreResult<ObjectRef> {
        let size = std::fs::metadata(local_path)?.len();
        let content_type = content_type_for(key);

        if size < self.part_size as u64 {
            let data = std::fs::read(local_path)?;
            let etag = self
                .runtime
                .block_on(self.put_small(key, &content_type, data))?;
            progress(size);

            return Ok(ObjectRef {
                key: key.to_string(),
                size,
                content_id: etag,
            });
        }

        let upload_id = self
            .runtime
            .block_on(self.initiate_multipart_upload(key, &content_type))?;

        match self.upload_parts(local_path, key, &upload_id, progress) {
            Ok(parts) => {
                let etag = self
                    .runtime
                    .block_on(self.complete_multipart_upload(key, &upload_id, parts))?;
                Ok(ObjectRef {
                    key: key.to_string(),
                    size,
                    content_id: etag,
                })
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .runtime
                    .block_on(self.abort_multipart_upload(key, &upload_id))
                {
                    tracing::warn!(key, error = %abort_err, "failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn put_small(
        &self,
        key: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> StoreResult<Option<String>> {
        let response = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(StoreError::from)?;
        Ok(response.e_tag().map(str::to_string))
    }

    async fn initiate_multipart_upload(&self, key: &str, content_type: &str) -> StoreResult<String> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(StoreError::from)?;

        response
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::MultipartUpload("No upload ID returned".to_string()))
    }

    /// Upload parts sequentially so progress stays monotonic
    fn upload_parts(
        &self,
        local_path: &Path,
        key: &str,
        upload_id: &str,
        progress: &mut dyn FnMut(u64),
    ) -> StoreResult<Vec<CompletedPart>> {
        let mut file = File::open(local_path)?;
        let mut parts = Vec::new();
        let mut sent = 0u64;
        let mut part_number = 1;

        loop {
            let buffer = read_part(&mut file, self.part_size)?;
            if buffer.is_empty() {
                break;
            }
            let len = buffer.len() as u64;

            let part = self
                .runtime
                .block_on(self.upload_part(key, upload_id, part_number, buffer))?;
            parts.push(part);

            sent += len;
            progress(sent);
            tracing::trace!(key, part_number, sent, "uploaded part");
            part_number += 1;
        }

        Ok(parts)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        buffer: Vec<u8>,
    ) -> StoreResult<CompletedPart> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(Bytes::from(buffer)))
            .send()
            .await
            .map_err(StoreError::from)?;

        let etag = response.e_tag().ok_or_else(|| {
            StoreError::MultipartUpload(format!("No ETag returned for part {}", part_number))
        })?;
        Ok(CompletedPart::builder()
            .part_number(part_number)
            .e_tag(etag)
            .build())
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<Option<String>> {
        let multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        let response = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(multipart_upload)
            .send()
            .await
            .map_err(StoreError::from)?;

        Ok(response.e_tag().map(str::to_string))
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StoreResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn probe(&self) -> StoreResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| match StoreError::from(e) {
                err if err.is_not_found() => StoreError::BucketNotFound(self.bucket.clone()),
                StoreError::AccessDenied(_) => {
                    StoreError::AccessDenied(format!("cannot access bucket {}", self.bucket))
                }
                other => other,
            })?;
        Ok(())
    }

    fn upload_chunked(
        &self,
        local_path: &Path,
        key: &str,
        progress: &mut dyn FnMut(u64),
    ) -> StoreResult<ObjectRef> {
        // Handle::block_on panics inside a runtime thread
        if Handle::try_current().is_ok() {
            return Err(StoreError::InvalidConfig(
                "upload_chunked must be called from a worker thread, not an async task"
                    .to_string(),
            ));
        }
        self.upload_blocking(local_path, key, progress)
    }

    async fn sign_url(&self, object: &ObjectRef, ttl: Duration) -> StoreResult<String> {
        let presign_config =
            PresigningConfig::expires_in(ttl).map_err(|e| StoreError::Presign(e.to_string()))?;

        let file_name = object.key.rsplit('/').next().unwrap_or(&object.key);
        let encoded: String = url::form_urlencoded::byte_serialize(file_name.as_bytes()).collect();

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object.key)
            .response_content_disposition(format!("attachment; filename=\"{}\"", encoded))
            .presigned(presign_config)
            .await
            .map_err(|e| StoreError::Presign(e.to_string()))?;

        Ok(request.uri().to_string())
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectRef>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(ObjectRef {
                key: key.to_string(),
                size: output.content_length().unwrap_or(0).max(0) as u64,
                content_id: output.e_tag().map(str::to_string),
            })),
            Err(e) => match StoreError::from(e) {
                err if err.is_not_found() => Ok(None),
                err => Err(err),
            },
        }
    }
}

/// Read up to `size` bytes, returning fewer only at end of file
fn read_part(file: &mut File, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = file.read(&mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

fn content_type_for(key: &str) -> String {
    mime_guess::from_path(key)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("movie.mp4"), "video/mp4");
        assert_eq!(content_type_for("notes.pdf"), "application/pdf");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }

    #[test]
    fn test_read_part_short_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![7u8; 10]).unwrap();

        let mut file = File::open(&path).unwrap();
        assert_eq!(read_part(&mut file, 4).unwrap().len(), 4);
        assert_eq!(read_part(&mut file, 4).unwrap().len(), 4);
        assert_eq!(read_part(&mut file, 4).unwrap().len(), 2);
        assert!(read_part(&mut file, 4).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_builds_client() {
        let settings = StoreSettings {
            bucket: "test-bucket".to_string(),
            region: Some("us-east-1".to_string()),
            endpoint: Some("http://localhost:9000".to_string()),
            force_path_style: true,
            ..Default::default()
        };
        let store = S3Store::connect(&settings, None).await.unwrap();
        assert_eq!(store.bucket(), "test-bucket");
    }

    #[tokio::test]
    async fn test_upload_chunked_refuses_async_context() {
        let settings = StoreSettings {
            bucket: "test-bucket".to_string(),
            region: Some("us-east-1".to_string()),
            ..Default::default()
        };
        let store = S3Store::connect(&settings, None).await.unwrap();
        let result = store.upload_chunked(Path::new("/nonexistent"), "k", &mut |_| {});
        assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
    }
}
