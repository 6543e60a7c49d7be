// Copyright 2025 mongovault authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// S3 backend implementation

use super::backend::{BlobStore, ChunkSink, ChunkSource};
use crate::config::S3Settings;
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ServerSideEncryption};
use aws_sdk_s3::Client as S3Client;
use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

/// Compressed bytes buffered before each multipart part upload.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3 backend writing server-side-encrypted objects under a bucket and key
/// prefix.
pub struct S3Backend {
    client: S3Client,
    bucket: String,
    prefix: String,
}

impl S3Backend {
    pub async fn new(settings: &S3Settings) -> Result<Self> {
        let region = region_from_domain(&settings.domain);
        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            "static",
        );

        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut s3_config = S3ConfigBuilder::from(&aws_config);
        if !settings.domain.ends_with(".amazonaws.com") {
            // S3-compatible endpoint: address it directly, path style.
            s3_config = s3_config
                .endpoint_url(format!("https://{}", settings.domain))
                .force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config.build());
        info!(
            bucket = %settings.bucket,
            region = %region,
            "initializing s3 backend"
        );

        Ok(Self {
            client,
            bucket: settings.bucket.clone(),
            prefix: settings.base_dir.trim_matches('/').to_string(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }
}

#[async_trait]
impl BlobStore for S3Backend {
    async fn create(&self, key: &str) -> Result<Box<dyn ChunkSink>> {
        let full_key = self.full_key(key);
        debug!(bucket = %self.bucket, key = %full_key, "creating s3 object");
        Ok(Box::new(S3Sink {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: full_key,
            buf: BytesMut::new(),
            upload_id: None,
            parts: Vec::new(),
            part_number: 0,
        }))
    }

    async fn open(&self, key: &str) -> Result<Box<dyn ChunkSource>> {
        let full_key = self.full_key(key);
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    BackupError::NotFound(full_key.clone())
                } else {
                    convert_error(&full_key, &service_err.to_string())
                }
            })?;
        Ok(Box::new(S3Source {
            key: full_key,
            body: response.body,
        }))
    }

    fn kind(&self) -> &str {
        "s3"
    }
}

/// Derive the region from a `s3-{region}.amazonaws.com` or
/// `s3.{region}.amazonaws.com` domain; anything else is treated as a custom
/// endpoint in the default region.
fn region_from_domain(domain: &str) -> String {
    domain
        .strip_suffix(".amazonaws.com")
        .and_then(|d| d.strip_prefix("s3-").or_else(|| d.strip_prefix("s3.")))
        .filter(|region| !region.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "us-east-1".to_string())
}

fn convert_error(key: &str, message: &str) -> BackupError {
    if message.contains("AccessDenied") || message.contains("Access Denied") {
        BackupError::StoragePermission(format!("{key}: {message}"))
    } else {
        BackupError::StorageIo(format!("{key}: {message}"))
    }
}

/// Buffers compressed chunks and uploads them as multipart parts. Small
/// objects that never fill a part are written with a single `PutObject`
/// at finish time instead.
struct S3Sink {
    client: S3Client,
    bucket: String,
    key: String,
    buf: BytesMut,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
    part_number: i32,
}

impl S3Sink {
    async fn ensure_multipart(&mut self) -> Result<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .server_side_encryption(ServerSideEncryption::Aes256)
            .send()
            .await
            .map_err(|e| convert_error(&self.key, &e.to_string()))?;
        let id = response
            .upload_id()
            .ok_or_else(|| {
                BackupError::StorageIo(format!("{}: multipart upload id missing", self.key))
            })?
            .to_string();
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn upload_part(&mut self, len: usize) -> Result<()> {
        let upload_id = self.ensure_multipart().await?;
        let body = self.buf.split_to(len).freeze();
        self.part_number += 1;
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload_id)
            .part_number(self.part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| convert_error(&self.key, &e.to_string()))?;
        self.parts.push(
            CompletedPart::builder()
                .part_number(self.part_number)
                .e_tag(response.e_tag().unwrap_or_default())
                .build(),
        );
        Ok(())
    }

    /// Best-effort abort of an in-flight multipart upload so abandoned
    /// parts do not keep accruing storage. A failure here only loses the
    /// cleanup, never the primary error.
    async fn abort_upload(&mut self) {
        let Some(upload_id) = self.upload_id.take() else {
            return;
        };
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload_id)
            .send()
            .await
        {
            warn!(
                bucket = %self.bucket,
                key = %self.key,
                error = %e,
                "failed to abort multipart upload"
            );
        }
        self.parts.clear();
    }
}

#[async_trait]
impl ChunkSink for S3Sink {
    async fn put(&mut self, chunk: Bytes) -> Result<()> {
        self.buf.extend_from_slice(&chunk);
        while self.buf.len() >= PART_SIZE {
            self.upload_part(PART_SIZE).await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if let Err(e) = self.complete().await {
            self.abort_upload().await;
            return Err(e);
        }
        debug!(bucket = %self.bucket, key = %self.key, "s3 object finalized");
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        self.buf.clear();
        self.abort_upload().await;
        Ok(())
    }
}

impl S3Sink {
    async fn complete(&mut self) -> Result<()> {
        match self.upload_id.clone() {
            None => {
                // Never filled a part: a single encrypted put is enough.
                let body = self.buf.split().freeze();
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&self.key)
                    .server_side_encryption(ServerSideEncryption::Aes256)
                    .body(ByteStream::from(body))
                    .send()
                    .await
                    .map_err(|e| convert_error(&self.key, &e.to_string()))?;
            }
            Some(upload_id) => {
                if !self.buf.is_empty() {
                    let len = self.buf.len();
                    self.upload_part(len).await?;
                }
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&self.key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(self.parts.clone()))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| convert_error(&self.key, &e.to_string()))?;
            }
        }
        Ok(())
    }
}

struct S3Source {
    key: String,
    body: ByteStream,
}

#[async_trait]
impl ChunkSource for S3Source {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.body
            .try_next()
            .await
            .map_err(|e| BackupError::StorageIo(format!("{}: {e}", self.key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_from_domain() {
        assert_eq!(region_from_domain("s3-eu-west-1.amazonaws.com"), "eu-west-1");
        assert_eq!(region_from_domain("s3.us-east-2.amazonaws.com"), "us-east-2");
        assert_eq!(region_from_domain("minio.internal:9000"), "us-east-1");
    }

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            convert_error("k", "AccessDenied: nope"),
            BackupError::StoragePermission(_)
        ));
        assert!(matches!(
            convert_error("k", "connection reset"),
            BackupError::StorageIo(_)
        ));
    }
}
