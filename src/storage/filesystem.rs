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

// Filesystem backend implementation

use super::backend::{BlobStore, ChunkSink, ChunkSource};
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

const READ_CHUNK: usize = 64 * 1024;

/// Filesystem backend writing backup objects below a base directory.
pub struct FsBackend {
    base_path: PathBuf,
}

impl FsBackend {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        let base_path = base_dir.as_ref().to_path_buf();
        info!(base = %base_path.display(), "initializing filesystem backend");
        Self { base_path }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

#[async_trait]
impl BlobStore for FsBackend {
    async fn create(&self, key: &str) -> Result<Box<dyn ChunkSink>> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BackupError::from_io(&parent.display().to_string(), e))?;
        }
        debug!(path = %path.display(), "creating backup file");
        let file = fs::File::create(&path)
            .await
            .map_err(|e| BackupError::from_io(&path.display().to_string(), e))?;
        Ok(Box::new(FsSink { file, path }))
    }

    async fn open(&self, key: &str) -> Result<Box<dyn ChunkSource>> {
        let path = self.object_path(key);
        let file = fs::File::open(&path)
            .await
            .map_err(|e| BackupError::from_io(&path.display().to_string(), e))?;
        Ok(Box::new(FsSource { file, path }))
    }

    fn kind(&self) -> &str {
        "filesystem"
    }
}

struct FsSink {
    file: fs::File,
    path: PathBuf,
}

#[async_trait]
impl ChunkSink for FsSink {
    async fn put(&mut self, chunk: Bytes) -> Result<()> {
        self.file
            .write_all(&chunk)
            .await
            .map_err(|e| BackupError::from_io(&self.path.display().to_string(), e))
    }

    async fn finish(&mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|e| BackupError::from_io(&self.path.display().to_string(), e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| BackupError::from_io(&self.path.display().to_string(), e))
    }

    async fn abort(&mut self) -> Result<()> {
        debug!(path = %self.path.display(), "removing partial backup file");
        fs::remove_file(&self.path)
            .await
            .map_err(|e| BackupError::from_io(&self.path.display().to_string(), e))
    }
}

struct FsSource {
    file: fs::File,
    path: PathBuf,
}

#[async_trait]
impl ChunkSource for FsSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let mut buf = vec![0u8; READ_CHUNK];
        let n = self
            .file
            .read(&mut buf)
            .await
            .map_err(|e| BackupError::from_io(&self.path.display().to_string(), e))?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }
}
