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

// Compressed storage module
//
// Exposes one uniform streaming contract over two physically different
// backends (S3 objects and local files), keyed by (date, database,
// collection). Compression is applied here, never by a backend, so the
// decompressed bytes are identical whichever backend is configured.

pub mod backend;
pub mod factory;
pub mod filesystem;
pub mod s3;
mod snappy;

pub use backend::{BlobStore, ChunkSink, ChunkSource};
pub use factory::BackendFactory;
pub use filesystem::FsBackend;
pub use s3::S3Backend;
pub use snappy::{StorageReader, StorageWriter};

use crate::error::Result;
use tracing::info;

/// Extension carried by every backup object.
pub const EXTENSION: &str = ".bson.snappy";

/// Snappy-compressed, keyed storage over a pluggable blob backend.
pub struct CompressedStorage {
    backend: Box<dyn BlobStore>,
}

impl CompressedStorage {
    pub fn new(backend: Box<dyn BlobStore>) -> Self {
        Self { backend }
    }

    /// Backup object key relative to the backend's base directory:
    /// `{date}/{database}/{collection}.bson.snappy`.
    fn key(date: &str, database: &str, collection: &str) -> String {
        format!("{date}/{database}/{collection}{EXTENSION}")
    }

    /// Open a compressing write stream for one collection's backup.
    ///
    /// The returned writer MUST be closed; see [`StorageWriter::close`].
    pub async fn writer(
        &self,
        date: &str,
        database: &str,
        collection: &str,
    ) -> Result<StorageWriter> {
        let key = Self::key(date, database, collection);
        info!(backend = self.backend.kind(), %key, "saving backup");
        Ok(StorageWriter::new(self.backend.create(&key).await?))
    }

    /// Open a decompressing read stream over one collection's backup.
    pub async fn reader(
        &self,
        date: &str,
        database: &str,
        collection: &str,
    ) -> Result<StorageReader> {
        let key = Self::key(date, database, collection);
        Ok(StorageReader::new(self.backend.open(&key).await?))
    }

    pub fn backend_kind(&self) -> &str {
        self.backend.kind()
    }
}
