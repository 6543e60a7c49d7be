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

// Blob store trait for storage backends

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// A storage backend that moves opaque byte chunks under string keys.
///
/// Backends never see plaintext: compression framing is applied above this
/// trait by [`CompressedStorage`](super::CompressedStorage), so swapping
/// backends never changes what bytes look like after decompression.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Open a sequential, append-only sink for the object at `key`,
    /// creating any intermediate structure (directories, multipart upload)
    /// the backend needs.
    async fn create(&self, key: &str) -> Result<Box<dyn ChunkSink>>;

    /// Open a sequential source over the object at `key`. Fails with
    /// `NotFound` if no such object exists.
    async fn open(&self, key: &str) -> Result<Box<dyn ChunkSource>>;

    /// Backend type identifier for logging.
    fn kind(&self) -> &str;
}

/// Sequential chunk sink. The object is not valid until `finish` returns.
#[async_trait]
pub trait ChunkSink: Send {
    async fn put(&mut self, chunk: Bytes) -> Result<()>;

    /// Finalize the backend object. A sink that is dropped without a
    /// successful `finish` leaves an invalid or absent object behind.
    async fn finish(&mut self) -> Result<()>;

    /// Discard the partially written object, releasing whatever the
    /// backend allocated for it (temp files, multipart uploads). Called
    /// instead of `finish` when the write is abandoned.
    async fn abort(&mut self) -> Result<()>;
}

/// Sequential chunk source. Chunk boundaries carry no meaning; callers must
/// reassemble. `Ok(None)` signals a clean end of object.
#[async_trait]
pub trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}
