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

// Snappy block-compression framing over a chunk sink/source.
//
// The plaintext stream is cut into blocks of at most BLOCK_SIZE bytes; each
// block is snappy-compressed and written as `[u32 LE length][block]`. Both
// directions hold at most one block in memory, so arbitrarily large
// collections stream through without unbounded buffering.

use super::backend::{ChunkSink, ChunkSource};
use crate::error::{BackupError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum plaintext bytes per compressed block.
pub(crate) const BLOCK_SIZE: usize = 64 * 1024;

/// Upper bound on a single compressed frame; anything larger is corruption.
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Compressing write stream for one backup object.
///
/// `close` must be called to flush the trailing block and finalize the
/// backend object; an abandoned write must be released with `abort`, which
/// discards the partial object. A writer that is dropped without either
/// leaves an unreadable, truncated object behind. This is a hard
/// requirement of the storage contract, not best effort.
pub struct StorageWriter {
    sink: Box<dyn ChunkSink>,
    encoder: snap::raw::Encoder,
    buf: BytesMut,
}

impl StorageWriter {
    pub(crate) fn new(sink: Box<dyn ChunkSink>) -> Self {
        Self {
            sink,
            encoder: snap::raw::Encoder::new(),
            buf: BytesMut::with_capacity(BLOCK_SIZE),
        }
    }

    /// Append plaintext bytes to the stream, emitting full blocks as they
    /// accumulate.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= BLOCK_SIZE {
            self.flush_block(BLOCK_SIZE).await?;
        }
        Ok(())
    }

    async fn flush_block(&mut self, len: usize) -> Result<()> {
        let block = self.buf.split_to(len);
        let compressed = self
            .encoder
            .compress_vec(&block)
            .map_err(|e| BackupError::StorageIo(format!("snappy compression failed: {e}")))?;
        let mut frame = BytesMut::with_capacity(4 + compressed.len());
        frame.put_u32_le(compressed.len() as u32);
        frame.extend_from_slice(&compressed);
        self.sink.put(frame.freeze()).await
    }

    /// Flush any trailing partial block and finalize the backend object.
    pub async fn close(mut self) -> Result<()> {
        if !self.buf.is_empty() {
            let len = self.buf.len();
            self.flush_block(len).await?;
        }
        self.sink.finish().await
    }

    /// Abandon the stream, discarding the partial backend object.
    pub async fn abort(mut self) -> Result<()> {
        self.buf.clear();
        self.sink.abort().await
    }
}

/// Decompressing read stream for one backup object.
pub struct StorageReader {
    source: Box<dyn ChunkSource>,
    decoder: snap::raw::Decoder,
    compressed: BytesMut,
    plain: BytesMut,
    source_done: bool,
}

impl StorageReader {
    pub(crate) fn new(source: Box<dyn ChunkSource>) -> Self {
        Self {
            source,
            decoder: snap::raw::Decoder::new(),
            compressed: BytesMut::new(),
            plain: BytesMut::new(),
            source_done: false,
        }
    }

    /// Read exactly `n` decompressed bytes.
    ///
    /// Returns `Ok(None)` only at a clean end of stream with zero bytes
    /// pending; a stream that ends mid-read or mid-frame is an error, never
    /// a short read.
    pub async fn read_exact(&mut self, n: usize) -> Result<Option<Bytes>> {
        while self.plain.len() < n {
            if !self.decode_frame().await? {
                if self.plain.is_empty() {
                    return Ok(None);
                }
                return Err(BackupError::Encoding(format!(
                    "backup stream truncated: needed {n} bytes, {} available",
                    self.plain.len()
                )));
            }
        }
        Ok(Some(self.plain.split_to(n).freeze()))
    }

    /// Decode one more frame into the plaintext buffer. Returns false at a
    /// clean end of the compressed stream.
    async fn decode_frame(&mut self) -> Result<bool> {
        if !self.fill_compressed(4).await? {
            if self.compressed.is_empty() {
                return Ok(false);
            }
            return Err(BackupError::Encoding(
                "truncated frame header in compressed stream".to_string(),
            ));
        }
        let mut header = &self.compressed[..4];
        let frame_len = header.get_u32_le() as usize;
        if frame_len == 0 || frame_len > MAX_FRAME_LEN {
            return Err(BackupError::Encoding(format!(
                "implausible compressed frame length {frame_len}"
            )));
        }
        if !self.fill_compressed(4 + frame_len).await? {
            return Err(BackupError::Encoding(
                "truncated frame body in compressed stream".to_string(),
            ));
        }
        self.compressed.advance(4);
        let body = self.compressed.split_to(frame_len);
        let block = self
            .decoder
            .decompress_vec(&body)
            .map_err(|e| BackupError::Encoding(format!("snappy decompression failed: {e}")))?;
        self.plain.extend_from_slice(&block);
        Ok(true)
    }

    /// Pull chunks from the source until `n` compressed bytes are buffered
    /// or the source is exhausted.
    async fn fill_compressed(&mut self, n: usize) -> Result<bool> {
        while self.compressed.len() < n && !self.source_done {
            match self.source.next_chunk().await? {
                Some(chunk) => self.compressed.extend_from_slice(&chunk),
                None => self.source_done = true,
            }
        }
        Ok(self.compressed.len() >= n)
    }
}
