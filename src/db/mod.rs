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

// Database access layer
//
// Capability traits over the document store, with one MongoDB
// implementation. The orchestrator only ever talks to these traits, which
// keeps it testable against in-memory fakes.

pub mod mongo;

pub use mongo::MongoService;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Entry point to the database: dials a fresh session per collection.
#[async_trait]
pub trait DbService: Send + Sync {
    /// Establish a connection. The attempt is bounded by the configured
    /// connection timeout; failure yields `BackupError::Connection`.
    async fn open_session(&self) -> Result<Box<dyn DbSession>>;
}

/// One established connection, owned by a single collection's processing.
#[async_trait]
pub trait DbSession: Send {
    /// Lazy, forward-only, single-pass cursor over the collection's current
    /// documents. Best-effort consistency at call time; do not reuse after
    /// exhaustion or error.
    async fn snapshot_cursor(
        &mut self,
        database: &str,
        collection: &str,
    ) -> Result<Box<dyn DocCursor>>;

    /// Delete every document in the target collection. Used only as the
    /// destructive first step of a restore, exactly once per collection.
    async fn remove_all(&mut self, database: &str, collection: &str) -> Result<()>;

    /// In-memory accumulator of insert operations for one batch.
    fn bulk_writer(&self, database: &str, collection: &str) -> Box<dyn BulkWriter>;

    /// Tear the connection down. Must be called exactly once.
    async fn close(&mut self) -> Result<()>;
}

/// Forward-only document cursor.
///
/// `Ok(Some(doc))` yields the next raw document, `Ok(None)` is clean
/// exhaustion, and `Err` is a mid-stream failure.
#[async_trait]
pub trait DocCursor: Send {
    async fn next(&mut self) -> Result<Option<Bytes>>;
}

/// Buffer of pending insert operations flushed as one round trip.
///
/// `run` does NOT clear the buffer; after a successful run the caller must
/// discard this writer and request a fresh one from the session.
#[async_trait]
pub trait BulkWriter: Send {
    /// Append an insert operation without performing any I/O.
    fn insert(&mut self, doc: Bytes);

    /// Execute all buffered operations as a single batch.
    async fn run(&mut self) -> Result<()>;
}
