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

// Backup/restore orchestration
//
// Moves documents between the database access layer and compressed storage,
// one collection at a time. Failures are isolated per collection: every
// collection in an invocation is attempted, and the invocation as a whole
// fails if any of them did.

use crate::collection::DbColl;
use crate::db::{DbService, DbSession};
use crate::error::{BackupError, Result};
use crate::status::{BackupOutcome, StatusKeeper};
use crate::storage::{CompressedStorage, StorageReader};
use bson::RawDocument;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Second-precision timestamp format naming one backup run's directory.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// A BSON document is at least length prefix + trailing null.
const MIN_DOCUMENT_LEN: usize = 5;
/// MongoDB's 16 MiB document cap, with slack for internal padding.
const MAX_DOCUMENT_LEN: usize = 16 * 1024 * 1024 + 16 * 1024;

/// Compute the RunDate for a backup invocation.
pub fn run_date() -> String {
    Utc::now().format(DATE_FORMAT).to_string()
}

/// Orchestrates backup and restore over the database and storage layers.
pub struct BackupService {
    db: Arc<dyn DbService>,
    storage: Arc<CompressedStorage>,
    /// Outcomes are recorded here when present, for both backups and
    /// restores; one-shot restores typically run without a ledger.
    status: Option<Arc<StatusKeeper>>,
    rate_limit: Duration,
    batch_limit: usize,
}

impl BackupService {
    pub fn new(
        db: Arc<dyn DbService>,
        storage: Arc<CompressedStorage>,
        status: Option<Arc<StatusKeeper>>,
        rate_limit: Duration,
        batch_limit: usize,
    ) -> Self {
        Self {
            db,
            storage,
            status,
            rate_limit,
            batch_limit,
        }
    }

    /// Back up every collection, in input order, under one RunDate.
    pub async fn backup(&self, colls: &[DbColl]) -> Result<()> {
        let date = run_date();
        info!(%date, collections = colls.len(), "starting backup run");

        let mut failed = Vec::new();
        for coll in colls {
            let result = self.backup_collection(&date, coll).await;
            match &result {
                Ok(()) => info!(collection = %coll, %date, "collection backed up"),
                Err(e) => {
                    error!(collection = %coll, %date, error = %e, "collection backup failed")
                }
            }
            self.record_outcome(coll, &date, &result);
            if result.is_err() {
                failed.push(coll.to_string());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(BackupError::Failures {
                context: "backup",
                collections: failed,
            })
        }
    }

    /// Restore every collection from the given RunDate directory, in input
    /// order. Each restore is a full replace of the target collection.
    pub async fn restore(&self, date: &str, colls: &[DbColl]) -> Result<()> {
        info!(%date, collections = colls.len(), "starting restore run");

        let mut failed = Vec::new();
        for coll in colls {
            let result = self.restore_collection(date, coll).await;
            match &result {
                Ok(()) => info!(collection = %coll, %date, "collection restored"),
                Err(e) => {
                    error!(collection = %coll, %date, error = %e, "collection restore failed")
                }
            }
            self.record_outcome(coll, date, &result);
            if result.is_err() {
                failed.push(coll.to_string());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(BackupError::Failures {
                context: "restore",
                collections: failed,
            })
        }
    }

    async fn backup_collection(&self, date: &str, coll: &DbColl) -> Result<()> {
        let mut session = self.db.open_session().await?;
        let result = self.dump_collection(session.as_mut(), date, coll).await;
        self.close_session(session, coll, result).await
    }

    async fn dump_collection(
        &self,
        session: &mut dyn DbSession,
        date: &str,
        coll: &DbColl,
    ) -> Result<()> {
        let mut cursor = session
            .snapshot_cursor(&coll.database, &coll.collection)
            .await?;
        let mut writer = self
            .storage
            .writer(date, &coll.database, &coll.collection)
            .await?;

        let mut documents = 0u64;
        let mut bytes = 0u64;
        let copied: Result<()> = async {
            while let Some(doc) = cursor.next().await? {
                writer.write_all(&doc).await?;
                documents += 1;
                bytes += doc.len() as u64;
            }
            Ok(())
        }
        .await;

        if let Err(e) = copied {
            // Discard the partial object so a failed dump does not leave
            // a truncated file or an open multipart upload behind.
            if let Err(abort_err) = writer.abort().await {
                warn!(collection = %coll, error = %abort_err, "failed to discard partial backup");
            }
            return Err(e);
        }
        writer.close().await?;

        debug!(collection = %coll, documents, bytes, "collection dumped");
        Ok(())
    }

    async fn restore_collection(&self, date: &str, coll: &DbColl) -> Result<()> {
        // Open the backup object before touching the target collection: a
        // missing object must leave existing data intact.
        let mut reader = self
            .storage
            .reader(date, &coll.database, &coll.collection)
            .await?;
        let mut session = self.db.open_session().await?;
        let result = self
            .load_collection(session.as_mut(), &mut reader, coll)
            .await;
        self.close_session(session, coll, result).await
    }

    async fn load_collection(
        &self,
        session: &mut dyn DbSession,
        reader: &mut StorageReader,
        coll: &DbColl,
    ) -> Result<()> {
        // Full replace, exactly once per collection per restore.
        session.remove_all(&coll.database, &coll.collection).await?;

        let mut bulk = session.bulk_writer(&coll.database, &coll.collection);
        let mut batch_bytes = 0usize;
        let mut documents = 0u64;
        let mut batches = 0u64;
        let mut pending_pause = false;

        while let Some(doc) = read_document(reader).await? {
            // Throttle the destination between batches; the pause is taken
            // only once more data has shown up, so the final flush of a
            // collection never pays it.
            if pending_pause {
                sleep(self.rate_limit).await;
                pending_pause = false;
            }
            batch_bytes += doc.len();
            bulk.insert(doc);
            documents += 1;

            if batch_bytes >= self.batch_limit {
                bulk.run().await?;
                // run() leaves its buffer in place; start a fresh writer.
                bulk = session.bulk_writer(&coll.database, &coll.collection);
                batch_bytes = 0;
                batches += 1;
                pending_pause = true;
            }
        }

        if batch_bytes > 0 {
            // Trailing remainder, no pause after it.
            bulk.run().await?;
            batches += 1;
        }

        debug!(collection = %coll, documents, batches, "collection loaded");
        Ok(())
    }

    /// Close the session, surfacing close failures without masking an
    /// earlier, more specific error.
    async fn close_session(
        &self,
        mut session: Box<dyn DbSession>,
        coll: &DbColl,
        result: Result<()>,
    ) -> Result<()> {
        if let Err(close_err) = session.close().await {
            if result.is_ok() {
                return Err(close_err);
            }
            warn!(collection = %coll, error = %close_err, "failed to close session");
        }
        result
    }

    fn record_outcome(&self, coll: &DbColl, date: &str, result: &Result<()>) {
        let Some(status) = &self.status else {
            return;
        };
        let outcome = BackupOutcome::new(
            coll,
            date,
            result.is_ok(),
            result.as_ref().err().map(|e| e.to_string()),
        );
        if let Err(e) = status.record(&outcome) {
            warn!(collection = %coll, error = %e, "failed to record outcome");
        }
    }
}

/// Decode one self-delimiting BSON document from the decompressed stream.
///
/// Returns `Ok(None)` at a clean end of stream; a stream that ends inside a
/// document, or bytes that fail BSON validation, abort the collection with
/// an encoding error.
async fn read_document(reader: &mut StorageReader) -> Result<Option<Bytes>> {
    let Some(header) = reader.read_exact(4).await? else {
        return Ok(None);
    };
    let declared = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let total = usize::try_from(declared)
        .map_err(|_| BackupError::Encoding(format!("negative document length {declared}")))?;
    if !(MIN_DOCUMENT_LEN..=MAX_DOCUMENT_LEN).contains(&total) {
        return Err(BackupError::Encoding(format!(
            "document length {total} out of range"
        )));
    }

    let body = reader
        .read_exact(total - 4)
        .await?
        .ok_or_else(|| BackupError::Encoding("stream ended inside a document".to_string()))?;

    let mut doc = BytesMut::with_capacity(total);
    doc.extend_from_slice(&header);
    doc.extend_from_slice(&body);
    let doc = doc.freeze();

    RawDocument::from_bytes(&doc)
        .map_err(|e| BackupError::Encoding(format!("invalid bson document: {e}")))?;
    Ok(Some(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BulkWriter, DocCursor};
    use crate::storage::FsBackend;
    use async_trait::async_trait;
    use bson::rawdoc;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::time::Instant;

    /// Shared fake document store standing in for a mongo deployment.
    #[derive(Default)]
    struct FakeStore {
        collections: Mutex<HashMap<String, Vec<Vec<u8>>>>,
        remove_calls: Mutex<Vec<String>>,
        /// Byte size of each executed batch, in order.
        batch_bytes: Mutex<Vec<usize>>,
        flush_times: Mutex<Vec<Instant>>,
        /// Collections whose snapshot cursor fails immediately.
        fail_cursor_for: Mutex<HashSet<String>>,
        /// Collections whose cursor dies after yielding its documents.
        fail_cursor_midway: Mutex<HashSet<String>>,
        sessions_closed: Mutex<usize>,
    }

    impl FakeStore {
        fn seed(&self, coll: &DbColl, docs: Vec<Vec<u8>>) {
            self.collections
                .lock()
                .unwrap()
                .insert(coll.to_string(), docs);
        }

        fn contents(&self, coll: &DbColl) -> Vec<Vec<u8>> {
            self.collections
                .lock()
                .unwrap()
                .get(&coll.to_string())
                .cloned()
                .unwrap_or_default()
        }
    }

    struct FakeDb(Arc<FakeStore>);

    #[async_trait]
    impl DbService for FakeDb {
        async fn open_session(&self) -> Result<Box<dyn DbSession>> {
            Ok(Box::new(FakeSession(self.0.clone())))
        }
    }

    struct FakeSession(Arc<FakeStore>);

    #[async_trait]
    impl DbSession for FakeSession {
        async fn snapshot_cursor(
            &mut self,
            database: &str,
            collection: &str,
        ) -> Result<Box<dyn DocCursor>> {
            let key = format!("{database}/{collection}");
            if self.0.fail_cursor_for.lock().unwrap().contains(&key) {
                return Err(BackupError::Database(format!("{key} unreachable")));
            }
            let docs: VecDeque<Vec<u8>> = self
                .0
                .collections
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .unwrap_or_default()
                .into();
            let fail_at_end = self.0.fail_cursor_midway.lock().unwrap().contains(&key);
            Ok(Box::new(FakeCursor { docs, fail_at_end }))
        }

        async fn remove_all(&mut self, database: &str, collection: &str) -> Result<()> {
            let key = format!("{database}/{collection}");
            self.0.remove_calls.lock().unwrap().push(key.clone());
            self.0.collections.lock().unwrap().remove(&key);
            Ok(())
        }

        fn bulk_writer(&self, database: &str, collection: &str) -> Box<dyn BulkWriter> {
            Box::new(FakeBulk {
                store: self.0.clone(),
                key: format!("{database}/{collection}"),
                docs: Vec::new(),
            })
        }

        async fn close(&mut self) -> Result<()> {
            *self.0.sessions_closed.lock().unwrap() += 1;
            Ok(())
        }
    }

    struct FakeCursor {
        docs: VecDeque<Vec<u8>>,
        fail_at_end: bool,
    }

    #[async_trait]
    impl DocCursor for FakeCursor {
        async fn next(&mut self) -> Result<Option<Bytes>> {
            match self.docs.pop_front() {
                Some(doc) => Ok(Some(Bytes::from(doc))),
                None if self.fail_at_end => {
                    Err(BackupError::Database("cursor timed out".to_string()))
                }
                None => Ok(None),
            }
        }
    }

    struct FakeBulk {
        store: Arc<FakeStore>,
        key: String,
        docs: Vec<Bytes>,
    }

    #[async_trait]
    impl BulkWriter for FakeBulk {
        fn insert(&mut self, doc: Bytes) {
            self.docs.push(doc);
        }

        async fn run(&mut self) -> Result<()> {
            self.store
                .batch_bytes
                .lock()
                .unwrap()
                .push(self.docs.iter().map(|d| d.len()).sum());
            self.store.flush_times.lock().unwrap().push(Instant::now());
            let mut collections = self.store.collections.lock().unwrap();
            let entry = collections.entry(self.key.clone()).or_default();
            entry.extend(self.docs.iter().map(|d| d.to_vec()));
            Ok(())
        }
    }

    fn doc_of_size(id: i32, payload_len: usize) -> Vec<u8> {
        rawdoc! { "_id": id, "payload": "x".repeat(payload_len) }
            .as_bytes()
            .to_vec()
    }

    fn service(
        store: &Arc<FakeStore>,
        tmp: &TempDir,
        rate_limit: Duration,
        batch_limit: usize,
    ) -> BackupService {
        let storage = Arc::new(CompressedStorage::new(Box::new(FsBackend::new(tmp.path()))));
        BackupService::new(
            Arc::new(FakeDb(store.clone())),
            storage,
            None,
            rate_limit,
            batch_limit,
        )
    }

    #[tokio::test]
    async fn test_backup_restore_round_trip() {
        let store = Arc::new(FakeStore::default());
        let tmp = TempDir::new().unwrap();
        let svc = service(&store, &tmp, Duration::ZERO, 15_000_000);

        let content = DbColl::new("foo", "content");
        let bar = DbColl::new("foo", "bar");
        let content_docs: Vec<Vec<u8>> = (0..25).map(|i| doc_of_size(i, 40)).collect();
        let bar_docs: Vec<Vec<u8>> = (0..3).map(|i| doc_of_size(i, 10)).collect();
        store.seed(&content, content_docs.clone());
        store.seed(&bar, bar_docs.clone());

        svc.backup(&[content.clone(), bar.clone()]).await.unwrap();

        // Mutate the live data, then restore the snapshot over it.
        store.seed(&content, vec![doc_of_size(99, 1)]);
        store.seed(&bar, Vec::new());
        let date = latest_date(&tmp);
        svc.restore(&date, &[content.clone(), bar.clone()])
            .await
            .unwrap();

        assert_eq!(store.contents(&content), content_docs);
        assert_eq!(store.contents(&bar), bar_docs);
        assert_eq!(
            store.remove_calls.lock().unwrap().as_slice(),
            ["foo/content", "foo/bar"]
        );
        // Two backups + two restores, one session each, all closed.
        assert_eq!(*store.sessions_closed.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_empty_collection_round_trip() {
        let store = Arc::new(FakeStore::default());
        let tmp = TempDir::new().unwrap();
        let svc = service(&store, &tmp, Duration::ZERO, 1_000);

        let coll = DbColl::new("foo", "empty");
        store.seed(&coll, Vec::new());

        svc.backup(&[coll.clone()]).await.unwrap();
        let date = latest_date(&tmp);
        svc.restore(&date, &[coll.clone()]).await.unwrap();

        assert!(store.contents(&coll).is_empty());
        assert!(store.batch_bytes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_budget_bounds_every_flush() {
        let store = Arc::new(FakeStore::default());
        let tmp = TempDir::new().unwrap();

        let docs: Vec<Vec<u8>> = (0..20).map(|i| doc_of_size(i, 100)).collect();
        let doc_len = docs[0].len();
        let budget = doc_len * 3; // three documents per full batch
        let svc = service(&store, &tmp, Duration::ZERO, budget);

        let coll = DbColl::new("foo", "batched");
        store.seed(&coll, docs.clone());
        svc.backup(&[coll.clone()]).await.unwrap();
        let date = latest_date(&tmp);
        svc.restore(&date, &[coll.clone()]).await.unwrap();

        let batches = store.batch_bytes.lock().unwrap().clone();
        // 20 docs at 3 per batch: 6 full batches and a remainder of 2.
        assert_eq!(batches.len(), 7);
        for bytes in &batches[..6] {
            assert!(*bytes >= budget);
            assert!(*bytes < budget + doc_len);
        }
        assert!(batches[6] < budget);
        assert_eq!(store.contents(&coll), docs);
    }

    #[tokio::test]
    async fn test_no_flush_below_budget() {
        let store = Arc::new(FakeStore::default());
        let tmp = TempDir::new().unwrap();
        let svc = service(&store, &tmp, Duration::ZERO, 1_000_000);

        let coll = DbColl::new("foo", "small");
        let docs: Vec<Vec<u8>> = (0..10).map(|i| doc_of_size(i, 50)).collect();
        store.seed(&coll, docs.clone());

        svc.backup(&[coll.clone()]).await.unwrap();
        let date = latest_date(&tmp);
        svc.restore(&date, &[coll.clone()]).await.unwrap();

        // Everything fits under the budget: exactly one trailing flush.
        assert_eq!(store.batch_bytes.lock().unwrap().len(), 1);
        assert_eq!(store.contents(&coll), docs);
    }

    #[tokio::test]
    async fn test_rate_limit_spaces_batches() {
        let store = Arc::new(FakeStore::default());
        let tmp = TempDir::new().unwrap();

        let docs: Vec<Vec<u8>> = (0..3).map(|i| doc_of_size(i, 64)).collect();
        // Budget of one byte: every document forces its own batch.
        let rate = Duration::from_millis(40);
        let svc = service(&store, &tmp, rate, 1);

        let coll = DbColl::new("foo", "throttled");
        store.seed(&coll, docs);
        svc.backup(&[coll.clone()]).await.unwrap();
        let date = latest_date(&tmp);
        svc.restore(&date, &[coll.clone()]).await.unwrap();

        let times = store.flush_times.lock().unwrap().clone();
        assert_eq!(times.len(), 3);
        let elapsed = times[times.len() - 1] - times[0];
        assert!(
            elapsed >= rate * 2,
            "batches flushed {elapsed:?} apart, expected at least {:?}",
            rate * 2
        );
    }

    #[tokio::test]
    async fn test_no_pause_after_final_flush() {
        let store = Arc::new(FakeStore::default());
        let tmp = TempDir::new().unwrap();

        // A one-byte budget makes the single document's flush
        // budget-triggered, and it is also the last flush.
        let rate = Duration::from_secs(2);
        let svc = service(&store, &tmp, rate, 1);

        let coll = DbColl::new("foo", "single");
        store.seed(&coll, vec![doc_of_size(1, 64)]);
        svc.backup(&[coll.clone()]).await.unwrap();
        let date = latest_date(&tmp);

        let start = Instant::now();
        svc.restore(&date, &[coll.clone()]).await.unwrap();
        assert!(
            start.elapsed() < rate,
            "restore paused {:?} after its final flush",
            start.elapsed()
        );
        assert_eq!(store.batch_bytes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_dump_discards_the_partial_object() {
        let store = Arc::new(FakeStore::default());
        let tmp = TempDir::new().unwrap();
        let svc = service(&store, &tmp, Duration::ZERO, 15_000_000);

        let coll = DbColl::new("foo", "content");
        store.seed(&coll, vec![doc_of_size(1, 100_000)]);
        store
            .fail_cursor_midway
            .lock()
            .unwrap()
            .insert(coll.to_string());

        let err = svc.backup(&[coll.clone()]).await.unwrap_err();
        assert!(matches!(err, BackupError::Failures { .. }));

        // The half-written object was removed, not left truncated.
        let date = latest_date(&tmp);
        let path = tmp
            .path()
            .join(date)
            .join("foo")
            .join("content.bson.snappy");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_backup_failure_is_isolated() {
        let store = Arc::new(FakeStore::default());
        let tmp = TempDir::new().unwrap();
        let status_dir = TempDir::new().unwrap();
        let status =
            Arc::new(StatusKeeper::open(status_dir.path().join("state.db")).unwrap());

        let storage = Arc::new(CompressedStorage::new(Box::new(FsBackend::new(tmp.path()))));
        let svc = BackupService::new(
            Arc::new(FakeDb(store.clone())),
            storage,
            Some(status.clone()),
            Duration::ZERO,
            15_000_000,
        );

        let broken = DbColl::new("foo", "content");
        let healthy = DbColl::new("foo", "bar");
        store.seed(&healthy, vec![doc_of_size(1, 10)]);
        store
            .fail_cursor_for
            .lock()
            .unwrap()
            .insert(broken.to_string());

        let err = svc
            .backup(&[broken.clone(), healthy.clone()])
            .await
            .unwrap_err();
        match err {
            BackupError::Failures {
                context,
                collections,
            } => {
                assert_eq!(context, "backup");
                assert_eq!(collections, vec!["foo/content".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }

        // The healthy sibling was still attempted and recorded as a success.
        assert!(status.latest_success(&healthy).unwrap().is_some());
        let recorded = status.latest(&broken).unwrap().unwrap();
        assert!(!recorded.success);
        assert!(recorded.error.is_some());
        // Both sessions were released despite the failure.
        assert_eq!(*store.sessions_closed.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_restore_missing_object_leaves_data_untouched() {
        let store = Arc::new(FakeStore::default());
        let tmp = TempDir::new().unwrap();
        let svc = service(&store, &tmp, Duration::ZERO, 15_000_000);

        let present = DbColl::new("foo", "bar");
        let missing = DbColl::new("foo", "content");
        let existing = vec![doc_of_size(7, 10)];
        store.seed(&present, vec![doc_of_size(1, 10)]);
        store.seed(&missing, existing.clone());

        // Only `present` gets a backup object.
        svc.backup(&[present.clone()]).await.unwrap();
        let date = latest_date(&tmp);

        let err = svc
            .restore(&date, &[missing.clone(), present.clone()])
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Failures { .. }));

        // No destructive clear happened for the missing collection, and the
        // sibling was still restored.
        assert_eq!(
            store.remove_calls.lock().unwrap().as_slice(),
            ["foo/bar"]
        );
        assert_eq!(store.contents(&missing), existing);
    }

    #[tokio::test]
    async fn test_restore_rejects_corrupt_documents() {
        let store = Arc::new(FakeStore::default());
        let tmp = TempDir::new().unwrap();
        let svc = service(&store, &tmp, Duration::ZERO, 15_000_000);

        let coll = DbColl::new("foo", "corrupt");
        // A validly compressed object whose payload is not BSON.
        let storage = CompressedStorage::new(Box::new(FsBackend::new(tmp.path())));
        let mut writer = storage.writer("baddate", "foo", "corrupt").await.unwrap();
        writer.write_all(&[0xde, 0xad, 0xbe, 0xef, 0x00]).await.unwrap();
        writer.close().await.unwrap();

        let err = svc.restore("baddate", &[coll]).await.unwrap_err();
        assert!(matches!(err, BackupError::Failures { .. }));
    }

    /// The single dated directory a test backup wrote under.
    fn latest_date(tmp: &TempDir) -> String {
        let mut dates: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        dates.sort();
        dates.pop().unwrap()
    }
}
