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

// MongoDB driver implementation of the database access traits

use super::{BulkWriter, DbService, DbSession, DocCursor};
use crate::config::MongoSettings;
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use bson::raw::RawDocumentBuf;
use bson::doc;
use bytes::Bytes;
use mongodb::options::ClientOptions;
use mongodb::{Client, Cursor};
use tracing::debug;

/// MongoDB-backed [`DbService`].
pub struct MongoService {
    settings: MongoSettings,
}

impl MongoService {
    pub fn new(settings: MongoSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl DbService for MongoService {
    async fn open_session(&self) -> Result<Box<dyn DbSession>> {
        let uri = self.settings.uri();
        let mut options = ClientOptions::parse(&uri)
            .await
            .map_err(|e| BackupError::Connection(e.to_string()))?;
        options.connect_timeout = Some(self.settings.timeout);
        options.server_selection_timeout = Some(self.settings.timeout);

        let client =
            Client::with_options(options).map_err(|e| BackupError::Connection(e.to_string()))?;

        // The client connects lazily; ping so the dial timeout actually
        // bounds session establishment.
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| BackupError::Connection(e.to_string()))?;

        debug!("mongodb session established");
        Ok(Box::new(MongoSession {
            client: Some(client),
        }))
    }
}

struct MongoSession {
    client: Option<Client>,
}

impl MongoSession {
    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| BackupError::Connection("session already closed".to_string()))
    }
}

#[async_trait]
impl DbSession for MongoSession {
    async fn snapshot_cursor(
        &mut self,
        database: &str,
        collection: &str,
    ) -> Result<Box<dyn DocCursor>> {
        let cursor = self
            .client()?
            .database(database)
            .collection::<RawDocumentBuf>(collection)
            .find(doc! {})
            .await
            .map_err(|e| BackupError::Database(e.to_string()))?;
        Ok(Box::new(MongoCursor { cursor }))
    }

    async fn remove_all(&mut self, database: &str, collection: &str) -> Result<()> {
        self.client()?
            .database(database)
            .collection::<RawDocumentBuf>(collection)
            .delete_many(doc! {})
            .await
            .map_err(|e| BackupError::Database(e.to_string()))?;
        Ok(())
    }

    fn bulk_writer(&self, database: &str, collection: &str) -> Box<dyn BulkWriter> {
        Box::new(MongoBulk {
            client: self.client.clone(),
            database: database.to_string(),
            collection: collection.to_string(),
            docs: Vec::new(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.shutdown().await;
        }
        Ok(())
    }
}

struct MongoCursor {
    cursor: Cursor<RawDocumentBuf>,
}

#[async_trait]
impl DocCursor for MongoCursor {
    async fn next(&mut self) -> Result<Option<Bytes>> {
        match self.cursor.advance().await {
            Ok(true) => Ok(Some(Bytes::copy_from_slice(self.cursor.current().as_bytes()))),
            Ok(false) => Ok(None),
            Err(e) => Err(BackupError::Database(e.to_string())),
        }
    }
}

struct MongoBulk {
    client: Option<Client>,
    database: String,
    collection: String,
    docs: Vec<Bytes>,
}

#[async_trait]
impl BulkWriter for MongoBulk {
    fn insert(&mut self, doc: Bytes) {
        self.docs.push(doc);
    }

    async fn run(&mut self) -> Result<()> {
        if self.docs.is_empty() {
            return Ok(());
        }
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| BackupError::Connection("session already closed".to_string()))?;
        let docs: Vec<RawDocumentBuf> = self
            .docs
            .iter()
            .map(|bytes| {
                RawDocumentBuf::from_bytes(bytes.to_vec())
                    .map_err(|e| BackupError::Encoding(e.to_string()))
            })
            .collect::<Result<_>>()?;
        client
            .database(&self.database)
            .collection::<RawDocumentBuf>(&self.collection)
            .insert_many(docs)
            .await
            .map_err(|e| BackupError::BatchWrite(e.to_string()))?;
        // Buffer intentionally not cleared; callers replace the writer.
        Ok(())
    }
}
