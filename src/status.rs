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

// Persistent status ledger for backup outcomes

use crate::collection::DbColl;
use crate::error::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One recorded attempt for one collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupOutcome {
    pub database: String,
    pub collection: String,
    /// RunDate of the attempt (the storage directory it wrote under).
    pub date: String,
    pub success: bool,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl BackupOutcome {
    pub fn new(coll: &DbColl, date: &str, success: bool, error: Option<String>) -> Self {
        Self {
            database: coll.database.clone(),
            collection: coll.collection.clone(),
            date: date.to_string(),
            success,
            error,
            recorded_at: Utc::now(),
        }
    }
}

/// Embedded ledger of the latest (and latest successful) outcome per
/// collection. A single owned handle with explicit open/close, tied to the
/// process lifetime; writers are sequential by construction.
pub struct StatusKeeper {
    db: sled::Db,
}

impl StatusKeeper {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BackupError::Status(format!("{}: {e}", parent.display())))?;
        }
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn latest_key(coll: &DbColl) -> String {
        format!("latest/{}/{}", coll.database, coll.collection)
    }

    fn success_key(coll: &DbColl) -> String {
        format!("success/{}/{}", coll.database, coll.collection)
    }

    /// Persist one outcome, replacing the previous record for the
    /// collection. Successful outcomes are additionally indexed so health
    /// checks can find the last good backup after later failures.
    pub fn record(&self, outcome: &BackupOutcome) -> Result<()> {
        let coll = DbColl::new(&outcome.database, &outcome.collection);
        let value =
            serde_json::to_vec(outcome).map_err(|e| BackupError::Status(e.to_string()))?;
        self.db.insert(Self::latest_key(&coll), value.clone())?;
        if outcome.success {
            self.db.insert(Self::success_key(&coll), value)?;
        }
        self.db.flush()?;
        Ok(())
    }

    pub fn latest(&self, coll: &DbColl) -> Result<Option<BackupOutcome>> {
        self.read(&Self::latest_key(coll))
    }

    pub fn latest_success(&self, coll: &DbColl) -> Result<Option<BackupOutcome>> {
        self.read(&Self::success_key(coll))
    }

    fn read(&self, key: &str) -> Result<Option<BackupOutcome>> {
        match self.db.get(key)? {
            Some(value) => {
                let outcome = serde_json::from_slice(&value)
                    .map_err(|e| BackupError::Status(e.to_string()))?;
                Ok(Some(outcome))
            }
            None => Ok(None),
        }
    }

    pub fn close(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
