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

// MongoDB collection backup and restore
//
// This tool streams whole collections to snappy-compressed objects in S3
// or on a filesystem, and restores them with byte-budgeted, rate-limited
// bulk writes:
// - One object per collection per run, at {base}/{date}/{db}/{coll}.bson.snappy
// - Point-in-time restore that fully replaces the target collection
// - Outcome ledger backing a health endpoint for scheduled backups
// - Cron-driven daemon mode

pub mod backup;
pub mod collection;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod scheduler;
pub mod status;
pub mod storage;

// Re-export main types
pub use backup::{run_date, BackupService, DATE_FORMAT};
pub use collection::{parse_collections, DbColl};
pub use config::{FsSettings, MongoSettings, S3Settings, Settings, StorageSettings};
pub use db::mongo::MongoService;
pub use error::{BackupError, Result};
pub use health::{HealthReport, HealthService};
pub use scheduler::CronScheduler;
pub use status::{BackupOutcome, StatusKeeper};
pub use storage::{BackendFactory, CompressedStorage};
