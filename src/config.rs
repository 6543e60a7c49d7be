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

// Runtime settings assembled from CLI flags / environment variables

use crate::error::{BackupError, Result};
use std::time::Duration;

/// Mongo connection settings.
#[derive(Debug, Clone)]
pub struct MongoSettings {
    /// Connection string; a bare `host:port` is accepted and gets the
    /// `mongodb://` scheme prepended.
    pub connection_string: String,
    /// Bound on the initial connection attempt only.
    pub timeout: Duration,
}

impl MongoSettings {
    /// Connection string with a scheme the driver accepts.
    pub fn uri(&self) -> String {
        if self.connection_string.contains("://") {
            self.connection_string.clone()
        } else {
            format!("mongodb://{}", self.connection_string)
        }
    }
}

/// S3 backend settings.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub domain: String,
    pub bucket: String,
    pub base_dir: String,
    pub access_key: String,
    pub secret_key: String,
}

/// Filesystem backend settings.
#[derive(Debug, Clone)]
pub struct FsSettings {
    pub base_dir: String,
}

/// Storage backend selection: S3 when a bucket is configured, filesystem
/// otherwise.
#[derive(Debug, Clone)]
pub enum StorageSettings {
    S3(S3Settings),
    Fs(FsSettings),
}

impl StorageSettings {
    pub fn backend_kind(&self) -> &str {
        match self {
            StorageSettings::S3(_) => "s3",
            StorageSettings::Fs(_) => "filesystem",
        }
    }
}

/// Everything the pipeline needs, validated once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mongo: MongoSettings,
    pub storage: StorageSettings,
    /// Pause between restore batches.
    pub rate_limit: Duration,
    /// Cumulative serialized-byte budget per restore batch.
    pub batch_limit: usize,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.mongo.connection_string.is_empty() {
            return Err(BackupError::Parse(
                "mongodb connection string cannot be empty".to_string(),
            ));
        }
        if self.batch_limit == 0 {
            return Err(BackupError::Parse("batch-limit must be > 0".to_string()));
        }
        if let StorageSettings::S3(s3) = &self.storage {
            if s3.domain.is_empty() {
                return Err(BackupError::Parse("s3-domain cannot be empty".to_string()));
            }
            if s3.access_key.is_empty() || s3.secret_key.is_empty() {
                return Err(BackupError::Parse(
                    "aws access key id and secret access key are required for the s3 backend"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}
