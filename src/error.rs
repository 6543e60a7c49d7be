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

// Error taxonomy for the backup/restore pipeline

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Debug, Error)]
pub enum BackupError {
    /// Dial or authentication failure against MongoDB.
    #[error("failed to connect to mongodb: {0}")]
    Connection(String),

    /// Malformed configuration input, e.g. a `database/collection` spec
    /// without exactly one separator.
    #[error("{0}")]
    Parse(String),

    /// The requested backup object does not exist in the storage backend.
    #[error("backup object not found: {0}")]
    NotFound(String),

    /// Storage backend I/O failure (read, write or finalize).
    #[error("storage i/o error: {0}")]
    StorageIo(String),

    /// The storage backend rejected the operation for lack of permissions.
    #[error("storage permission denied: {0}")]
    StoragePermission(String),

    /// Malformed document bytes encountered while decoding a backup stream.
    #[error("malformed document: {0}")]
    Encoding(String),

    /// A bulk insert batch was rejected by the destination collection.
    #[error("bulk write failed: {0}")]
    BatchWrite(String),

    /// Query or cursor failure against an established session.
    #[error("database operation failed: {0}")]
    Database(String),

    /// Status ledger read/write failure.
    #[error("status ledger error: {0}")]
    Status(String),

    /// Failure in the surrounding plumbing: health endpoint binding,
    /// scheduler parsing, signal handling.
    #[error("{0}")]
    Internal(String),

    /// Aggregate failure of a multi-collection invocation. Individual
    /// collection errors were already recorded and logged; this names the
    /// collections that failed so the caller can exit non-zero.
    #[error("{context} failed for collections [{}]", .collections.join(", "))]
    Failures {
        context: &'static str,
        collections: Vec<String>,
    },
}

impl BackupError {
    /// Map a filesystem error onto the storage taxonomy, keeping the
    /// offending path in the message.
    pub fn from_io(path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => BackupError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                BackupError::StoragePermission(format!("{path}: {err}"))
            }
            _ => BackupError::StorageIo(format!("{path}: {err}")),
        }
    }
}

impl From<sled::Error> for BackupError {
    fn from(err: sled::Error) -> Self {
        BackupError::Status(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            BackupError::from_io("/backups/x", not_found),
            BackupError::NotFound(_)
        ));

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            BackupError::from_io("/backups/x", denied),
            BackupError::StoragePermission(_)
        ));

        let other = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(
            BackupError::from_io("/backups/x", other),
            BackupError::StorageIo(_)
        ));
    }

    #[test]
    fn test_failures_display_names_collections() {
        let err = BackupError::Failures {
            context: "backup",
            collections: vec!["foo/content".to_string(), "foo/bar".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "backup failed for collections [foo/content, foo/bar]"
        );
    }
}
