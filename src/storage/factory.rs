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

// Backend factory for creating storage from configuration

use super::filesystem::FsBackend;
use super::s3::S3Backend;
use super::CompressedStorage;
use crate::config::StorageSettings;
use crate::error::Result;

pub struct BackendFactory;

impl BackendFactory {
    /// Create compressed storage over the configured backend.
    pub async fn create(settings: &StorageSettings) -> Result<CompressedStorage> {
        match settings {
            StorageSettings::S3(s3) => {
                let backend = S3Backend::new(s3).await?;
                Ok(CompressedStorage::new(Box::new(backend)))
            }
            StorageSettings::Fs(fs) => {
                let backend = FsBackend::new(&fs.base_dir);
                Ok(CompressedStorage::new(Box::new(backend)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsSettings;

    #[tokio::test]
    async fn test_create_filesystem_storage() {
        let settings = StorageSettings::Fs(FsSettings {
            base_dir: "/tmp/backups".to_string(),
        });
        let storage = BackendFactory::create(&settings).await.unwrap();
        assert_eq!(storage.backend_kind(), "filesystem");
    }
}
