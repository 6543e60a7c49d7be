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

// Collection specification parsing

use crate::error::{BackupError, Result};
use std::fmt;

/// One logical collection, the unit of backup/restore granularity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbColl {
    pub database: String,
    pub collection: String,
}

impl DbColl {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for DbColl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database, self.collection)
    }
}

/// Parse a comma-separated `database/collection` list.
///
/// Every entry must contain exactly one `/`; anything else fails the whole
/// parse before any backend work begins.
pub fn parse_collections(spec: &str) -> Result<Vec<DbColl>> {
    let mut colls = Vec::new();
    for entry in spec.split(',') {
        let parts: Vec<&str> = entry.split('/').collect();
        if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(BackupError::Parse(format!(
                "failed to parse collections parameter: {spec}"
            )));
        }
        colls.push(DbColl::new(parts[0], parts[1]));
    }
    Ok(colls)
}
