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

// Cron-driven backup loop

use crate::backup::BackupService;
use crate::collection::DbColl;
use crate::error::{BackupError, Result};
use chrono::Utc;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info};

pub struct CronScheduler {
    backup: Arc<BackupService>,
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(backup: Arc<BackupService>, expr: &str) -> Result<Self> {
        let normalized = normalize_cron(expr);
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| BackupError::Internal(format!("invalid cron expression {expr:?}: {e}")))?;
        Ok(Self { backup, schedule })
    }

    /// Run backups forever on the configured schedule. A failed run is
    /// logged and the loop keeps going; only a schedule with no future
    /// firings (which cron expressions cannot express) ends it.
    pub async fn run(&self, colls: &[DbColl], run_on_startup: bool) -> Result<()> {
        if run_on_startup {
            info!("running startup backup");
            self.run_once(colls).await;
        }

        loop {
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                return Err(BackupError::Internal(
                    "cron schedule has no upcoming firing".to_string(),
                ));
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            info!(next = %next.to_rfc3339(), "next scheduled backup");
            sleep(wait).await;
            self.run_once(colls).await;
        }
    }

    async fn run_once(&self, colls: &[DbColl]) {
        if let Err(e) = self.backup.backup(colls).await {
            error!(error = %e, "scheduled backup failed");
        }
    }
}

/// Accept the conventional five-field crontab form by padding it with a
/// zero seconds field; six- and seven-field expressions pass through.
fn normalize_cron(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_five_field_expression_gains_seconds() {
        assert_eq!(normalize_cron("30 10 * * *"), "0 30 10 * * *");
        let schedule = Schedule::from_str(&normalize_cron("30 10 * * *")).unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(next.minute(), 30);
        assert_eq!(next.hour(), 10);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_six_field_expression_unchanged() {
        assert_eq!(normalize_cron("15 30 10 * * *"), "15 30 10 * * *");
        assert!(Schedule::from_str("15 30 10 * * *").is_ok());
    }

    #[test]
    fn test_invalid_expression_rejected() {
        assert!(Schedule::from_str(&normalize_cron("not a cron")).is_err());
    }
}
