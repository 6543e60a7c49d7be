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

// Health endpoint for the scheduled-backup daemon
//
// A collection is healthy when its most recent recorded backup succeeded
// and is younger than the freshness window. `/__health` reports every
// watched collection; `/__gtg` collapses the report into a 200/503 for
// load balancers.

use crate::collection::DbColl;
use crate::error::{BackupError, Result};
use crate::status::StatusKeeper;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct CollectionHealth {
    pub database: String,
    pub collection: String,
    pub healthy: bool,
    /// Human-readable reason when unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub checks: Vec<CollectionHealth>,
}

pub struct HealthService {
    status: Arc<StatusKeeper>,
    colls: Vec<DbColl>,
    window: ChronoDuration,
}

impl HealthService {
    pub fn new(status: Arc<StatusKeeper>, colls: Vec<DbColl>, window_hours: i64) -> Self {
        Self {
            status,
            colls,
            window: ChronoDuration::hours(window_hours),
        }
    }

    pub fn report(&self) -> HealthReport {
        let cutoff = Utc::now() - self.window;
        let checks: Vec<CollectionHealth> = self
            .colls
            .iter()
            .map(|coll| {
                let mut check = CollectionHealth {
                    database: coll.database.clone(),
                    collection: coll.collection.clone(),
                    healthy: false,
                    detail: None,
                    last_backup: None,
                };
                // Freshness is judged on the last *successful* backup, so
                // a failed attempt after a fresh success does not flip the
                // collection unhealthy. The latest attempt only feeds the
                // detail field.
                match self.status.latest_success(coll) {
                    Ok(Some(outcome)) => {
                        check.last_backup = Some(outcome.recorded_at.to_rfc3339());
                        if outcome.recorded_at < cutoff {
                            check.detail = Some(format!(
                                "last successful backup at {} is older than {}h",
                                outcome.recorded_at.to_rfc3339(),
                                self.window.num_hours()
                            ));
                        } else {
                            check.healthy = true;
                            check.detail = self.latest_failure(coll);
                        }
                    }
                    Ok(None) => {
                        check.detail = Some(
                            self.latest_failure(coll)
                                .unwrap_or_else(|| "no backup recorded yet".to_string()),
                        );
                    }
                    Err(e) => {
                        warn!(collection = %coll, error = %e, "status lookup failed");
                        check.detail = Some(format!("status lookup failed: {e}"));
                    }
                }
                check
            })
            .collect();

        HealthReport {
            healthy: checks.iter().all(|c| c.healthy),
            checks,
        }
    }

    /// Error text of the most recent attempt when that attempt failed.
    fn latest_failure(&self, coll: &DbColl) -> Option<String> {
        match self.status.latest(coll) {
            Ok(Some(outcome)) if !outcome.success => Some(
                outcome
                    .error
                    .unwrap_or_else(|| "last backup failed".to_string()),
            ),
            _ => None,
        }
    }
}

// Always 200 with the full report; `/__gtg` is the pass/fail probe.
async fn health_handler(State(health): State<Arc<HealthService>>) -> impl IntoResponse {
    Json(health.report())
}

async fn gtg_handler(State(health): State<Arc<HealthService>>) -> StatusCode {
    if health.report().healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub fn router(health: Arc<HealthService>) -> Router {
    Router::new()
        .route("/__health", get(health_handler))
        .route("/__gtg", get(gtg_handler))
        .with_state(health)
}

/// Bind and serve the health endpoints until the process exits.
pub async fn serve(port: u16, health: Arc<HealthService>) -> Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BackupError::Internal(format!("failed to bind {addr}: {e}")))?;
    info!(%addr, "health endpoint listening");
    axum::serve(listener, router(health))
        .await
        .map_err(|e| BackupError::Internal(format!("health server failed: {e}")))
}
