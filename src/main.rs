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

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use mongovault::{
    parse_collections, BackendFactory, BackupService, CronScheduler, FsSettings, HealthService,
    MongoService, MongoSettings, S3Settings, Settings, StatusKeeper, StorageSettings,
};

/// Back up MongoDB collections to S3 or a filesystem, and restore them
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// MongoDB connection string (host:port or full URI)
    #[arg(long, env = "MONGODB", global = true, default_value = "")]
    mongodb: String,

    /// Collections to process, comma separated database/collection pairs
    #[arg(
        long,
        env = "MONGODB_COLLECTIONS",
        global = true,
        default_value = "foo/content,foo/bar"
    )]
    collections: String,

    /// MongoDB connection timeout in seconds
    #[arg(long, env = "MONGO_TIMEOUT", global = true, default_value_t = 60)]
    mongo_timeout: u64,

    /// S3 endpoint domain, e.g. s3-eu-west-1.amazonaws.com
    #[arg(long, env = "S3_DOMAIN", global = true, default_value = "")]
    s3_domain: String,

    /// S3 bucket; when empty the filesystem backend is used
    #[arg(long, env = "S3_BUCKET", global = true, default_value = "")]
    s3_bucket: String,

    /// Key prefix inside the bucket
    #[arg(long, env = "S3_DIR", global = true, default_value = "/backups")]
    s3_base_dir: String,

    #[arg(long, env = "AWS_ACCESS_KEY_ID", global = true, default_value = "", hide_env_values = true)]
    aws_access_key_id: String,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", global = true, default_value = "", hide_env_values = true)]
    aws_secret_access_key: String,

    /// Backup directory for the filesystem backend
    #[arg(long, env = "FS_DIR", global = true, default_value = "/backups")]
    fs_base_dir: String,

    /// Pause between restore batches, in milliseconds
    #[arg(long, env = "RATE_LIMIT", global = true, default_value_t = 250)]
    rate_limit: u64,

    /// Restore batch budget in serialized BSON bytes
    #[arg(long, env = "BATCH_LIMIT", global = true, default_value_t = 15_000_000)]
    batch_limit: usize,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, env = "LOG_LEVEL", global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up the configured collections once
    Backup {
        /// Status ledger path; outcomes are recorded here
        #[arg(long, env = "DBPATH", default_value = "/var/data/mongovault/state.db")]
        db_path: PathBuf,
    },
    /// Restore the configured collections from a dated backup
    Restore {
        /// Backup date directory, e.g. 2026-08-30T10-30-00
        #[arg(long)]
        date: String,
        /// Status ledger path; when given, restore outcomes are recorded
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Run backups on a cron schedule with a health endpoint
    ScheduledBackup {
        /// Cron expression (5 or 6 fields)
        #[arg(long, env = "CRON", default_value = "30 10 * * *")]
        cron: String,
        /// Status ledger path
        #[arg(long, env = "DBPATH", default_value = "/var/data/mongovault/state.db")]
        db_path: PathBuf,
        /// Run a backup immediately on startup
        #[arg(long, env = "RUN", default_value_t = true, action = clap::ArgAction::Set)]
        run: bool,
        /// Freshness window for the health report, in hours
        #[arg(long, env = "HEALTH_HOURS", default_value_t = 24)]
        health_hours: i64,
        /// Health endpoint port
        #[arg(long, env = "HEALTH_PORT", default_value_t = 8080)]
        health_port: u16,
    },
}

impl Cli {
    fn settings(&self) -> Settings {
        let storage = if self.s3_bucket.is_empty() {
            StorageSettings::Fs(FsSettings {
                base_dir: self.fs_base_dir.clone(),
            })
        } else {
            StorageSettings::S3(S3Settings {
                domain: self.s3_domain.clone(),
                bucket: self.s3_bucket.clone(),
                base_dir: self.s3_base_dir.clone(),
                access_key: self.aws_access_key_id.clone(),
                secret_key: self.aws_secret_access_key.clone(),
            })
        };
        Settings {
            mongo: MongoSettings {
                connection_string: self.mongodb.clone(),
                timeout: Duration::from_secs(self.mongo_timeout),
            },
            storage,
            rate_limit: Duration::from_millis(self.rate_limit),
            batch_limit: self.batch_limit,
        }
    }
}

async fn build_service(
    settings: &Settings,
    db_path: Option<&PathBuf>,
) -> Result<(Arc<BackupService>, Option<Arc<StatusKeeper>>)> {
    let storage = Arc::new(BackendFactory::create(&settings.storage).await?);
    let db = Arc::new(MongoService::new(settings.mongo.clone()));
    let status = match db_path {
        Some(path) => Some(Arc::new(StatusKeeper::open(path)?)),
        None => None,
    };
    info!(backend = storage.backend_kind(), "storage backend ready");
    let service = Arc::new(BackupService::new(
        db,
        storage,
        status.clone(),
        settings.rate_limit,
        settings.batch_limit,
    ));
    Ok((service, status))
}

async fn run(cli: Cli) -> Result<()> {
    let settings = cli.settings();
    settings.validate()?;
    let colls = parse_collections(&cli.collections)?;
    info!(
        collections = colls.len(),
        backend = settings.storage.backend_kind(),
        "mongovault starting"
    );

    match cli.command {
        Command::Backup { db_path } => {
            let (service, _status) = build_service(&settings, Some(&db_path)).await?;
            service.backup(&colls).await?;
            info!("backup finished");
        }
        Command::Restore { date, db_path } => {
            let (service, _status) = build_service(&settings, db_path.as_ref()).await?;
            service.restore(&date, &colls).await?;
            info!(%date, "restore finished");
        }
        Command::ScheduledBackup {
            cron,
            db_path,
            run,
            health_hours,
            health_port,
        } => {
            let (service, status) = build_service(&settings, Some(&db_path)).await?;
            let status = status.ok_or_else(|| anyhow!("scheduled backups need a status ledger"))?;
            let health = Arc::new(HealthService::new(status, colls.clone(), health_hours));
            let scheduler = CronScheduler::new(service, &cron)?;

            tokio::select! {
                result = scheduler.run(&colls, run) => result?,
                result = mongovault::health::serve(health_port, health) => result?,
                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal");
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to initialize logging: {e}");
    }

    if let Err(e) = run(cli).await {
        error!(error = %e, "mongovault failed");
        std::process::exit(1);
    }
}
