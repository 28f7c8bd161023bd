use clap::Parser;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;
use url::Url;

use crate::assinafy::ReadinessConfig;
use crate::poller::ReconcilePollerConfig;

#[derive(Parser, Debug)]
pub struct Env {
    /// Path to TOML configuration file
    #[clap(long)]
    pub config_file: PathBuf,
}

/// Raw settings deserialized from the configuration TOML.
#[derive(Deserialize)]
struct ConfigFile {
    database_url: String,
    log_level: Option<LogLevel>,
    server_port: Option<u16>,
    storage_root: PathBuf,
    webhook_secret: Option<String>,
    assinafy: AssinafySection,
    document_readiness: Option<ReadinessSection>,
    reconcile: Option<ReconcileSection>,
}

#[derive(Deserialize)]
struct AssinafySection {
    account_id: String,
    api_token: String,
    base_url: Url,
    request_timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
struct ReadinessSection {
    max_attempts: Option<u32>,
    interval_secs: Option<u64>,
}

#[derive(Deserialize)]
struct ReconcileSection {
    polling_interval_secs: Option<u64>,
    max_jitter_secs: Option<u64>,
}

/// Resolved runtime configuration, constructed once at startup and passed
/// by reference into each component's constructor.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub log_level: LogLevel,
    pub server_port: u16,
    pub storage_root: PathBuf,
    pub webhook_secret: Option<String>,
    pub assinafy: AssinafyConfig,
    pub readiness: ReadinessConfig,
    pub reconcile: ReconcilePollerConfig,
}

/// Credentials and endpoint for the e-signature provider account.
#[derive(Debug, Clone)]
pub struct AssinafyConfig {
    pub account_id: String,
    pub api_token: String,
    pub base_url: Url,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<&LogLevel> for Level {
    fn from(log_level: &LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML")]
    Toml(#[from] toml::de::Error),
}

impl Config {
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::load(&contents)
    }

    pub fn load(config_toml: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(config_toml)?;

        let readiness = file
            .document_readiness
            .map_or_else(ReadinessConfig::default, |section| {
                let defaults = ReadinessConfig::default();
                ReadinessConfig {
                    max_attempts: section.max_attempts.unwrap_or(defaults.max_attempts),
                    interval: section
                        .interval_secs
                        .map_or(defaults.interval, Duration::from_secs),
                }
            });

        let reconcile = file
            .reconcile
            .map_or_else(ReconcilePollerConfig::default, |section| {
                let defaults = ReconcilePollerConfig::default();
                ReconcilePollerConfig {
                    polling_interval: section
                        .polling_interval_secs
                        .map_or(defaults.polling_interval, Duration::from_secs),
                    max_jitter: section
                        .max_jitter_secs
                        .map_or(defaults.max_jitter, Duration::from_secs),
                }
            });

        Ok(Self {
            database_url: file.database_url,
            log_level: file.log_level.unwrap_or(LogLevel::Info),
            server_port: file.server_port.unwrap_or(8080),
            storage_root: file.storage_root,
            webhook_secret: file.webhook_secret,
            assinafy: AssinafyConfig {
                account_id: file.assinafy.account_id,
                api_token: file.assinafy.api_token,
                base_url: file.assinafy.base_url,
                request_timeout: Duration::from_secs(
                    file.assinafy.request_timeout_secs.unwrap_or(30),
                ),
            },
            readiness,
            reconcile,
        })
    }

    pub async fn get_sqlite_pool(&self) -> Result<SqlitePool, sqlx::Error> {
        configure_sqlite_pool(&self.database_url).await
    }
}

pub(crate) async fn configure_sqlite_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePool::connect(database_url).await?;

    // WAL allows the webhook server and the reconciliation poller to read
    // concurrently while one of them writes.
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    // Both paths may race on the same lease row; give the loser up to 10s
    // before surfacing "database is locked".
    sqlx::query("PRAGMA busy_timeout = 10000")
        .execute(&pool)
        .await?;

    Ok(pool)
}

pub fn setup_tracing(log_level: &LogLevel) {
    let level: Level = log_level.into();
    let default_filter = format!("lease_esign={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
