//! SQLite connection setup

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use ocr_queue::StoreError;

/// SQLite configuration options
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database URL (e.g., "sqlite:ocr.db?mode=rwc" or "sqlite::memory:")
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Enable WAL journal mode for better concurrency
    pub wal_mode: bool,
    /// Busy timeout in seconds
    pub busy_timeout_secs: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:ocr.db?mode=rwc".to_string(),
            max_connections: 5,
            wal_mode: true,
            busy_timeout_secs: 30,
        }
    }
}

impl SqliteConfig {
    /// Create config for in-memory database (testing)
    pub fn memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            wal_mode: false,
            busy_timeout_secs: 5,
        }
    }

    pub fn from_url(url: &str) -> Self {
        if url.contains(":memory:") {
            Self {
                url: url.to_string(),
                ..Self::memory()
            }
        } else {
            Self {
                url: url.to_string(),
                ..Default::default()
            }
        }
    }

    fn is_memory(&self) -> bool {
        self.url.contains(":memory:")
    }
}

/// Open a pool and bring the schema up to date
pub async fn connect(config: &SqliteConfig) -> Result<SqlitePool, StoreError> {
    let mut options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| StoreError::Backend(e.to_string()))?
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

    if config.wal_mode {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);
    if config.is_memory() {
        // Each connection to :memory: is a separate database; keep the only one alive
        pool_options = pool_options
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

    info!(url = %config.url, wal = config.wal_mode, "Connected to SQLite");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Backend(format!("Migration failed: {}", e)))?;

    Ok(pool)
}
