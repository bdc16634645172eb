pub mod items;
pub mod jobs;
pub mod reports;
pub mod sessions;

#[cfg(test)]
mod tests;

pub use items::{InsertSummary, ItemStore};
pub use jobs::JobStore;
pub use reports::ReportStore;
pub use sessions::SqlCredentialStore;

use resona_core::{CoreError, DatabaseError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        keywords TEXT NOT NULL,
        action_count INTEGER NOT NULL,
        options TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        started_at INTEGER,
        completed_at INTEGER,
        current_step TEXT NOT NULL DEFAULT 'queued',
        step_progress INTEGER NOT NULL DEFAULT 0,
        total_steps INTEGER NOT NULL DEFAULT 6,
        result TEXT,
        error TEXT,
        failed_attempts INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS candidate_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL,
        user_id TEXT NOT NULL,
        content TEXT NOT NULL,
        reaction_count INTEGER NOT NULL,
        reply_count INTEGER NOT NULL,
        keyword TEXT,
        scraped_at INTEGER NOT NULL,
        acted_upon INTEGER NOT NULL DEFAULT 0,
        acted_text TEXT,
        acted_at INTEGER,
        job_id TEXT NOT NULL,
        UNIQUE(url, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS session_reports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        discovered_count INTEGER NOT NULL,
        filtered_count INTEGER NOT NULL,
        acted_count INTEGER NOT NULL,
        failed_count INTEGER NOT NULL,
        duration_ms INTEGER NOT NULL,
        start_time INTEGER NOT NULL,
        end_time INTEGER NOT NULL,
        success_rate_percent REAL NOT NULL,
        errors TEXT NOT NULL,
        performance TEXT NOT NULL,
        keywords TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS session_tokens (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        domain TEXT NOT NULL,
        path TEXT NOT NULL,
        expires_at INTEGER,
        UNIQUE(user_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL UNIQUE,
        user_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'queued',
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        enqueued_at INTEGER NOT NULL,
        scheduled_for INTEGER NOT NULL,
        last_error TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_items_user ON candidate_items(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_items_job ON candidate_items(job_id, user_id)",
    "CREATE INDEX IF NOT EXISTS idx_reports_job ON session_reports(job_id)",
    "CREATE INDEX IF NOT EXISTS idx_queue_due ON job_queue(status, scheduled_for)",
];

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| {
                CoreError::Database(DatabaseError::ConnectionFailed {
                    reason: e.to_string(),
                })
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                CoreError::Database(DatabaseError::ConnectionFailed {
                    reason: e.to_string(),
                })
            })?;

        info!("Connected to database at {}", url);
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    CoreError::Database(DatabaseError::MigrationFailed {
                        migration: e.to_string(),
                    })
                })?;
        }
        Ok(())
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    pub fn jobs(&self) -> JobStore {
        JobStore::new(self.pool.clone())
    }

    pub fn items(&self) -> ItemStore {
        ItemStore::new(self.pool.clone())
    }

    pub fn reports(&self) -> ReportStore {
        ReportStore::new(self.pool.clone())
    }

    pub fn credentials(&self) -> SqlCredentialStore {
        SqlCredentialStore::new(self.pool.clone())
    }
}

pub(crate) fn from_epoch(secs: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
