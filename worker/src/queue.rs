//! Durable, at-least-once job delivery.
//!
//! Entries live in SQLite so enqueued work survives restarts. Delivery is
//! single-file: one entry is handed out at a time, matching the one-job
//! concurrency constraint. A failed delivery is rescheduled with
//! exponential backoff until its attempt cap, after which the entry is
//! parked as exhausted.

use chrono::Utc;
use resona_core::{CoreError, DatabaseError};
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, info, warn};

const BACKOFF_BASE_SECS: u64 = 30;
const BACKOFF_CAP_SECS: u64 = 900;

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: i64,
    pub job_id: String,
    pub user_id: String,
    pub attempts: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    max_attempts: u32,
}

impl JobQueue {
    pub fn new(pool: SqlitePool, max_attempts: u32) -> Self {
        Self { pool, max_attempts }
    }

    /// Add a job to the queue. Re-enqueueing a job that is still queued or
    /// delivering is a no-op; re-enqueueing a settled job redelivers it,
    /// and the processor's own guards decide whether it actually runs.
    pub async fn enqueue(&self, job_id: &str, user_id: &str) -> Result<(), CoreError> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO job_queue
                (job_id, user_id, status, attempts, max_attempts, enqueued_at, scheduled_for)
            VALUES (?, ?, 'queued', 0, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                status = 'queued',
                attempts = 0,
                scheduled_for = excluded.scheduled_for
            WHERE job_queue.status IN ('done', 'exhausted')
            "#,
        )
        .bind(job_id)
        .bind(user_id)
        .bind(self.max_attempts as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        if result.rows_affected() == 1 {
            debug!("Enqueued job {} for user {}", job_id, user_id);
        }
        Ok(())
    }

    /// Hand out the next due entry, marking it as delivering and counting
    /// the attempt. Returns `None` when nothing is due.
    pub async fn next_due(&self) -> Result<Option<QueueEntry>, CoreError> {
        let now = Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            SELECT id, job_id, user_id, attempts, max_attempts FROM job_queue
            WHERE status = 'queued' AND scheduled_for <= ?
            ORDER BY scheduled_for, id
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.get("id");
        let claimed = sqlx::query(
            "UPDATE job_queue SET status = 'delivering', attempts = attempts + 1 \
             WHERE id = ? AND status = 'queued'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        if claimed.rows_affected() != 1 {
            return Ok(None);
        }

        Ok(Some(QueueEntry {
            id,
            job_id: row.get("job_id"),
            user_id: row.get("user_id"),
            attempts: row.get::<i64, _>("attempts") as u32 + 1,
            max_attempts: row.get::<i64, _>("max_attempts") as u32,
        }))
    }

    pub async fn settle_success(&self, entry: &QueueEntry) -> Result<(), CoreError> {
        sqlx::query("UPDATE job_queue SET status = 'done' WHERE id = ?")
            .bind(entry.id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;
        Ok(())
    }

    /// Reschedule a failed delivery with backoff, or park it as exhausted
    /// once the attempt cap is reached.
    pub async fn settle_failure(&self, entry: &QueueEntry, error: &str) -> Result<(), CoreError> {
        if entry.attempts >= entry.max_attempts {
            warn!(
                "Delivery attempts exhausted for job {} after {} tries",
                entry.job_id, entry.attempts
            );
            sqlx::query("UPDATE job_queue SET status = 'exhausted', last_error = ? WHERE id = ?")
                .bind(error)
                .bind(entry.id)
                .execute(&self.pool)
                .await
                .map_err(DatabaseError::Sql)?;
            return Ok(());
        }

        let delay = Self::backoff_delay(entry.attempts);
        let next = Utc::now().timestamp() + delay.as_secs() as i64;
        info!(
            "Rescheduling job {} (attempt {}/{}) in {:?}",
            entry.job_id, entry.attempts, entry.max_attempts, delay
        );

        sqlx::query(
            "UPDATE job_queue SET status = 'queued', scheduled_for = ?, last_error = ? \
             WHERE id = ?",
        )
        .bind(next)
        .bind(error)
        .bind(entry.id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;
        Ok(())
    }

    /// Return entries stuck in `delivering` (a previous process died
    /// mid-delivery) to the queue. Called once at startup; together with
    /// the processor's idempotency guard this preserves at-least-once
    /// delivery without double-running jobs.
    pub async fn recover_stuck(&self) -> Result<u64, CoreError> {
        let result = sqlx::query(
            "UPDATE job_queue SET status = 'queued' WHERE status = 'delivering'",
        )
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!("Recovered {} stuck deliveries from a previous run", recovered);
        }
        Ok(recovered)
    }

    pub async fn pending_count(&self) -> Result<u64, CoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM job_queue WHERE status IN ('queued', 'delivering')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    fn backoff_delay(attempt: u32) -> Duration {
        let exp = BACKOFF_BASE_SECS.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        Duration::from_secs(exp.min(BACKOFF_CAP_SECS))
    }
}
