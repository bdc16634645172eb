use crate::from_epoch;
use chrono::{DateTime, Utc};
use resona_core::{
    CoreError, DatabaseError, Job, JobOptions, JobOutcome, JobProgress, JobStatus,
};
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// Persistence for job documents. Only the worker mutates jobs; status
/// transitions are conditional updates so duplicate deliveries and
/// concurrent claims settle on exactly one winner.
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, job: &Job) -> Result<(), CoreError> {
        job.validate()?;
        let keywords = serde_json::to_string(&job.keywords)?;
        let options = serde_json::to_string(&job.options)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, user_id, keywords, action_count, options, status,
                created_at, current_step, step_progress, total_steps, failed_attempts
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.user_id)
        .bind(keywords)
        .bind(job.action_count as i64)
        .bind(options)
        .bind(job.status.as_str())
        .bind(job.created_at.timestamp())
        .bind(&job.progress.current_step)
        .bind(job.progress.step_progress as i64)
        .bind(job.progress.total_steps as i64)
        .bind(job.failed_attempts as i64)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<Job>, CoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;

        row.map(row_to_job).transpose()
    }

    /// Atomically move a job from `expected` to `active`. Returns false
    /// when another delivery won the claim (or the status moved on), so the
    /// caller can bail out without touching the job.
    pub async fn claim_active(
        &self,
        job_id: &str,
        expected: JobStatus,
        started_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'active', started_at = ? WHERE id = ? AND status = ?",
        )
        .bind(started_at.timestamp())
        .bind(job_id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn update_progress(
        &self,
        job_id: &str,
        step: &str,
        percent: u8,
    ) -> Result<(), CoreError> {
        debug!("Job {} progress: {} ({}%)", job_id, step, percent);
        sqlx::query("UPDATE jobs SET current_step = ?, step_progress = ? WHERE id = ?")
            .bind(step)
            .bind(percent as i64)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;
        Ok(())
    }

    pub async fn mark_completed(
        &self,
        job_id: &str,
        outcome: &JobOutcome,
    ) -> Result<(), CoreError> {
        let result = serde_json::to_string(outcome)?;
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', completed_at = ?, result = ?, error = NULL,
                current_step = 'done', step_progress = 100
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(Utc::now().timestamp())
        .bind(result)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;
        Ok(())
    }

    /// Mark a job failed, incrementing its failure count. Progress fields
    /// are left frozen at the step where the failure happened. Returns the
    /// new failure count.
    pub async fn mark_failed(&self, job_id: &str, error: &str) -> Result<u32, CoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', error = ?, failed_attempts = failed_attempts + 1
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        let row = sqlx::query("SELECT failed_attempts FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;
        Ok(row.get::<i64, _>("failed_attempts") as u32)
    }

    pub async fn mark_permanently_failed(
        &self,
        job_id: &str,
        error: &str,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'permanently_failed', error = ?, completed_at = ?
            WHERE id = ? AND status = 'failed'
            "#,
        )
        .bind(error)
        .bind(Utc::now().timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;
        Ok(result.rows_affected() == 1)
    }

    /// Backfill the session-report reference into a completed job's result
    /// payload. The report is always written after the status, so the
    /// reference arrives in a second write.
    pub async fn attach_report(&self, job_id: &str, report_id: i64) -> Result<(), CoreError> {
        if let Some(job) = self.get(job_id).await? {
            if let Some(mut outcome) = job.result {
                outcome.report_id = Some(report_id);
                let payload = serde_json::to_string(&outcome)?;
                sqlx::query("UPDATE jobs SET result = ? WHERE id = ?")
                    .bind(payload)
                    .bind(job_id)
                    .execute(&self.pool)
                    .await
                    .map_err(DatabaseError::Sql)?;
            }
        }
        Ok(())
    }

    /// Jobs still waiting for their first delivery, used to refill the
    /// queue when the worker restarts.
    pub async fn waiting_jobs(&self) -> Result<Vec<(String, String)>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id FROM jobs WHERE status = 'waiting' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("id"), row.get("user_id")))
            .collect())
    }
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<Job, CoreError> {
    let keywords: Vec<String> = serde_json::from_str(row.get("keywords"))?;
    let options: JobOptions = serde_json::from_str(row.get("options"))?;
    let result: Option<JobOutcome> = row
        .get::<Option<String>, _>("result")
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    let status_raw: String = row.get("status");
    let status = JobStatus::parse(&status_raw).ok_or_else(|| CoreError::Internal {
        message: format!("unknown job status '{}' in store", status_raw),
    })?;

    Ok(Job {
        id: row.get("id"),
        user_id: row.get("user_id"),
        keywords,
        action_count: row.get::<i64, _>("action_count") as u32,
        options,
        status,
        created_at: from_epoch(row.get("created_at")),
        started_at: row.get::<Option<i64>, _>("started_at").map(from_epoch),
        completed_at: row.get::<Option<i64>, _>("completed_at").map(from_epoch),
        progress: JobProgress {
            current_step: row.get("current_step"),
            step_progress: row.get::<i64, _>("step_progress") as u8,
            total_steps: row.get::<i64, _>("total_steps") as u8,
        },
        result,
        error: row.get("error"),
        failed_attempts: row.get::<i64, _>("failed_attempts") as u32,
    })
}
