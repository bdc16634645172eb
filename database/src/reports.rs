use crate::from_epoch;
use resona_core::{CoreError, DatabaseError, PhaseTimings, ReportError, SessionReport};
use sqlx::{Row, SqlitePool};
use tracing::info;

/// Append-only store for session reports. Reports are created once at the
/// end of a job attempt and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ReportStore {
    pool: SqlitePool,
}

impl ReportStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, report: &SessionReport) -> Result<i64, CoreError> {
        let errors = serde_json::to_string(&report.errors)?;
        let performance = serde_json::to_string(&report.performance)?;
        let keywords = serde_json::to_string(&report.keywords)?;

        let result = sqlx::query(
            r#"
            INSERT INTO session_reports (
                job_id, user_id, discovered_count, filtered_count, acted_count,
                failed_count, duration_ms, start_time, end_time,
                success_rate_percent, errors, performance, keywords
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.job_id)
        .bind(&report.user_id)
        .bind(report.discovered_count as i64)
        .bind(report.filtered_count as i64)
        .bind(report.acted_count as i64)
        .bind(report.failed_count as i64)
        .bind(report.duration_ms)
        .bind(report.start_time.timestamp())
        .bind(report.end_time.timestamp())
        .bind(report.success_rate_percent)
        .bind(errors)
        .bind(performance)
        .bind(keywords)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        let report_id = result.last_insert_rowid();
        info!(
            "Session report {} recorded for job {} (acted {}, failed {})",
            report_id, report.job_id, report.acted_count, report.failed_count
        );
        Ok(report_id)
    }

    pub async fn list_for_job(&self, job_id: &str) -> Result<Vec<SessionReport>, CoreError> {
        let rows = sqlx::query("SELECT * FROM session_reports WHERE job_id = ? ORDER BY id")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;

        rows.into_iter().map(row_to_report).collect()
    }
}

fn row_to_report(row: sqlx::sqlite::SqliteRow) -> Result<SessionReport, CoreError> {
    let errors: Vec<ReportError> = serde_json::from_str(row.get("errors"))?;
    let performance: PhaseTimings = serde_json::from_str(row.get("performance"))?;
    let keywords: Vec<String> = serde_json::from_str(row.get("keywords"))?;

    Ok(SessionReport {
        id: Some(row.get::<i64, _>("id")),
        job_id: row.get("job_id"),
        user_id: row.get("user_id"),
        discovered_count: row.get::<i64, _>("discovered_count") as u32,
        filtered_count: row.get::<i64, _>("filtered_count") as u32,
        acted_count: row.get::<i64, _>("acted_count") as u32,
        failed_count: row.get::<i64, _>("failed_count") as u32,
        duration_ms: row.get("duration_ms"),
        start_time: from_epoch(row.get("start_time")),
        end_time: from_epoch(row.get("end_time")),
        success_rate_percent: row.get("success_rate_percent"),
        errors,
        performance,
        keywords,
    })
}
