use crate::from_epoch;
use chrono::{DateTime, Utc};
use resona_core::{CandidateItem, CoreError, DatabaseError};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Persistence for scraped candidate items. The `(url, user_id)` pair is
/// unique; re-inserting an existing pair is a skip, never an error, so a
/// retried or concurrent run cannot sink the batch.
#[derive(Debug, Clone)]
pub struct ItemStore {
    pool: SqlitePool,
}

impl ItemStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_batch(&self, items: &[CandidateItem]) -> Result<InsertSummary, CoreError> {
        let mut summary = InsertSummary::default();

        for item in items {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO candidate_items (
                    url, user_id, content, reaction_count, reply_count,
                    keyword, scraped_at, acted_upon, job_id
                ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
                "#,
            )
            .bind(&item.url)
            .bind(&item.user_id)
            .bind(&item.content)
            .bind(item.reaction_count as i64)
            .bind(item.reply_count as i64)
            .bind(&item.keyword)
            .bind(item.scraped_at.timestamp())
            .bind(&item.job_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;

            if result.rows_affected() == 1 {
                summary.inserted += 1;
            } else {
                debug!(
                    "Skipping duplicate candidate {} for user {}",
                    item.url, item.user_id
                );
                summary.duplicates += 1;
            }
        }

        Ok(summary)
    }

    pub async fn get(&self, url: &str, user_id: &str) -> Result<Option<CandidateItem>, CoreError> {
        let row = sqlx::query("SELECT * FROM candidate_items WHERE url = ? AND user_id = ?")
            .bind(url)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;

        Ok(row.map(row_to_item))
    }

    /// URLs already recorded for this job and user, for scrape-time dedup.
    pub async fn urls_for_job(
        &self,
        job_id: &str,
        user_id: &str,
    ) -> Result<HashSet<String>, CoreError> {
        let rows =
            sqlx::query("SELECT url FROM candidate_items WHERE job_id = ? AND user_id = ?")
                .bind(job_id)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::Sql)?;

        Ok(rows.into_iter().map(|row| row.get("url")).collect())
    }

    /// All rows recorded under a job, including ones persisted by an
    /// earlier attempt of the same job before it failed.
    pub async fn items_for_job(
        &self,
        job_id: &str,
        user_id: &str,
    ) -> Result<Vec<CandidateItem>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM candidate_items WHERE job_id = ? AND user_id = ? ORDER BY id",
        )
        .bind(job_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        Ok(rows.into_iter().map(row_to_item).collect())
    }

    /// Load the stored rows for a set of URLs. Rows first discovered by an
    /// earlier job carry that job's id and any acted-upon state, which is
    /// exactly what filtering needs to see.
    pub async fn items_for_urls(
        &self,
        user_id: &str,
        urls: &[String],
    ) -> Result<Vec<CandidateItem>, CoreError> {
        let mut items = Vec::with_capacity(urls.len());
        for url in urls {
            if let Some(item) = self.get(url, user_id).await? {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Record a successful reply on the item. Scoped to `(url, user_id)` so
    /// another user's row for the same URL is never touched. Returns false
    /// when no matching row exists.
    pub async fn mark_acted(
        &self,
        url: &str,
        user_id: &str,
        text: &str,
        acted_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE candidate_items
            SET acted_upon = 1, acted_text = ?, acted_at = ?
            WHERE url = ? AND user_id = ?
            "#,
        )
        .bind(text)
        .bind(acted_at.timestamp())
        .bind(url)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn count_for_user(&self, user_id: &str) -> Result<u64, CoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM candidate_items WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}

fn row_to_item(row: sqlx::sqlite::SqliteRow) -> CandidateItem {
    CandidateItem {
        id: Some(row.get::<i64, _>("id")),
        url: row.get("url"),
        content: row.get("content"),
        reaction_count: row.get::<i64, _>("reaction_count") as u32,
        reply_count: row.get::<i64, _>("reply_count") as u32,
        keyword: row.get("keyword"),
        scraped_at: from_epoch(row.get("scraped_at")),
        acted_upon: row.get::<i64, _>("acted_upon") != 0,
        acted_text: row.get("acted_text"),
        acted_at: row.get::<Option<i64>, _>("acted_at").map(from_epoch),
        job_id: row.get("job_id"),
        user_id: row.get("user_id"),
    }
}
