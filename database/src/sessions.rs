use async_trait::async_trait;
use chrono::Utc;
use resona_core::{CoreError, CredentialStore, DatabaseError, SessionToken};
use sqlx::{Row, SqlitePool};

/// Session-token store backing the credential interface. Tokens are
/// installed by an operator or the API layer; the worker only reads them.
#[derive(Debug, Clone)]
pub struct SqlCredentialStore {
    pool: SqlitePool,
}

impl SqlCredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save_tokens(
        &self,
        user_id: &str,
        tokens: &[SessionToken],
    ) -> Result<(), CoreError> {
        for token in tokens {
            sqlx::query(
                r#"
                INSERT INTO session_tokens (user_id, name, value, domain, path, expires_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(user_id, name) DO UPDATE SET
                    value = excluded.value,
                    domain = excluded.domain,
                    path = excluded.path,
                    expires_at = excluded.expires_at
                "#,
            )
            .bind(user_id)
            .bind(&token.name)
            .bind(&token.value)
            .bind(&token.domain)
            .bind(&token.path)
            .bind(token.expires_at)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;
        }
        Ok(())
    }

    pub async fn delete_tokens(&self, user_id: &str) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM session_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SqlCredentialStore {
    async fn has_valid_session(&self, user_id: &str) -> Result<bool, CoreError> {
        let now = Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM session_tokens
            WHERE user_id = ? AND (expires_at IS NULL OR expires_at > ?)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        Ok(row.get::<i64, _>("n") > 0)
    }

    async fn load_session(&self, user_id: &str) -> Result<Vec<SessionToken>, CoreError> {
        let rows = sqlx::query("SELECT * FROM session_tokens WHERE user_id = ? ORDER BY name")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;

        Ok(rows
            .into_iter()
            .map(|row| SessionToken {
                name: row.get("name"),
                value: row.get("value"),
                domain: row.get("domain"),
                path: row.get("path"),
                expires_at: row.get("expires_at"),
            })
            .collect())
    }
}
