use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use talktome_common::models::{ChannelId, UsageRecord};
pub use talktome_common::traits::repository_traits::QuotaLedger;

use crate::Error;

#[derive(Clone)]
pub struct PostgresQuotaLedger {
    pool: Pool<Postgres>,
}

impl PostgresQuotaLedger {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn usage_from_row(row: &PgRow) -> Result<UsageRecord, Error> {
        let channel_id: i64 = row.try_get("channel_id")?;
        Ok(UsageRecord {
            channel_id: ChannelId::from_i64(channel_id)?,
            tokens: row.try_get("tokens")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl QuotaLedger for PostgresQuotaLedger {
    async fn append(
        &self,
        channel_id: ChannelId,
        tokens: i64,
        at: DateTime<Utc>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO request_tokens (channel_id, tokens, created_at)
            VALUES ($1, $2, $3)
            "#,
        )
            .bind(channel_id.as_i64())
            .bind(tokens)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        channel_id: ChannelId,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT channel_id, tokens, created_at
            FROM request_tokens
            WHERE channel_id = $1
              AND created_at > $2
            "#,
        )
            .bind(channel_id.as_i64())
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::usage_from_row).collect()
    }

    async fn list(&self, channel_id: ChannelId) -> Result<Vec<UsageRecord>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT channel_id, tokens, created_at
            FROM request_tokens
            WHERE channel_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
            .bind(channel_id.as_i64())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::usage_from_row).collect()
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM request_tokens
            WHERE created_at < $1
            "#,
        )
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_for_channel(&self, channel_id: ChannelId) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM request_tokens
            WHERE channel_id = $1
            "#,
        )
            .bind(channel_id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_override_limit(&self, channel_id: ChannelId) -> Result<Option<i64>, Error> {
        let row = sqlx::query(
            r#"
            SELECT token_limit
            FROM channel_token_limits
            WHERE channel_id = $1
            "#,
        )
            .bind(channel_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        if let Some(r) = row {
            Ok(Some(r.try_get("token_limit")?))
        } else {
            Ok(None)
        }
    }

    async fn set_override_limit(&self, channel_id: ChannelId, limit: i64) -> Result<(), Error> {
        // Rolled back on drop if anything below fails.
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO channel_token_limits (channel_id, token_limit, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (channel_id)
            DO UPDATE SET
               token_limit = EXCLUDED.token_limit,
               updated_at  = EXCLUDED.updated_at
            "#,
        )
            .bind(channel_id.as_i64())
            .bind(limit)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_override_limit(&self, channel_id: ChannelId) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM channel_token_limits
            WHERE channel_id = $1
            "#,
        )
            .bind(channel_id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
