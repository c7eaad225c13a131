//! Refresh-token database queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::StoreError;
use super::refresh::{RefreshTokenRecord, RefreshTokenStore, Rotation};

type RefreshTokenRow = (String, Uuid, Option<String>, DateTime<Utc>, bool);

fn from_row(row: RefreshTokenRow) -> RefreshTokenRecord {
    let (hash, user_uuid, token_family, expires_at, revoked) = row;
    RefreshTokenRecord {
        hash,
        user_uuid,
        token_family,
        expires_at,
        revoked,
    }
}

/// PostgreSQL-backed refresh token store.
#[derive(Debug, Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Store a refresh token row.
async fn insert_row<'e, E>(executor: E, record: &RefreshTokenRecord) -> Result<(), StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO refresh_tokens (hash, user_id, token_family, expires_at, revoked) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&record.hash)
    .bind(record.user_uuid)
    .bind(&record.token_family)
    .bind(record.expires_at)
    .bind(record.revoked)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        insert_row(&self.pool, record).await
    }

    async fn find(&self, hash: &str) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            "SELECT hash, user_id, token_family, expires_at, revoked \
             FROM refresh_tokens WHERE hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(from_row))
    }

    async fn rotate(
        &self,
        old_hash: &str,
        successor: &RefreshTokenRecord,
    ) -> Result<Rotation, StoreError> {
        let mut tx = self.pool.begin().await?;

        // The row lock taken here serialises concurrent rotations of the
        // same token; only the first sees `revoked = FALSE`.
        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = now() \
             WHERE hash = $1 AND revoked = FALSE",
        )
        .bind(old_hash)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if revoked == 0 {
            tx.rollback().await?;
            return Ok(Rotation::Stale);
        }

        insert_row(&mut *tx, successor).await?;
        tx.commit().await?;
        Ok(Rotation::Rotated)
    }

    async fn revoke(&self, hash: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = now(), token_family = NULL \
             WHERE hash = $1 AND revoked = FALSE",
        )
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_uuid: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = now(), token_family = NULL \
             WHERE user_id = $1 AND revoked = FALSE",
        )
        .bind(user_uuid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
