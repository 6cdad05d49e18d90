//! PostgreSQL implementation of IdempotencyStore.
//!
//! `try_create` is a single upsert: a new key is inserted, a failed or
//! expired key is taken over, and anything else is left untouched. Only
//! the caller whose statement returned a row owns the key.

use async_trait::async_trait;
use chrono::Utc;
use flare_core::idempotency::{Acquisition, IdempotencyRecord, IdempotencyState};
use flare_core::ids::ExecutionId;
use flare_core::ports::IdempotencyStore;
use flare_core::{Error, Result};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::debug;

/// Lost races against a concurrent purge before giving up.
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete expired keys. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    fn row_to_record(r: &sqlx::postgres::PgRow) -> Result<IdempotencyRecord> {
        let state: String = r.get("state");
        Ok(IdempotencyRecord {
            key: r.get("key"),
            state: state.parse().map_err(Error::Database)?,
            execution_id: r
                .get::<Option<uuid::Uuid>, _>("execution_id")
                .map(ExecutionId::from_uuid),
            created_at: r.get("created_at"),
            expires_at: r.get("expires_at"),
        })
    }

    async fn set_state(
        &self,
        key: &str,
        state: IdempotencyState,
        execution_id: Option<ExecutionId>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE idempotency_keys SET state = $2, execution_id = COALESCE($3, execution_id) WHERE key = $1",
        )
        .bind(key)
        .bind(state.as_str())
        .bind(execution_id.map(|id| *id.as_uuid()))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::Internal(format!("No idempotency record for {key}")));
        }
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn try_create(&self, key: &str, ttl: Duration) -> Result<Acquisition> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::Internal(e.to_string()))?;

        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            let now = Utc::now();
            let acquired = sqlx::query(
                r#"INSERT INTO idempotency_keys (key, state, execution_id, created_at, expires_at)
                   VALUES ($1, 'pending', NULL, $2, $3)
                   ON CONFLICT (key) DO UPDATE SET
                       state = 'pending',
                       execution_id = NULL,
                       created_at = EXCLUDED.created_at,
                       expires_at = EXCLUDED.expires_at
                   WHERE idempotency_keys.state = 'failed' OR idempotency_keys.expires_at <= $2
                   RETURNING key"#,
            )
            .bind(key)
            .bind(now)
            .bind(now + ttl)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

            if acquired.is_some() {
                return Ok(Acquisition::Acquired);
            }
            if let Some(record) = self.get(key).await? {
                return Ok(Acquisition::Present(record));
            }
            debug!(key, "Idempotency key vanished between upsert and read, retrying");
        }

        Err(Error::Internal(format!(
            "Could not acquire or read idempotency key {key}"
        )))
    }

    async fn mark_succeeded(&self, key: &str, execution_id: Option<ExecutionId>) -> Result<()> {
        self.set_state(key, IdempotencyState::Succeeded, execution_id)
            .await
    }

    async fn mark_failed(&self, key: &str) -> Result<()> {
        self.set_state(key, IdempotencyState::Failed, None).await
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            "SELECT key, state, execution_id, created_at, expires_at FROM idempotency_keys WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }
}
