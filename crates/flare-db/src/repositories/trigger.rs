//! PostgreSQL implementation of TriggerStore.

use async_trait::async_trait;
use flare_core::ids::{AppId, TriggerId};
use flare_core::ports::TriggerStore;
use flare_core::trigger::{ConditionKind, Trigger};
use flare_core::{Error, Result};
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct PgTriggerStore {
    pool: PgPool,
}

impl PgTriggerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_trigger(r: &sqlx::postgres::PgRow) -> Result<Trigger> {
        let definition: serde_json::Value = r.get("definition");
        serde_json::from_value(definition).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[async_trait]
impl TriggerStore for PgTriggerStore {
    async fn get(&self, app_id: AppId, id: TriggerId) -> Result<Option<Trigger>> {
        let row = sqlx::query("SELECT definition FROM triggers WHERE app_id = $1 AND id = $2")
            .bind(app_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_trigger).transpose()
    }

    async fn find_by_webhook_token(&self, token: &str) -> Result<Option<Trigger>> {
        let row = sqlx::query("SELECT definition FROM triggers WHERE webhook_token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_trigger).transpose()
    }

    async fn list_by_condition(&self, app_id: AppId, kind: ConditionKind) -> Result<Vec<Trigger>> {
        let rows = sqlx::query(
            "SELECT definition FROM triggers WHERE app_id = $1 AND condition_kind = $2 ORDER BY created_at ASC, id ASC",
        )
        .bind(app_id.as_uuid())
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_trigger).collect()
    }

    async fn save(&self, trigger: &Trigger) -> Result<()> {
        let definition =
            serde_json::to_value(trigger).map_err(|e| Error::Serialization(e.to_string()))?;
        let token = trigger
            .webhook_condition()
            .and_then(|c| c.token.as_ref())
            .map(|t| t.token.clone());

        sqlx::query(
            r#"INSERT INTO triggers (id, account_id, app_id, name, condition_kind, webhook_token, disabled, definition, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
               ON CONFLICT (id) DO UPDATE SET
                   name = EXCLUDED.name,
                   condition_kind = EXCLUDED.condition_kind,
                   webhook_token = EXCLUDED.webhook_token,
                   disabled = EXCLUDED.disabled,
                   definition = EXCLUDED.definition,
                   updated_at = NOW()"#,
        )
        .bind(trigger.id.as_uuid())
        .bind(trigger.account_id.as_uuid())
        .bind(trigger.app_id.as_uuid())
        .bind(&trigger.name)
        .bind(trigger.condition_kind().as_str())
        .bind(token)
        .bind(trigger.disabled)
        .bind(&definition)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, app_id: AppId, id: TriggerId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM triggers WHERE app_id = $1 AND id = $2")
            .bind(app_id.as_uuid())
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
