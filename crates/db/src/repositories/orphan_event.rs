use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use taskpilot_core::domain::mutation::{IdempotencyKey, OrphanEvent};
use taskpilot_core::ports::{OrphanEventSink, StoreError};

use super::{decode_err, format_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

/// External mutations that succeeded without a local ledger row.
pub struct SqlOrphanEvents {
    pool: DbPool,
}

impl SqlOrphanEvents {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list_unresolved(&self) -> Result<Vec<OrphanEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, external_ref, idempotency_key, scope_id, error, occurred_at
             FROM orphan_event
             WHERE resolved_at IS NULL
             ORDER BY occurred_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let key: String = row.try_get("idempotency_key").map_err(decode_err)?;
                let occurred_at: String = row.try_get("occurred_at").map_err(decode_err)?;
                Ok(OrphanEvent {
                    id: row.try_get("id").map_err(decode_err)?,
                    external_ref: row.try_get("external_ref").map_err(decode_err)?,
                    idempotency_key: IdempotencyKey(key),
                    scope_id: row.try_get("scope_id").map_err(decode_err)?,
                    error: row.try_get("error").map_err(decode_err)?,
                    occurred_at: parse_timestamp("occurred_at", &occurred_at)?,
                })
            })
            .collect()
    }

    /// Marks an orphan as reconciled. Returns false when no open event matched.
    pub async fn resolve(&self, id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE orphan_event SET resolved_at = ? WHERE id = ? AND resolved_at IS NULL",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl OrphanEventSink for SqlOrphanEvents {
    async fn record_orphan(&self, event: OrphanEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO orphan_event (id, external_ref, idempotency_key, scope_id, error, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.external_ref)
        .bind(event.idempotency_key.as_str())
        .bind(&event.scope_id)
        .bind(&event.error)
        .bind(format_timestamp(event.occurred_at))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use taskpilot_core::domain::mutation::{IdempotencyKey, OrphanEvent};
    use taskpilot_core::ports::OrphanEventSink;

    use super::SqlOrphanEvents;
    use crate::repositories::test_support::migrated_pool;

    #[tokio::test]
    async fn recorded_orphans_stay_open_until_resolved() {
        let orphans = SqlOrphanEvents::new(migrated_pool().await);
        let event = OrphanEvent {
            id: "o1".to_string(),
            external_ref: "task-9".to_string(),
            idempotency_key: IdempotencyKey("abc".to_string()),
            scope_id: "c1".to_string(),
            error: "ledger insert failed".to_string(),
            occurred_at: Utc::now(),
        };
        orphans.record_orphan(event).await.expect("record");

        let open = orphans.list_unresolved().await.expect("list");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].external_ref, "task-9");

        assert!(orphans.resolve("o1").await.expect("resolve"));
        assert!(!orphans.resolve("o1").await.expect("resolve again"));
        assert!(orphans.list_unresolved().await.expect("list").is_empty());
    }
}
