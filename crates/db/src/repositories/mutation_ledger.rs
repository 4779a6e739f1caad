use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use taskpilot_core::domain::mutation::{
    CompletedTask, IdempotencyKey, MutationRecord, MutationStatus,
};
use taskpilot_core::ports::{MutationLedger, StoreError, TaskHistory};

use super::{decode_err, format_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

/// Insert-only ledger of external task mutations.
pub struct SqlMutationLedger {
    pool: DbPool,
}

impl SqlMutationLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn lookup(
        &self,
        key: &IdempotencyKey,
        since: DateTime<Utc>,
    ) -> Result<Option<MutationRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, external_ref, external_url, scope_id, client_id, skill_id, title,
                    source_reference, status, created_at
             FROM task_mutation_ledger
             WHERE source_reference = ? AND created_at >= ?
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(key.as_str())
        .bind(format_timestamp(since))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn append(&self, record: &MutationRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO task_mutation_ledger (
                id, external_ref, external_url, scope_id, client_id, skill_id, title,
                source_reference, status, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.external_ref)
        .bind(&record.external_url)
        .bind(&record.scope_id)
        .bind(&record.client_id)
        .bind(&record.skill_id)
        .bind(&record.title)
        .bind(record.source_reference.as_str())
        .bind(record.status.as_str())
        .bind(format_timestamp(record.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn completed(
        &self,
        client_id: &str,
        skill_id: &str,
        limit: usize,
    ) -> Result<Vec<CompletedTask>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT external_ref, title, created_at
             FROM task_mutation_ledger
             WHERE client_id = ? AND skill_id = ?
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(client_id)
        .bind(skill_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let completed_at: String = row.try_get("created_at").map_err(decode_err)?;
                Ok(CompletedTask {
                    external_ref: row.try_get("external_ref").map_err(decode_err)?,
                    title: row.try_get("title").map_err(decode_err)?,
                    completed_at: parse_timestamp("created_at", &completed_at)?,
                })
            })
            .collect()
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<MutationRecord, RepositoryError> {
    let status: String = row.try_get("status").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let source_reference: String = row.try_get("source_reference").map_err(decode_err)?;

    Ok(MutationRecord {
        id: row.try_get("id").map_err(decode_err)?,
        external_ref: row.try_get("external_ref").map_err(decode_err)?,
        external_url: row.try_get("external_url").map_err(decode_err)?,
        scope_id: row.try_get("scope_id").map_err(decode_err)?,
        client_id: row.try_get("client_id").map_err(decode_err)?,
        skill_id: row.try_get("skill_id").map_err(decode_err)?,
        title: row.try_get("title").map_err(decode_err)?,
        source_reference: IdempotencyKey(source_reference),
        status: MutationStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown mutation status `{status}`")))?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

#[async_trait]
impl MutationLedger for SqlMutationLedger {
    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
        since: DateTime<Utc>,
    ) -> Result<Option<MutationRecord>, StoreError> {
        Ok(self.lookup(key, since).await?)
    }

    async fn insert(&self, record: MutationRecord) -> Result<(), StoreError> {
        Ok(self.append(&record).await?)
    }
}

#[async_trait]
impl TaskHistory for SqlMutationLedger {
    async fn recent_completed(
        &self,
        client_id: &str,
        skill_id: &str,
        limit: usize,
    ) -> Result<Vec<CompletedTask>, StoreError> {
        Ok(self.completed(client_id, skill_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use taskpilot_core::domain::mutation::{IdempotencyKey, MutationRecord, MutationStatus};
    use taskpilot_core::ports::{MutationLedger, TaskHistory};

    use super::SqlMutationLedger;
    use crate::repositories::test_support::migrated_pool;

    fn record(id: &str, key: &str, status: MutationStatus, minutes_ago: i64) -> MutationRecord {
        let base = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).single().expect("time");
        MutationRecord {
            id: id.to_string(),
            external_ref: format!("ext-{id}"),
            external_url: format!("https://tasks.example.test/{id}"),
            scope_id: "c1".to_string(),
            client_id: "c1".to_string(),
            skill_id: "create_task".to_string(),
            title: format!("Task {id}"),
            source_reference: IdempotencyKey(key.to_string()),
            status,
            created_at: base - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn find_by_key_respects_window_and_returns_newest() {
        let ledger = SqlMutationLedger::new(migrated_pool().await);
        ledger.insert(record("old", "k1", MutationStatus::Created, 120)).await.expect("insert");
        ledger.insert(record("new", "k1", MutationStatus::Created, 5)).await.expect("insert");
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).single().expect("time");

        let found = ledger
            .find_by_key(&IdempotencyKey("k1".to_string()), now - Duration::hours(24))
            .await
            .expect("lookup");
        let outside = ledger
            .find_by_key(&IdempotencyKey("k1".to_string()), now - Duration::minutes(1))
            .await
            .expect("lookup");
        let other_key = ledger
            .find_by_key(&IdempotencyKey("k2".to_string()), now - Duration::hours(24))
            .await
            .expect("lookup");

        assert_eq!(found.map(|r| r.id), Some("new".to_string()));
        assert!(outside.is_none());
        assert!(other_key.is_none());
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let ledger = SqlMutationLedger::new(migrated_pool().await);
        ledger.insert(record("r1", "k1", MutationStatus::Created, 0)).await.expect("insert");

        let error = ledger.insert(record("r1", "k1", MutationStatus::Created, 0)).await;

        assert!(error.is_err());
    }

    #[tokio::test]
    async fn recent_completed_covers_every_recorded_task_and_limits() {
        let ledger = SqlMutationLedger::new(migrated_pool().await);
        ledger.insert(record("a", "k1", MutationStatus::Completed, 30)).await.expect("insert");
        ledger.insert(record("b", "k2", MutationStatus::Completed, 10)).await.expect("insert");
        ledger.insert(record("c", "k3", MutationStatus::Created, 1)).await.expect("insert");
        ledger.insert(record("d", "k4", MutationStatus::Completed, 60)).await.expect("insert");

        let completed = ledger.recent_completed("c1", "create_task", 2).await.expect("history");

        assert_eq!(
            completed.iter().map(|task| task.external_ref.as_str()).collect::<Vec<_>>(),
            vec!["ext-c", "ext-b"]
        );
        assert!(ledger.recent_completed("c2", "create_task", 5).await.expect("history").is_empty());
    }
}
