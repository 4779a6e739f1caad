use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::Row;
use uuid::Uuid;

use taskpilot_core::domain::session::{merge_partial, Session, SessionContext, SessionId};
use taskpilot_core::ports::{SessionStore, StoreError};

use super::{decode_err, format_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlSessionStore {
    pool: DbPool,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_by_user(&self, external_user_id: &str) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            "SELECT s.id, s.external_user_id, s.context_json, s.last_activity, p.id AS profile_id
             FROM chat_session s
             LEFT JOIN profile p ON p.external_user_id = s.external_user_id
             WHERE s.external_user_id = ?",
        )
        .bind(external_user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    async fn load_or_insert(&self, external_user_id: &str) -> Result<Session, RepositoryError> {
        if let Some(session) = self.find_by_user(external_user_id).await? {
            return Ok(session);
        }

        let now = format_timestamp(Utc::now());
        sqlx::query(
            "INSERT INTO chat_session (id, external_user_id, context_json, created_at, last_activity)
             VALUES (?, ?, '{}', ?, ?)
             ON CONFLICT(external_user_id) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(external_user_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_by_user(external_user_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("session for {external_user_id}")))
    }

    async fn merge_context(
        &self,
        session_id: &SessionId,
        partial: &Map<String, Value>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let raw: Option<String> =
            sqlx::query_scalar("SELECT context_json FROM chat_session WHERE id = ?")
                .bind(&session_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        let raw = raw.ok_or_else(|| RepositoryError::NotFound(format!("session {}", session_id.0)))?;

        let mut stored = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        merge_partial(&mut stored, partial);
        let encoded = serde_json::to_string(&Value::Object(stored)).map_err(decode_err)?;

        sqlx::query("UPDATE chat_session SET context_json = ? WHERE id = ?")
            .bind(encoded)
            .bind(&session_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let external_user_id: String = row.try_get("external_user_id").map_err(decode_err)?;
    let context_json: String = row.try_get("context_json").map_err(decode_err)?;
    let last_activity: String = row.try_get("last_activity").map_err(decode_err)?;
    let profile_id: Option<String> = row.try_get("profile_id").map_err(decode_err)?;

    let context_value = serde_json::from_str::<Value>(&context_json).unwrap_or(Value::Null);

    Ok(Session {
        id: SessionId(id),
        external_user_id,
        profile_id,
        context: SessionContext::from_json(&context_value),
        last_activity: parse_timestamp("last_activity", &last_activity)?,
    })
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn get_or_create(&self, external_user_id: &str) -> Result<Session, StoreError> {
        Ok(self.load_or_insert(external_user_id).await?)
    }

    async fn update_context(
        &self,
        session_id: &SessionId,
        partial: Map<String, Value>,
    ) -> Result<(), StoreError> {
        Ok(self.merge_context(session_id, &partial).await?)
    }

    async fn touch(&self, session_id: &SessionId) -> Result<(), StoreError> {
        sqlx::query("UPDATE chat_session SET last_activity = ? WHERE id = ?")
            .bind(format_timestamp(Utc::now()))
            .bind(&session_id.0)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(())
    }
}
