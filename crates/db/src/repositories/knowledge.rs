use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use taskpilot_core::domain::knowledge::{InternalDocument, SopDocument};
use taskpilot_core::ports::{KnowledgeBase, StoreError};

use super::{decode_err, format_timestamp, parse_aliases, RepositoryError};
use crate::DbPool;

pub struct SqlKnowledgeBase {
    pool: DbPool,
}

impl SqlKnowledgeBase {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save_sop(&self, document: &SopDocument) -> Result<(), RepositoryError> {
        let aliases = serde_json::to_string(&document.aliases).map_err(decode_err)?;
        sqlx::query(
            "INSERT INTO sop_document (id, category, aliases_json, title, content, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 category = excluded.category,
                 aliases_json = excluded.aliases_json,
                 title = excluded.title,
                 content = excluded.content,
                 updated_at = excluded.updated_at",
        )
        .bind(&document.id)
        .bind(&document.category)
        .bind(aliases)
        .bind(&document.title)
        .bind(&document.content)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_internal(&self, document: &InternalDocument) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO internal_document (id, title, content, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 content = excluded.content,
                 updated_at = excluded.updated_at",
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.content)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sop_where_category(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<SopDocument>, RepositoryError> {
        let rows = match category {
            Some(category) => {
                sqlx::query(
                    "SELECT id, category, aliases_json, title, content FROM sop_document
                     WHERE category = ?",
                )
                .bind(category)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, category, aliases_json, title, content FROM sop_document
                     ORDER BY category",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_sop).collect()
    }

    async fn internal_documents(&self) -> Result<Vec<InternalDocument>, RepositoryError> {
        let rows = sqlx::query("SELECT id, title, content FROM internal_document ORDER BY title")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(InternalDocument {
                    id: row.try_get("id").map_err(decode_err)?,
                    title: row.try_get("title").map_err(decode_err)?,
                    content: row.try_get("content").map_err(decode_err)?,
                })
            })
            .collect()
    }
}

fn row_to_sop(row: &sqlx::sqlite::SqliteRow) -> Result<SopDocument, RepositoryError> {
    let aliases: String = row.try_get("aliases_json").map_err(decode_err)?;
    Ok(SopDocument {
        id: row.try_get("id").map_err(decode_err)?,
        category: row.try_get("category").map_err(decode_err)?,
        aliases: parse_aliases(&aliases)?,
        title: row.try_get("title").map_err(decode_err)?,
        content: row.try_get("content").map_err(decode_err)?,
    })
}

#[async_trait]
impl KnowledgeBase for SqlKnowledgeBase {
    async fn find_sop_by_category(
        &self,
        category: &str,
    ) -> Result<Option<SopDocument>, StoreError> {
        Ok(self.sop_where_category(Some(category)).await?.into_iter().next())
    }

    async fn list_sop_documents(&self) -> Result<Vec<SopDocument>, StoreError> {
        Ok(self.sop_where_category(None).await?)
    }

    async fn list_internal_documents(&self) -> Result<Vec<InternalDocument>, StoreError> {
        Ok(self.internal_documents().await?)
    }
}
