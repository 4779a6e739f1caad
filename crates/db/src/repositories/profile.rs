use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use taskpilot_core::domain::actor::{ActorRole, Profile};
use taskpilot_core::ports::{ProfileDirectory, StoreError};

use super::{decode_err, format_timestamp, RepositoryError};
use crate::DbPool;

const PROFILE_COLUMNS: &str = "id, external_user_id, display_name, role, is_admin";

pub struct SqlProfileDirectory {
    pool: DbPool,
}

impl SqlProfileDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Creates or replaces the profile for `external_user_id`.
    pub async fn upsert(&self, profile: &Profile) -> Result<(), RepositoryError> {
        let now = format_timestamp(Utc::now());
        sqlx::query(
            "INSERT INTO profile (id, external_user_id, display_name, role, is_admin, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(external_user_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 role = excluded.role,
                 is_admin = excluded.is_admin,
                 updated_at = excluded.updated_at",
        )
        .bind(&profile.id)
        .bind(&profile.external_user_id)
        .bind(&profile.display_name)
        .bind(profile.role.as_str())
        .bind(profile.is_admin)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_one_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Profile>, RepositoryError> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profile WHERE {column} = ?");
        let row = sqlx::query(&sql).bind(value).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_profile).transpose()
    }
}

fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> Result<Profile, RepositoryError> {
    let role: String = row.try_get("role").map_err(decode_err)?;
    Ok(Profile {
        id: row.try_get("id").map_err(decode_err)?,
        external_user_id: row.try_get("external_user_id").map_err(decode_err)?,
        display_name: row.try_get("display_name").map_err(decode_err)?,
        role: ActorRole::parse(&role)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown profile role `{role}`")))?,
        is_admin: row.try_get("is_admin").map_err(decode_err)?,
    })
}

#[async_trait]
impl ProfileDirectory for SqlProfileDirectory {
    async fn find_profile(&self, profile_id: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.fetch_one_where("id", profile_id).await?)
    }

    async fn find_by_external_user(
        &self,
        external_user_id: &str,
    ) -> Result<Option<Profile>, StoreError> {
        Ok(self.fetch_one_where("external_user_id", external_user_id).await?)
    }

    async fn set_role(
        &self,
        external_user_id: &str,
        role: ActorRole,
        is_admin: bool,
    ) -> Result<Profile, StoreError> {
        let existing = self.fetch_one_where("external_user_id", external_user_id).await?;
        let profile = Profile {
            id: existing
                .as_ref()
                .map(|profile| profile.id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            external_user_id: external_user_id.to_string(),
            display_name: existing.and_then(|profile| profile.display_name),
            role,
            is_admin,
        };
        self.upsert(&profile).await?;
        Ok(profile)
    }
}
