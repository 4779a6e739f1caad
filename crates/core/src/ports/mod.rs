//! Collaborator contracts the orchestration layer depends on.
//!
//! Storage-backed implementations live in `taskpilot-db`; the in-memory ones
//! in [`memory`] back tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::actor::{ActorRole, Profile};
use crate::domain::client::{Brand, Client};
use crate::domain::knowledge::{InternalDocument, SopDocument};
use crate::domain::mutation::{
    CompletedTask, CreatedTask, IdempotencyKey, MutationRecord, OrphanEvent, TaskCreateRequest,
};
use crate::domain::session::{Session, SessionId};
use crate::errors::TaskServiceError;

pub mod memory;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("stored data could not be decoded: {0}")]
    Decode(String),
    #[error("record not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_or_create(&self, external_user_id: &str) -> Result<Session, StoreError>;

    /// Merges `partial` into the stored context; a `null` value clears the key.
    async fn update_context(
        &self,
        session_id: &SessionId,
        partial: Map<String, Value>,
    ) -> Result<(), StoreError>;

    async fn touch(&self, session_id: &SessionId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn find_profile(&self, profile_id: &str) -> Result<Option<Profile>, StoreError>;

    async fn find_by_external_user(
        &self,
        external_user_id: &str,
    ) -> Result<Option<Profile>, StoreError>;

    async fn set_role(
        &self,
        external_user_id: &str,
        role: ActorRole,
        is_admin: bool,
    ) -> Result<Profile, StoreError>;
}

#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn list_clients(&self) -> Result<Vec<Client>, StoreError>;

    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, StoreError>;

    async fn list_brands(&self, client_id: &str) -> Result<Vec<Brand>, StoreError>;
}

/// External task-management service.
#[async_trait]
pub trait TaskService: Send + Sync {
    async fn create(&self, request: &TaskCreateRequest) -> Result<CreatedTask, TaskServiceError>;
}

#[async_trait]
pub trait MutationLedger: Send + Sync {
    /// Most recent record carrying `key` created at or after `since`.
    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
        since: DateTime<Utc>,
    ) -> Result<Option<MutationRecord>, StoreError>;

    async fn insert(&self, record: MutationRecord) -> Result<(), StoreError>;
}

/// Precedent for the similar-task retrieval tier. Every ledger row is a
/// mutation the task service accepted, so rows count whatever their status.
#[async_trait]
pub trait TaskHistory: Send + Sync {
    async fn recent_completed(
        &self,
        client_id: &str,
        skill_id: &str,
        limit: usize,
    ) -> Result<Vec<CompletedTask>, StoreError>;
}

#[async_trait]
pub trait OrphanEventSink: Send + Sync {
    async fn record_orphan(&self, event: OrphanEvent) -> Result<(), StoreError>;
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn find_sop_by_category(&self, category: &str)
        -> Result<Option<SopDocument>, StoreError>;

    async fn list_sop_documents(&self) -> Result<Vec<SopDocument>, StoreError>;

    async fn list_internal_documents(&self) -> Result<Vec<InternalDocument>, StoreError>;
}
