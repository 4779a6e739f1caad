use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCreateRequest {
    pub client_id: String,
    pub brand_id: Option<String>,
    pub title: String,
    pub description: String,
    pub assignees: Vec<String>,
    pub skill_id: String,
}

impl TaskCreateRequest {
    pub fn new(
        client_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            brand_id: None,
            title: title.into(),
            description: description.into(),
            assignees: Vec::new(),
            skill_id: "create_task".to_string(),
        }
    }

    /// Dedupe scope: the brand when one is known, else the client.
    pub fn scope_id(&self) -> &str {
        self.brand_id.as_deref().unwrap_or(&self.client_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTask {
    pub id: String,
    pub url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Created,
    Completed,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Local record of an external mutation. Insert only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub id: String,
    pub external_ref: String,
    pub external_url: String,
    pub scope_id: String,
    pub client_id: String,
    pub skill_id: String,
    pub title: String,
    pub source_reference: IdempotencyKey,
    pub status: MutationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanEvent {
    pub id: String,
    pub external_ref: String,
    pub idempotency_key: IdempotencyKey,
    pub scope_id: String,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

/// Completed work used as precedent by the similar-task retrieval tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTask {
    pub external_ref: String,
    pub title: String,
    pub completed_at: DateTime<Utc>,
}
