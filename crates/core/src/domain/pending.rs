use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const PENDING_TIMEOUT_MINUTES: i64 = 10;

/// Which answer the multi-turn task creation flow is waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Awaiting {
    Brand,
    Title,
    ConfirmOrDetails,
    AsinOrPending,
}

impl Awaiting {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brand => "brand",
            Self::Title => "title",
            Self::ConfirmOrDetails => "confirm_or_details",
            Self::AsinOrPending => "asin_or_pending",
        }
    }

    /// Only confirmation-stage states are subject to the staleness check.
    pub fn checks_timeout(&self) -> bool {
        matches!(self, Self::ConfirmOrDetails | Self::AsinOrPending)
    }
}

/// Description produced by draft enrichment from retrieved evidence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub description: String,
    pub references: Vec<String>,
    pub open_questions: Vec<String>,
    pub confidence: f64,
}

impl TaskDraft {
    pub fn has_open_questions(&self) -> bool {
        !self.open_questions.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingTaskCreate {
    pub awaiting: Awaiting,
    pub client_id: String,
    pub client_name: String,
    #[serde(default)]
    pub brand_id: Option<String>,
    #[serde(default)]
    pub brand_name: Option<String>,
    #[serde(default)]
    pub brand_hint: Option<String>,
    #[serde(default)]
    pub task_title: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub draft: Option<TaskDraft>,
    pub created_at: DateTime<Utc>,
}

impl PendingTaskCreate {
    pub fn new(
        awaiting: Awaiting,
        client_id: impl Into<String>,
        client_name: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            awaiting,
            client_id: client_id.into(),
            client_name: client_name.into(),
            brand_id: None,
            brand_name: None,
            brand_hint: None,
            task_title: None,
            details: None,
            draft: None,
            created_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.created_at > timeout
    }

    pub fn has_brand(&self) -> bool {
        self.brand_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{Awaiting, PendingTaskCreate};

    #[test]
    fn expiry_is_strictly_after_timeout() {
        let created_at = Utc::now();
        let pending = PendingTaskCreate::new(Awaiting::ConfirmOrDetails, "c1", "Acme", created_at);
        let timeout = Duration::minutes(10);

        assert!(!pending.is_expired(created_at + Duration::minutes(10), timeout));
        assert!(pending.is_expired(created_at + Duration::minutes(10) + Duration::seconds(1), timeout));
    }

    #[test]
    fn pending_state_deserializes_with_missing_optional_fields() {
        let raw = serde_json::json!({
            "awaiting": "asin_or_pending",
            "client_id": "c1",
            "client_name": "Acme",
            "created_at": "2026-01-05T10:00:00Z"
        });

        let pending: PendingTaskCreate = serde_json::from_value(raw).expect("pending");
        assert_eq!(pending.awaiting, Awaiting::AsinOrPending);
        assert!(pending.task_title.is_none());
        assert!(pending.awaiting.checks_timeout());
        assert!(!Awaiting::Brand.checks_timeout());
    }
}
