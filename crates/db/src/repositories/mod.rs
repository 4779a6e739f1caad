use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use taskpilot_core::ports::StoreError;

pub mod client;
pub mod knowledge;
pub mod mutation_ledger;
pub mod orphan_event;
pub mod profile;
pub mod session;

pub use client::SqlClientDirectory;
pub use knowledge::SqlKnowledgeBase;
pub use mutation_ledger::SqlMutationLedger;
pub use orphan_event::SqlOrphanEvents;
pub use profile::SqlProfileDirectory;
pub use session::SqlSessionStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => Self::Unavailable(error.to_string()),
            RepositoryError::Decode(message) => Self::Decode(message),
            RepositoryError::NotFound(message) => Self::NotFound(message),
        }
    }
}

/// Fixed-width UTC timestamps so stored values sort lexicographically.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn decode_err(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_aliases(value: &str) -> Result<Vec<String>, RepositoryError> {
    serde_json::from_str(value).map_err(decode_err)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{connect_with_settings, migrations::run_pending, DbPool};

    pub async fn migrated_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        pool
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{format_timestamp, parse_timestamp, RepositoryError};
    use taskpilot_core::ports::StoreError;

    #[test]
    fn timestamps_are_fixed_width_and_parse_back() {
        let value = Utc.with_ymd_and_hms(2026, 1, 5, 9, 30, 0).single().expect("time");

        let formatted = format_timestamp(value);

        assert_eq!(formatted, "2026-01-05T09:30:00.000000Z");
        assert_eq!(parse_timestamp("created_at", &formatted).expect("parse"), value);
    }

    #[test]
    fn repository_errors_map_to_store_errors() {
        assert!(matches!(
            StoreError::from(RepositoryError::Decode("bad row".to_string())),
            StoreError::Decode(_)
        ));
        assert!(matches!(
            StoreError::from(RepositoryError::Database(sqlx::Error::PoolClosed)),
            StoreError::Unavailable(_)
        ));
    }
}
