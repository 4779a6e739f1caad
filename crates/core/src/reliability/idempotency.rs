use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::domain::mutation::IdempotencyKey;

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_title(title: &str) -> String {
    title.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

pub fn build_idempotency_key(scope_id: &str, title: &str) -> IdempotencyKey {
    build_idempotency_key_at(scope_id, title, Utc::now())
}

/// Key for the UTC day containing `now`.
pub fn build_idempotency_key_at(scope_id: &str, title: &str, now: DateTime<Utc>) -> IdempotencyKey {
    let material = format!("{scope_id}:{}:{}", normalize_title(title), now.format("%Y-%m-%d"));
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    IdempotencyKey(format!("{:x}", hasher.finalize()))
}
