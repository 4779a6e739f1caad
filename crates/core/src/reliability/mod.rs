//! Guarantees around mutating calls to the external task service.

pub mod guard;
pub mod idempotency;
pub mod mutation;
pub mod retry;

pub use guard::{InFlightGuard, InFlightPermit};
pub use idempotency::{build_idempotency_key, build_idempotency_key_at, normalize_title};
pub use mutation::{emit_orphan_event, MutationOutcome, ReliableTaskCreator};
pub use retry::{retry_with_backoff, RetryError, RetryPolicy, Retryable};
