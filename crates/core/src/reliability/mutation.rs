use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::guard::InFlightGuard;
use super::idempotency::build_idempotency_key;
use super::retry::{retry_with_backoff, RetryError, RetryPolicy};
use crate::domain::mutation::{
    CreatedTask, IdempotencyKey, MutationRecord, MutationStatus, OrphanEvent, TaskCreateRequest,
};
use crate::errors::TaskServiceError;
use crate::ports::{MutationLedger, OrphanEventSink, StoreError, TaskService};

pub const DEFAULT_DEDUPE_WINDOW_HOURS: i64 = 24;

#[derive(Debug, PartialEq)]
pub enum MutationOutcome {
    /// The external task exists. `persisted` is false when the ledger write
    /// failed and an orphan event was emitted instead.
    Created { task: CreatedTask, key: IdempotencyKey, persisted: bool },
    Duplicate { existing: MutationRecord },
    Busy,
    DedupeUnavailable,
    Failed { error: RetryError<TaskServiceError> },
}

impl MutationOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }

    pub fn user_message(&self, title: &str) -> String {
        match self {
            Self::Created { task, .. } => format!("Created task *{title}*: {}", task.url),
            Self::Duplicate { existing } => format!(
                "A task titled *{}* was already created today: {}",
                existing.title, existing.external_url
            ),
            Self::Busy => {
                "That task is already being created. Give it a moment and try again.".to_string()
            }
            Self::DedupeUnavailable => {
                "I can't confirm this isn't a duplicate right now, so I didn't create it. \
                 Please try again in a few minutes."
                    .to_string()
            }
            Self::Failed { error } => match error.inner() {
                TaskServiceError::Configuration(_) => {
                    "Task creation isn't configured yet. Ask an admin to check the setup."
                        .to_string()
                }
                TaskServiceError::Auth(_) => {
                    "The task service rejected our credentials, so nothing was created."
                        .to_string()
                }
                TaskServiceError::Validation(_) | TaskServiceError::NotFound(_) => {
                    format!("The task service rejected *{title}*. Check the details and try again.")
                }
                TaskServiceError::RateLimit(_) | TaskServiceError::Transient(_) => {
                    "The task service is having trouble right now. Please try again shortly."
                        .to_string()
                }
            },
        }
    }
}

/// Creates external tasks with dedupe, an in-flight guard, retry and orphan
/// tracking around the raw [`TaskService`] call.
#[derive(Clone)]
pub struct ReliableTaskCreator {
    service: Arc<dyn TaskService>,
    ledger: Arc<dyn MutationLedger>,
    orphans: Arc<dyn OrphanEventSink>,
    guard: InFlightGuard,
    retry: RetryPolicy,
    dedupe_window: Duration,
}

impl ReliableTaskCreator {
    pub fn new(
        service: Arc<dyn TaskService>,
        ledger: Arc<dyn MutationLedger>,
        orphans: Arc<dyn OrphanEventSink>,
    ) -> Self {
        Self {
            service,
            ledger,
            orphans,
            guard: InFlightGuard::default(),
            retry: RetryPolicy::default(),
            dedupe_window: Duration::hours(DEFAULT_DEDUPE_WINDOW_HOURS),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dedupe_window(mut self, window: Duration) -> Self {
        self.dedupe_window = window;
        self
    }

    pub fn with_guard(mut self, guard: InFlightGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn guard(&self) -> &InFlightGuard {
        &self.guard
    }

    pub async fn check_duplicate(
        &self,
        key: &IdempotencyKey,
        window: Duration,
    ) -> Result<Option<MutationRecord>, StoreError> {
        self.ledger.find_by_key(key, Utc::now() - window).await
    }

    pub async fn create(&self, request: &TaskCreateRequest, correlation_id: &str) -> MutationOutcome {
        let key = build_idempotency_key(request.scope_id(), &request.title);

        let Some(_permit) = self.guard.try_acquire(&key) else {
            info!(
                event_name = "reliability.inflight.busy",
                correlation_id,
                idempotency_key = %key,
                "mutation already in flight for key"
            );
            return MutationOutcome::Busy;
        };

        match self.check_duplicate(&key, self.dedupe_window).await {
            Ok(Some(existing)) => {
                info!(
                    event_name = "reliability.dedupe.hit",
                    correlation_id,
                    idempotency_key = %key,
                    external_ref = %existing.external_ref,
                    "duplicate task request suppressed"
                );
                return MutationOutcome::Duplicate { existing };
            }
            Ok(None) => {}
            Err(lookup_error) => {
                warn!(
                    event_name = "reliability.dedupe.unavailable",
                    correlation_id,
                    idempotency_key = %key,
                    error = %lookup_error,
                    "duplicate check failed; refusing mutation"
                );
                return MutationOutcome::DedupeUnavailable;
            }
        }

        let task = match retry_with_backoff(self.retry, || self.service.create(request)).await {
            Ok(task) => task,
            Err(failure) => {
                warn!(
                    event_name = "reliability.mutation.failed",
                    correlation_id,
                    idempotency_key = %key,
                    attempts = failure.attempts(),
                    error_kind = failure.inner().kind(),
                    error = %failure,
                    "task creation failed"
                );
                return MutationOutcome::Failed { error: failure };
            }
        };

        let record = ledger_record(request, &task, &key, Utc::now());
        let persisted = match self.ledger.insert(record).await {
            Ok(()) => true,
            Err(persist_error) => {
                emit_orphan_event(
                    self.orphans.as_ref(),
                    &task.id,
                    &key,
                    &persist_error.to_string(),
                    request.scope_id(),
                )
                .await;
                false
            }
        };

        info!(
            event_name = "reliability.mutation.created",
            correlation_id,
            idempotency_key = %key,
            external_ref = %task.id,
            persisted,
            "task created"
        );
        MutationOutcome::Created { task, key, persisted }
    }
}

fn ledger_record(
    request: &TaskCreateRequest,
    task: &CreatedTask,
    key: &IdempotencyKey,
    now: DateTime<Utc>,
) -> MutationRecord {
    MutationRecord {
        id: Uuid::new_v4().to_string(),
        external_ref: task.id.clone(),
        external_url: task.url.clone(),
        scope_id: request.scope_id().to_string(),
        client_id: request.client_id.clone(),
        skill_id: request.skill_id.clone(),
        title: request.title.clone(),
        source_reference: key.clone(),
        status: MutationStatus::Created,
        created_at: now,
    }
}

/// Records an external mutation whose local bookkeeping failed. Never fails.
pub async fn emit_orphan_event(
    sink: &dyn OrphanEventSink,
    external_ref: &str,
    key: &IdempotencyKey,
    error_text: &str,
    scope_id: &str,
) {
    let event = OrphanEvent {
        id: Uuid::new_v4().to_string(),
        external_ref: external_ref.to_string(),
        idempotency_key: key.clone(),
        scope_id: scope_id.to_string(),
        error: error_text.to_string(),
        occurred_at: Utc::now(),
    };

    match sink.record_orphan(event).await {
        Ok(()) => warn!(
            event_name = "reliability.orphan.recorded",
            external_ref,
            idempotency_key = %key,
            scope_id,
            error = error_text,
            "external mutation not persisted locally; orphan recorded"
        ),
        Err(sink_error) => error!(
            event_name = "reliability.orphan.emit_failed",
            external_ref,
            idempotency_key = %key,
            scope_id,
            error = error_text,
            sink_error = %sink_error,
            "failed to record orphan event"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use super::{emit_orphan_event, MutationOutcome, ReliableTaskCreator};
    use crate::domain::mutation::{IdempotencyKey, TaskCreateRequest};
    use crate::errors::TaskServiceError;
    use crate::ports::memory::{InMemoryMutationLedger, InMemoryOrphanEvents, ScriptedTaskService};
    use crate::reliability::idempotency::build_idempotency_key;
    use crate::reliability::retry::RetryPolicy;

    struct Harness {
        service: Arc<ScriptedTaskService>,
        ledger: Arc<InMemoryMutationLedger>,
        orphans: Arc<InMemoryOrphanEvents>,
        creator: ReliableTaskCreator,
    }

    fn harness(service: ScriptedTaskService) -> Harness {
        let service = Arc::new(service);
        let ledger = Arc::new(InMemoryMutationLedger::default());
        let orphans = Arc::new(InMemoryOrphanEvents::default());
        let creator = ReliableTaskCreator::new(service.clone(), ledger.clone(), orphans.clone())
            .with_retry_policy(RetryPolicy::new(3, StdDuration::from_millis(1)));
        Harness { service, ledger, orphans, creator }
    }

    fn request(title: &str) -> TaskCreateRequest {
        TaskCreateRequest::new("client-1", title, "details")
    }

    #[tokio::test]
    async fn second_identical_request_never_reaches_the_service() {
        let harness = harness(ScriptedTaskService::default());

        let first = harness.creator.create(&request("Fix Landing Page"), "req-1").await;
        let second = harness.creator.create(&request("  fix landing   page "), "req-2").await;

        assert!(first.is_created());
        assert!(matches!(second, MutationOutcome::Duplicate { .. }));
        assert_eq!(harness.service.calls(), 1);
        assert_eq!(harness.ledger.records().await.len(), 1);
    }

    #[tokio::test]
    async fn dedupe_lookup_failure_refuses_the_mutation() {
        let harness = harness(ScriptedTaskService::default());
        harness.ledger.set_fail_lookups(true);

        let outcome = harness.creator.create(&request("Fix Landing Page"), "req-1").await;

        assert_eq!(outcome, MutationOutcome::DedupeUnavailable);
        assert_eq!(harness.service.calls(), 0);
        assert!(harness.creator.guard().is_empty());
    }

    #[tokio::test]
    async fn in_flight_key_reports_busy_without_mutating() {
        let harness = harness(ScriptedTaskService::default());
        let key = build_idempotency_key("client-1", "Fix Landing Page");
        let _held = harness.creator.guard().try_acquire(&key).expect("acquire");

        let outcome = harness.creator.create(&request("Fix Landing Page"), "req-1").await;

        assert_eq!(outcome, MutationOutcome::Busy);
        assert_eq!(harness.service.calls(), 0);
    }

    #[tokio::test]
    async fn ledger_failure_records_orphan_and_still_reports_success() {
        let harness = harness(ScriptedTaskService::default());
        harness.ledger.set_fail_inserts(true);

        let outcome = harness.creator.create(&request("Fix Landing Page"), "req-1").await;

        assert!(matches!(outcome, MutationOutcome::Created { persisted: false, .. }));
        let orphans = harness.orphans.events().await;
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].external_ref, "task-1");
        assert!(outcome.user_message("Fix Landing Page").starts_with("Created task"));
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_and_guard_released() {
        let harness = harness(ScriptedTaskService::new(vec![
            Err(TaskServiceError::RateLimit("429".to_string())),
            Err(TaskServiceError::Transient("503".to_string())),
        ]));

        let outcome = harness.creator.create(&request("Fix Landing Page"), "req-1").await;

        assert!(outcome.is_created());
        assert_eq!(harness.service.calls(), 3);
        assert!(harness.creator.guard().is_empty());
    }

    #[tokio::test]
    async fn terminal_failure_is_reported_and_guard_released() {
        let harness = harness(ScriptedTaskService::new(vec![Err(TaskServiceError::Auth(
            "401".to_string(),
        ))]));

        let outcome = harness.creator.create(&request("Fix Landing Page"), "req-1").await;

        assert!(matches!(outcome, MutationOutcome::Failed { .. }));
        assert_eq!(harness.service.calls(), 1);
        assert!(harness.creator.guard().is_empty());
        assert!(harness.ledger.records().await.is_empty());
    }

    #[tokio::test]
    async fn orphan_emission_swallows_sink_failures() {
        let sink = InMemoryOrphanEvents::default();
        sink.set_unavailable(true);

        emit_orphan_event(&sink, "task-9", &IdempotencyKey("k".to_string()), "db down", "c1").await;

        assert!(sink.events().await.is_empty());
    }
}
