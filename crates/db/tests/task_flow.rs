use std::sync::Arc;

use taskpilot_core::chrono::Utc;
use taskpilot_core::domain::mutation::TaskCreateRequest;
use taskpilot_core::domain::pending::{Awaiting, PendingTaskCreate};
use taskpilot_core::domain::session::ContextPatch;
use taskpilot_core::ports::memory::ScriptedTaskService;
use taskpilot_core::ports::SessionStore;
use taskpilot_core::reliability::{MutationOutcome, ReliableTaskCreator};
use taskpilot_db::{
    connect_with_settings, migrations::run_pending, DbPool, SqlMutationLedger, SqlOrphanEvents,
    SqlSessionStore,
};

async fn migrated_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    run_pending(&pool).await.expect("migrations");
    pool
}

#[tokio::test]
async fn second_create_for_same_scope_and_title_is_a_duplicate() {
    let pool = migrated_pool().await;
    let service = Arc::new(ScriptedTaskService::new(Vec::new()));
    let creator = ReliableTaskCreator::new(
        service.clone(),
        Arc::new(SqlMutationLedger::new(pool.clone())),
        Arc::new(SqlOrphanEvents::new(pool.clone())),
    );

    let mut request = TaskCreateRequest::new("c1", "Audit PPC spend", "Audit PPC spend");
    request.brand_id = Some("b1".to_string());

    let first = creator.create(&request, "corr-1").await;
    assert!(matches!(first, MutationOutcome::Created { persisted: true, .. }), "{first:?}");

    let mut retitled = request.clone();
    retitled.title = "  audit ppc SPEND ".to_string();
    let second = creator.create(&retitled, "corr-2").await;
    assert!(matches!(second, MutationOutcome::Duplicate { .. }), "{second:?}");
    assert_eq!(service.calls(), 1);

    let mut other_brand = request.clone();
    other_brand.brand_id = Some("b2".to_string());
    let third = creator.create(&other_brand, "corr-3").await;
    assert!(third.is_created());
    assert_eq!(service.calls(), 2);

    pool.close().await;
}

#[tokio::test]
async fn pending_request_survives_a_session_reload() {
    let pool = migrated_pool().await;
    let sessions = SqlSessionStore::new(pool.clone());
    let session = sessions.get_or_create("U1").await.expect("session");

    let mut pending = PendingTaskCreate::new(Awaiting::Title, "c1", "Acme", Utc::now());
    pending.brand_id = Some("b1".to_string());
    let partial = ContextPatch::pending(pending.clone()).to_partial_map().expect("patch");
    sessions.update_context(&session.id, partial).await.expect("update");

    let reloaded = sessions.get_or_create("U1").await.expect("reload");
    assert_eq!(reloaded.id, session.id);
    assert_eq!(reloaded.context.pending_task_create, Some(pending));

    let cleared = ContextPatch::clear_pending().to_partial_map().expect("patch");
    sessions.update_context(&session.id, cleared).await.expect("clear");
    let reloaded = sessions.get_or_create("U1").await.expect("reload");
    assert_eq!(reloaded.context.pending_task_create, None);

    pool.close().await;
}
