use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ClientDirectory, KnowledgeBase, MutationLedger, OrphanEventSink, ProfileDirectory,
    SessionStore, StoreError, TaskHistory, TaskService,
};
use crate::domain::actor::{ActorRole, Profile};
use crate::domain::client::{Brand, Client};
use crate::domain::knowledge::{InternalDocument, SopDocument};
use crate::domain::mutation::{
    CompletedTask, CreatedTask, IdempotencyKey, MutationRecord, OrphanEvent,
    TaskCreateRequest,
};
use crate::domain::session::{merge_partial, Session, SessionContext, SessionId};
use crate::errors::TaskServiceError;

fn unavailable(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
    if flag.load(Ordering::SeqCst) {
        return Err(StoreError::Unavailable(format!("{what} is unavailable")));
    }
    Ok(())
}

#[derive(Clone, Debug)]
struct StoredSession {
    id: SessionId,
    external_user_id: String,
    profile_id: Option<String>,
    context: Map<String, Value>,
    last_activity: DateTime<Utc>,
}

impl StoredSession {
    fn to_session(&self) -> Session {
        Session {
            id: self.id.clone(),
            external_user_id: self.external_user_id.clone(),
            profile_id: self.profile_id.clone(),
            context: SessionContext::from_json(&Value::Object(self.context.clone())),
            last_activity: self.last_activity,
        }
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
    profile_links: RwLock<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl InMemorySessionStore {
    /// Sessions created for `external_user_id` from now on carry `profile_id`.
    pub async fn link_profile(&self, external_user_id: &str, profile_id: &str) {
        self.profile_links
            .write()
            .await
            .insert(external_user_id.to_string(), profile_id.to_string());
        if let Some(stored) = self.sessions.write().await.get_mut(external_user_id) {
            stored.profile_id = Some(profile_id.to_string());
        }
    }

    pub async fn raw_context(&self, external_user_id: &str) -> Option<Map<String, Value>> {
        self.sessions.read().await.get(external_user_id).map(|stored| stored.context.clone())
    }

    pub async fn session_for(&self, external_user_id: &str) -> Option<Session> {
        self.sessions.read().await.get(external_user_id).map(StoredSession::to_session)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, external_user_id: &str) -> Result<Session, StoreError> {
        unavailable(&self.unavailable, "session store")?;
        let profile_id = self.profile_links.read().await.get(external_user_id).cloned();
        let mut sessions = self.sessions.write().await;
        let stored = sessions.entry(external_user_id.to_string()).or_insert_with(|| {
            StoredSession {
                id: SessionId(Uuid::new_v4().to_string()),
                external_user_id: external_user_id.to_string(),
                profile_id,
                context: Map::new(),
                last_activity: Utc::now(),
            }
        });
        Ok(stored.to_session())
    }

    async fn update_context(
        &self,
        session_id: &SessionId,
        partial: Map<String, Value>,
    ) -> Result<(), StoreError> {
        unavailable(&self.unavailable, "session store")?;
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .values_mut()
            .find(|stored| &stored.id == session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {}", session_id.0)))?;
        merge_partial(&mut stored.context, &partial);
        Ok(())
    }

    async fn touch(&self, session_id: &SessionId) -> Result<(), StoreError> {
        unavailable(&self.unavailable, "session store")?;
        let mut sessions = self.sessions.write().await;
        if let Some(stored) = sessions.values_mut().find(|stored| &stored.id == session_id) {
            stored.last_activity = Utc::now();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProfileDirectory {
    profiles: RwLock<HashMap<String, Profile>>,
    unavailable: AtomicBool,
}

impl InMemoryProfileDirectory {
    pub async fn insert(&self, profile: Profile) {
        self.profiles.write().await.insert(profile.id.clone(), profile);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProfileDirectory for InMemoryProfileDirectory {
    async fn find_profile(&self, profile_id: &str) -> Result<Option<Profile>, StoreError> {
        unavailable(&self.unavailable, "profile directory")?;
        Ok(self.profiles.read().await.get(profile_id).cloned())
    }

    async fn find_by_external_user(
        &self,
        external_user_id: &str,
    ) -> Result<Option<Profile>, StoreError> {
        unavailable(&self.unavailable, "profile directory")?;
        let profiles = self.profiles.read().await;
        Ok(profiles.values().find(|profile| profile.external_user_id == external_user_id).cloned())
    }

    async fn set_role(
        &self,
        external_user_id: &str,
        role: ActorRole,
        is_admin: bool,
    ) -> Result<Profile, StoreError> {
        unavailable(&self.unavailable, "profile directory")?;
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .values_mut()
            .find(|profile| profile.external_user_id == external_user_id)
            .ok_or_else(|| StoreError::NotFound(format!("profile for {external_user_id}")))?;
        profile.role = role;
        profile.is_admin = is_admin;
        Ok(profile.clone())
    }
}

#[derive(Default)]
pub struct InMemoryClientDirectory {
    clients: RwLock<Vec<Client>>,
    brands: RwLock<Vec<Brand>>,
}

impl InMemoryClientDirectory {
    pub async fn insert_client(&self, client: Client) {
        self.clients.write().await.push(client);
    }

    pub async fn insert_brand(&self, brand: Brand) {
        self.brands.write().await.push(brand);
    }
}

#[async_trait]
impl ClientDirectory for InMemoryClientDirectory {
    async fn list_clients(&self) -> Result<Vec<Client>, StoreError> {
        Ok(self.clients.read().await.clone())
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, StoreError> {
        Ok(self.clients.read().await.iter().find(|client| client.id == client_id).cloned())
    }

    async fn list_brands(&self, client_id: &str) -> Result<Vec<Brand>, StoreError> {
        let brands = self.brands.read().await;
        Ok(brands.iter().filter(|brand| brand.client_id == client_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryMutationLedger {
    records: RwLock<Vec<MutationRecord>>,
    fail_lookups: AtomicBool,
    fail_inserts: AtomicBool,
}

impl InMemoryMutationLedger {
    pub async fn records(&self) -> Vec<MutationRecord> {
        self.records.read().await.clone()
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MutationLedger for InMemoryMutationLedger {
    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
        since: DateTime<Utc>,
    ) -> Result<Option<MutationRecord>, StoreError> {
        unavailable(&self.fail_lookups, "mutation ledger")?;
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|record| &record.source_reference == key && record.created_at >= since)
            .max_by_key(|record| record.created_at)
            .cloned())
    }

    async fn insert(&self, record: MutationRecord) -> Result<(), StoreError> {
        unavailable(&self.fail_inserts, "mutation ledger")?;
        self.records.write().await.push(record);
        Ok(())
    }
}

#[async_trait]
impl TaskHistory for InMemoryMutationLedger {
    async fn recent_completed(
        &self,
        client_id: &str,
        skill_id: &str,
        limit: usize,
    ) -> Result<Vec<CompletedTask>, StoreError> {
        unavailable(&self.fail_lookups, "mutation ledger")?;
        let mut completed = self
            .records
            .read()
            .await
            .iter()
            .filter(|record| record.client_id == client_id && record.skill_id == skill_id)
            .map(|record| CompletedTask {
                external_ref: record.external_ref.clone(),
                title: record.title.clone(),
                completed_at: record.created_at,
            })
            .collect::<Vec<_>>();
        completed.sort_by(|left, right| right.completed_at.cmp(&left.completed_at));
        completed.truncate(limit);
        Ok(completed)
    }
}

#[derive(Default)]
pub struct InMemoryOrphanEvents {
    events: RwLock<Vec<OrphanEvent>>,
    unavailable: AtomicBool,
}

impl InMemoryOrphanEvents {
    pub async fn events(&self) -> Vec<OrphanEvent> {
        self.events.read().await.clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrphanEventSink for InMemoryOrphanEvents {
    async fn record_orphan(&self, event: OrphanEvent) -> Result<(), StoreError> {
        unavailable(&self.unavailable, "orphan event sink")?;
        self.events.write().await.push(event);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryKnowledgeBase {
    sops: RwLock<Vec<SopDocument>>,
    internal: RwLock<Vec<InternalDocument>>,
    fail_sop: AtomicBool,
    fail_internal: AtomicBool,
}

impl InMemoryKnowledgeBase {
    pub async fn insert_sop(&self, document: SopDocument) {
        self.sops.write().await.push(document);
    }

    pub async fn insert_internal(&self, document: InternalDocument) {
        self.internal.write().await.push(document);
    }

    pub fn set_fail_sop(&self, fail: bool) {
        self.fail_sop.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_internal(&self, fail: bool) {
        self.fail_internal.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn find_sop_by_category(
        &self,
        category: &str,
    ) -> Result<Option<SopDocument>, StoreError> {
        unavailable(&self.fail_sop, "sop library")?;
        let sops = self.sops.read().await;
        Ok(sops.iter().find(|document| document.category.eq_ignore_ascii_case(category)).cloned())
    }

    async fn list_sop_documents(&self) -> Result<Vec<SopDocument>, StoreError> {
        unavailable(&self.fail_sop, "sop library")?;
        Ok(self.sops.read().await.clone())
    }

    async fn list_internal_documents(&self) -> Result<Vec<InternalDocument>, StoreError> {
        unavailable(&self.fail_internal, "internal library")?;
        Ok(self.internal.read().await.clone())
    }
}

/// Task service fake that replays scripted outcomes and counts calls.
///
/// Once the script runs out every call succeeds.
#[derive(Default)]
pub struct ScriptedTaskService {
    outcomes: tokio::sync::Mutex<Vec<Result<CreatedTask, TaskServiceError>>>,
    calls: AtomicUsize,
    requests: RwLock<Vec<TaskCreateRequest>>,
}

impl ScriptedTaskService {
    pub fn new(outcomes: Vec<Result<CreatedTask, TaskServiceError>>) -> Self {
        Self { outcomes: tokio::sync::Mutex::new(outcomes), ..Self::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn requests(&self) -> Vec<TaskCreateRequest> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl TaskService for ScriptedTaskService {
    async fn create(&self, request: &TaskCreateRequest) -> Result<CreatedTask, TaskServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.write().await.push(request.clone());
        let mut outcomes = self.outcomes.lock().await;
        if outcomes.is_empty() {
            return Ok(CreatedTask {
                id: format!("task-{call}"),
                url: format!("https://tasks.example.test/task-{call}"),
            });
        }
        outcomes.remove(0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::{json, Map, Value};

    use super::{InMemoryMutationLedger, InMemorySessionStore};
    use crate::domain::mutation::{IdempotencyKey, MutationRecord, MutationStatus};
    use crate::ports::{MutationLedger, SessionStore, TaskHistory};

    fn record(key: &str, status: MutationStatus, age_hours: i64) -> MutationRecord {
        MutationRecord {
            id: format!("rec-{key}-{age_hours}"),
            external_ref: format!("ext-{key}-{age_hours}"),
            external_url: String::new(),
            scope_id: "c1".to_string(),
            client_id: "c1".to_string(),
            skill_id: "create_task".to_string(),
            title: format!("title {age_hours}"),
            source_reference: IdempotencyKey(key.to_string()),
            status,
            created_at: Utc::now() - Duration::hours(age_hours),
        }
    }

    #[tokio::test]
    async fn session_store_merges_partial_context_and_clears_nulls() {
        let store = InMemorySessionStore::default();
        let session = store.get_or_create("U1").await.expect("session");

        let mut first = Map::new();
        first.insert("active_client_id".to_string(), json!("c1"));
        store.update_context(&session.id, first).await.expect("update");
        let mut second = Map::new();
        second.insert("active_client_id".to_string(), Value::Null);
        store.update_context(&session.id, second).await.expect("update");

        let reloaded = store.get_or_create("U1").await.expect("session");
        assert_eq!(reloaded.id, session.id);
        assert!(reloaded.active_client_id().is_none());
    }

    #[tokio::test]
    async fn ledger_lookup_honours_window() {
        let ledger = InMemoryMutationLedger::default();
        ledger.insert(record("k1", MutationStatus::Created, 30)).await.expect("insert");

        let since = Utc::now() - Duration::hours(24);
        assert!(ledger.find_by_key(&IdempotencyKey("k1".into()), since).await.expect("lookup").is_none());

        ledger.insert(record("k1", MutationStatus::Created, 1)).await.expect("insert");
        assert!(ledger.find_by_key(&IdempotencyKey("k1".into()), since).await.expect("lookup").is_some());
    }

    #[tokio::test]
    async fn history_returns_every_recorded_task_newest_first() {
        let ledger = InMemoryMutationLedger::default();
        ledger.insert(record("a", MutationStatus::Completed, 5)).await.expect("insert");
        ledger.insert(record("b", MutationStatus::Created, 1)).await.expect("insert");
        ledger.insert(record("c", MutationStatus::Completed, 2)).await.expect("insert");

        let history = ledger.recent_completed("c1", "create_task", 2).await.expect("history");

        assert_eq!(
            history.iter().map(|task| task.title.as_str()).collect::<Vec<_>>(),
            vec!["title 1", "title 2"]
        );
    }
}
