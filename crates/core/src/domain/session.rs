use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::conversation::ConversationExchange;
use crate::domain::pending::PendingTaskCreate;

pub const PENDING_TASK_CREATE_KEY: &str = "pending_task_create";
pub const RECENT_EXCHANGES_KEY: &str = "recent_exchanges";
pub const ACTIVE_CLIENT_ID_KEY: &str = "active_client_id";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub external_user_id: String,
    pub profile_id: Option<String>,
    pub context: SessionContext,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn active_client_id(&self) -> Option<&str> {
        self.context.active_client_id.as_deref()
    }
}

/// Typed view over the stored context blob.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionContext {
    pub pending_task_create: Option<PendingTaskCreate>,
    pub recent_exchanges: Vec<ConversationExchange>,
    pub active_client_id: Option<String>,
}

impl SessionContext {
    /// Reads the stored blob field by field. A malformed field is dropped
    /// rather than failing the whole session.
    pub fn from_json(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            if !value.is_null() {
                warn!(
                    event_name = "session.context.invalid_blob",
                    "session context is not a json object; starting from empty context"
                );
            }
            return Self::default();
        };

        Self {
            pending_task_create: read_field(map, PENDING_TASK_CREATE_KEY),
            recent_exchanges: read_field(map, RECENT_EXCHANGES_KEY).unwrap_or_default(),
            active_client_id: read_field(map, ACTIVE_CLIENT_ID_KEY),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        if let Some(pending) = &self.pending_task_create {
            if let Ok(value) = serde_json::to_value(pending) {
                map.insert(PENDING_TASK_CREATE_KEY.to_string(), value);
            }
        }
        if !self.recent_exchanges.is_empty() {
            if let Ok(value) = serde_json::to_value(&self.recent_exchanges) {
                map.insert(RECENT_EXCHANGES_KEY.to_string(), value);
            }
        }
        if let Some(client_id) = &self.active_client_id {
            map.insert(ACTIVE_CLIENT_ID_KEY.to_string(), Value::String(client_id.clone()));
        }
        Value::Object(map)
    }

    pub fn apply(&mut self, patch: &ContextPatch) {
        patch.pending_task_create.apply_to(&mut self.pending_task_create);
        patch.active_client_id.apply_to(&mut self.active_client_id);
        match &patch.recent_exchanges {
            Patch::Absent => {}
            Patch::Clear => self.recent_exchanges.clear(),
            Patch::Set(exchanges) => self.recent_exchanges = exchanges.clone(),
        }
    }
}

fn read_field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str) -> Option<T> {
    let value = map.get(key).filter(|value| !value.is_null())?;
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            warn!(
                event_name = "session.context.invalid_field",
                field = key,
                error = %error,
                "dropping malformed session context field"
            );
            None
        }
    }
}

/// One field of a partial context update.
///
/// `Absent` leaves the stored value alone, `Clear` removes it and `Set`
/// replaces it.
#[derive(Clone, Debug, PartialEq)]
pub enum Patch<T> {
    Absent,
    Clear,
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Self::Absent
    }
}

impl<T: Clone> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn apply_to(&self, target: &mut Option<T>) {
        match self {
            Self::Absent => {}
            Self::Clear => *target = None,
            Self::Set(value) => *target = Some(value.clone()),
        }
    }
}

impl<T: Serialize> Patch<T> {
    fn write_into(&self, key: &str, map: &mut Map<String, Value>) -> Result<(), serde_json::Error> {
        match self {
            Self::Absent => {}
            Self::Clear => {
                map.insert(key.to_string(), Value::Null);
            }
            Self::Set(value) => {
                map.insert(key.to_string(), serde_json::to_value(value)?);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContextPatch {
    pub pending_task_create: Patch<PendingTaskCreate>,
    pub recent_exchanges: Patch<Vec<ConversationExchange>>,
    pub active_client_id: Patch<String>,
}

impl ContextPatch {
    pub fn is_empty(&self) -> bool {
        self.pending_task_create.is_absent()
            && self.recent_exchanges.is_absent()
            && self.active_client_id.is_absent()
    }

    pub fn pending(pending: PendingTaskCreate) -> Self {
        Self { pending_task_create: Patch::Set(pending), ..Self::default() }
    }

    pub fn clear_pending() -> Self {
        Self { pending_task_create: Patch::Clear, ..Self::default() }
    }

    /// Combines two patches; fields present in `other` win.
    pub fn merge(mut self, other: ContextPatch) -> Self {
        if !other.pending_task_create.is_absent() {
            self.pending_task_create = other.pending_task_create;
        }
        if !other.recent_exchanges.is_absent() {
            self.recent_exchanges = other.recent_exchanges;
        }
        if !other.active_client_id.is_absent() {
            self.active_client_id = other.active_client_id;
        }
        self
    }

    /// Wire form of the patch: absent fields are omitted and cleared fields
    /// are written as `null`.
    pub fn to_partial_map(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let mut map = Map::new();
        self.pending_task_create.write_into(PENDING_TASK_CREATE_KEY, &mut map)?;
        self.recent_exchanges.write_into(RECENT_EXCHANGES_KEY, &mut map)?;
        self.active_client_id.write_into(ACTIVE_CLIENT_ID_KEY, &mut map)?;
        Ok(map)
    }
}

/// Merges a partial map into a stored context object. A `null` value clears
/// the key.
pub fn merge_partial(target: &mut Map<String, Value>, partial: &Map<String, Value>) {
    for (key, value) in partial {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}
