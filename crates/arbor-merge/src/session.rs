use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use arbor_types::SessionId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors reported by a [`SessionService`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session service error: {0}")]
    Backend(String),
}

/// A session record to create.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub title: String,
    /// The session a merge was taken from, if any.
    pub merged_from: Option<SessionId>,
}

/// Human-facing session metadata owned by the session service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub title: String,
    pub merged_from: Option<SessionId>,
    pub created_at_ms: u64,
}

/// Owner of session records. The merge commit creates one session and
/// discards it again if the root checkpoint cannot be appended.
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn create_session(&self, new: NewSession) -> Result<SessionRecord, SessionError>;

    async fn discard_session(&self, id: &SessionId) -> Result<(), SessionError>;
}

/// Session records held in process memory.
#[derive(Debug, Default)]
pub struct InMemorySessionService {
    records: RwLock<HashMap<SessionId, SessionRecord>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SessionId) -> Result<SessionRecord, SessionError> {
        self.read()?.get(id).cloned().ok_or(SessionError::NotFound(*id))
    }

    /// All records, oldest first.
    pub fn list(&self) -> Result<Vec<SessionRecord>, SessionError> {
        let mut records: Vec<SessionRecord> = self.read()?.values().cloned().collect();
        records.sort_by_key(|r| (r.created_at_ms, r.id));
        Ok(records)
    }

    pub fn len(&self) -> Result<usize, SessionError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, SessionError> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<SessionId, SessionRecord>>, SessionError> {
        self.records
            .read()
            .map_err(|_| SessionError::Backend("session lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<SessionId, SessionRecord>>, SessionError> {
        self.records
            .write()
            .map_err(|_| SessionError::Backend("session lock poisoned".into()))
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn create_session(&self, new: NewSession) -> Result<SessionRecord, SessionError> {
        let record = SessionRecord {
            id: SessionId::new(),
            title: new.title,
            merged_from: new.merged_from,
            created_at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        };
        self.write()?.insert(record.id, record.clone());
        debug!(session = %record.id.short_id(), title = %record.title, "created session");
        Ok(record)
    }

    async fn discard_session(&self, id: &SessionId) -> Result<(), SessionError> {
        self.write()?.remove(id).ok_or(SessionError::NotFound(*id))?;
        debug!(session = %id.short_id(), "discarded session");
        Ok(())
    }
}
