use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use arbor_types::{Checkpoint, CheckpointId, Message, Metadata, SessionId, TemporalAnchor};
use tracing::debug;

use crate::clock::HybridLogicalClock;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::index::CheckpointIndex;
use crate::traits::CheckpointStore;

/// In-memory checkpoint store.
///
/// Intended for tests and embedding, and used as the index behind
/// [`LogCheckpointStore`](crate::LogCheckpointStore). Checkpoints are held
/// behind a `RwLock`; reads take the shared lock and clone out.
///
/// Appends are optimistic: the parent is validated and the session version
/// observed under the shared lock, then the clock is stamped without any lock.
/// A short exclusive section reserves the append only if the session version
/// is unchanged, claiming its sequence number. A lost race is retried with a
/// fresh stamp, which keeps `created_at` and `sequence` in the same order
/// within a session. The reserved checkpoint is persisted with no lock held
/// and published under a second short exclusive section.
pub struct InMemoryCheckpointStore {
    clock: HybridLogicalClock,
    index: RwLock<CheckpointIndex>,
    config: StoreConfig,
}

/// An append that has been validated and stamped but not yet reserved.
#[derive(Debug)]
pub(crate) struct PreparedAppend {
    session: SessionId,
    observed_version: u64,
    created_at: TemporalAnchor,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self::from_index(CheckpointIndex::default(), config)
    }

    pub(crate) fn from_index(index: CheckpointIndex, config: StoreConfig) -> Self {
        let clock = HybridLogicalClock::new(config.node_id);
        if let Some(latest) = index.latest_anchor() {
            clock.observe(&latest);
        }
        Self {
            clock,
            index: RwLock::new(index),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Append, calling `persist` before publishing.
    ///
    /// `persist` runs without the index lock, so readers and appends to
    /// other sessions are not held up by it. If it fails nothing is published.
    pub(crate) fn append_with<F>(
        &self,
        session: SessionId,
        parent: Option<CheckpointId>,
        messages: Vec<Message>,
        metadata: Metadata,
        persist: F,
    ) -> StoreResult<Checkpoint>
    where
        F: Fn(&Checkpoint) -> StoreResult<()>,
    {
        self.append_racing(session, parent, messages, metadata, persist, || {})
    }

    /// [`append_with`](Self::append_with) with a hook run between preparing
    /// and reserving each attempt.
    fn append_racing<F, H>(
        &self,
        session: SessionId,
        parent: Option<CheckpointId>,
        messages: Vec<Message>,
        metadata: Metadata,
        persist: F,
        before_reserve: H,
    ) -> StoreResult<Checkpoint>
    where
        F: Fn(&Checkpoint) -> StoreResult<()>,
        H: Fn(),
    {
        let attempts = self.config.max_attempts();

        for attempt in 1..=attempts {
            let prepared = self.prepare(session, parent)?;
            before_reserve();
            if let Some(sequence) = self.reserve(&prepared)? {
                let checkpoint = Checkpoint {
                    id: CheckpointId::new(),
                    session_id: session,
                    parent_id: parent,
                    created_at: prepared.created_at,
                    sequence,
                    messages,
                    metadata,
                };
                return self.publish(checkpoint, &persist);
            }
            debug!(
                session = %session.short_id(),
                attempt,
                "session advanced during append; retrying"
            );
        }

        Err(StoreError::ConcurrentModification { session, attempts })
    }

    pub(crate) fn prepare(
        &self,
        session: SessionId,
        parent: Option<CheckpointId>,
    ) -> StoreResult<PreparedAppend> {
        let observed_version = {
            let index = self.read_index()?;
            index.validate_parent(&session, parent.as_ref())?;
            index.session_version(&session)
        };
        Ok(PreparedAppend {
            session,
            observed_version,
            created_at: self.clock.now(),
        })
    }

    /// Reserve a prepared append. Returns `Ok(None)` if the session moved on.
    pub(crate) fn reserve(&self, prepared: &PreparedAppend) -> StoreResult<Option<u64>> {
        Ok(self
            .write_index()?
            .reserve(&prepared.session, prepared.observed_version))
    }

    fn publish<F>(&self, checkpoint: Checkpoint, persist: &F) -> StoreResult<Checkpoint>
    where
        F: Fn(&Checkpoint) -> StoreResult<()>,
    {
        persist(&checkpoint)?;
        self.write_index()?.insert(checkpoint.clone());

        debug!(
            checkpoint = %checkpoint.id.short_id(),
            session = %checkpoint.session_id.short_id(),
            sequence = checkpoint.sequence,
            root = checkpoint.is_root(),
            "appended checkpoint"
        );
        Ok(checkpoint)
    }

    fn read_index(&self) -> StoreResult<RwLockReadGuard<'_, CheckpointIndex>> {
        self.index.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write_index(&self) -> StoreResult<RwLockWriteGuard<'_, CheckpointIndex>> {
        self.index.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn append(
        &self,
        session: SessionId,
        parent: Option<CheckpointId>,
        messages: Vec<Message>,
        metadata: Metadata,
    ) -> StoreResult<Checkpoint> {
        self.append_with(session, parent, messages, metadata, |_| Ok(()))
    }

    fn get(&self, id: &CheckpointId) -> StoreResult<Checkpoint> {
        self.read_index()?.get(id).cloned()
    }

    fn children(&self, parent: &CheckpointId) -> StoreResult<Vec<Checkpoint>> {
        Ok(self.read_index()?.children(parent))
    }

    fn roots(&self, session: &SessionId) -> StoreResult<Vec<Checkpoint>> {
        Ok(self.read_index()?.roots(session))
    }

    fn ancestors(&self, id: &CheckpointId) -> StoreResult<Vec<Checkpoint>> {
        self.read_index()?.ancestors(id)
    }

    fn list_by_session(&self, session: &SessionId) -> StoreResult<Vec<Checkpoint>> {
        Ok(self.read_index()?.list_by_session(session))
    }

    fn sessions(&self) -> StoreResult<Vec<SessionId>> {
        Ok(self.read_index()?.sessions())
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.read_index()?.len())
    }
}

impl std::fmt::Debug for InMemoryCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.len().unwrap_or_default();
        f.debug_struct("InMemoryCheckpointStore")
            .field("checkpoint_count", &count)
            .finish()
    }
}
