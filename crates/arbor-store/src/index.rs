//! Arena-plus-index representation of every committed checkpoint.
//!
//! The tree structure is held purely as id lists: `children` maps a parent
//! to its ordered child ids and each session keeps its ordered roots. Child
//! lists are kept sorted by `(created_at, sequence)` on insert.

use std::collections::HashMap;

use arbor_types::{Checkpoint, CheckpointId, SessionId, TemporalAnchor};
use tracing::warn;

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
struct SessionEntry {
    roots: Vec<CheckpointId>,
    /// Ordered by `sequence`.
    members: Vec<CheckpointId>,
}

#[derive(Debug, Default)]
pub(crate) struct CheckpointIndex {
    checkpoints: HashMap<CheckpointId, Checkpoint>,
    children: HashMap<CheckpointId, Vec<CheckpointId>>,
    sessions: HashMap<SessionId, SessionEntry>,
    /// Bumped on every reserved append; used for optimistic concurrency.
    versions: HashMap<SessionId, u64>,
    next_sequence: u64,
    latest_anchor: Option<TemporalAnchor>,
}

impl CheckpointIndex {
    /// Rebuild an index from checkpoints in their original append order.
    ///
    /// Checkpoints whose parent is missing (e.g. a parent frame was lost to
    /// corruption) are skipped with a warning, as are their descendants.
    pub(crate) fn rebuild(checkpoints: Vec<Checkpoint>) -> Self {
        let mut index = Self::default();
        for checkpoint in checkpoints {
            if let Err(err) = index.validate_parent(&checkpoint.session_id, checkpoint.parent_id.as_ref())
            {
                warn!(checkpoint = %checkpoint.id, error = %err, "dropping unreachable checkpoint");
                continue;
            }
            if index.checkpoints.contains_key(&checkpoint.id) {
                warn!(checkpoint = %checkpoint.id, "dropping duplicate checkpoint");
                continue;
            }
            index.next_sequence = index.next_sequence.max(checkpoint.sequence + 1);
            index.insert(checkpoint);
        }
        index
    }

    pub(crate) fn validate_parent(
        &self,
        session: &SessionId,
        parent: Option<&CheckpointId>,
    ) -> StoreResult<()> {
        let Some(parent) = parent else {
            return Ok(());
        };
        match self.checkpoints.get(parent) {
            None => Err(StoreError::InvalidParent {
                session: *session,
                parent: *parent,
                reason: "parent does not exist".into(),
            }),
            Some(found) if found.session_id != *session => Err(StoreError::InvalidParent {
                session: *session,
                parent: *parent,
                reason: format!("parent belongs to session {}", found.session_id),
            }),
            Some(_) => Ok(()),
        }
    }

    pub(crate) fn session_version(&self, session: &SessionId) -> u64 {
        self.versions.get(session).copied().unwrap_or(0)
    }

    /// Reserve the next append to `session` if its version is still
    /// `observed`. Returns the claimed sequence number.
    pub(crate) fn reserve(&mut self, session: &SessionId, observed: u64) -> Option<u64> {
        let version = self.versions.entry(*session).or_default();
        if *version != observed {
            return None;
        }
        *version += 1;
        Some(self.claim_sequence())
    }

    /// Claim the next insertion sequence number.
    fn claim_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    pub(crate) fn latest_anchor(&self) -> Option<TemporalAnchor> {
        self.latest_anchor
    }

    /// Publish a validated checkpoint.
    pub(crate) fn insert(&mut self, checkpoint: Checkpoint) {
        let key = checkpoint.order_key();
        let id = checkpoint.id;

        let siblings = match checkpoint.parent_id {
            Some(parent) => self.children.entry(parent).or_default(),
            None => &mut self.sessions.entry(checkpoint.session_id).or_default().roots,
        };
        let position = siblings.partition_point(|sibling| {
            self.checkpoints
                .get(sibling)
                .map(|c| c.order_key() <= key)
                .unwrap_or(true)
        });
        siblings.insert(position, id);

        let sequence = checkpoint.sequence;
        let members = &mut self.sessions.entry(checkpoint.session_id).or_default().members;
        let position = members.partition_point(|member| {
            self.checkpoints
                .get(member)
                .map(|c| c.sequence <= sequence)
                .unwrap_or(true)
        });
        members.insert(position, id);

        if self.latest_anchor.map_or(true, |a| checkpoint.created_at > a) {
            self.latest_anchor = Some(checkpoint.created_at);
        }
        self.checkpoints.insert(id, checkpoint);
    }

    pub(crate) fn get(&self, id: &CheckpointId) -> StoreResult<&Checkpoint> {
        self.checkpoints.get(id).ok_or(StoreError::NotFound(*id))
    }

    pub(crate) fn children(&self, parent: &CheckpointId) -> Vec<Checkpoint> {
        self.resolve(self.children.get(parent).map(Vec::as_slice).unwrap_or_default())
    }

    pub(crate) fn roots(&self, session: &SessionId) -> Vec<Checkpoint> {
        self.resolve(
            self.sessions
                .get(session)
                .map(|s| s.roots.as_slice())
                .unwrap_or_default(),
        )
    }

    pub(crate) fn ancestors(&self, id: &CheckpointId) -> StoreResult<Vec<Checkpoint>> {
        let mut chain = Vec::new();
        let mut current = Some(*id);
        while let Some(next) = current {
            let checkpoint = self.get(&next)?;
            current = checkpoint.parent_id;
            chain.push(checkpoint.clone());
        }
        Ok(chain)
    }

    pub(crate) fn list_by_session(&self, session: &SessionId) -> Vec<Checkpoint> {
        self.resolve(
            self.sessions
                .get(session)
                .map(|s| s.members.as_slice())
                .unwrap_or_default(),
        )
    }

    pub(crate) fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    pub(crate) fn len(&self) -> usize {
        self.checkpoints.len()
    }

    fn resolve(&self, ids: &[CheckpointId]) -> Vec<Checkpoint> {
        ids.iter()
            .filter_map(|id| self.checkpoints.get(id))
            .cloned()
            .collect()
    }
}
