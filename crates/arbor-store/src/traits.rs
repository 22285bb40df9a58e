use arbor_types::{Checkpoint, CheckpointId, Message, Metadata, SessionId};

use crate::error::StoreResult;

/// Append-only checkpoint store.
///
/// All implementations must satisfy these invariants:
/// - A non-root checkpoint's parent exists and belongs to the same session.
/// - Checkpoint ids are assigned by the store and never reused.
/// - Committed checkpoints are never updated or deleted.
/// - Siblings are returned ordered by `(created_at, sequence)`.
pub trait CheckpointStore: Send + Sync {
    /// Append a new checkpoint to `session` under `parent`.
    ///
    /// Fails with `InvalidParent` if `parent` is unknown or belongs to a
    /// different session. A `None` parent starts a new root.
    fn append(
        &self,
        session: SessionId,
        parent: Option<CheckpointId>,
        messages: Vec<Message>,
        metadata: Metadata,
    ) -> StoreResult<Checkpoint>;

    /// Read a checkpoint by id. Fails with `NotFound` if absent.
    fn get(&self, id: &CheckpointId) -> StoreResult<Checkpoint>;

    /// Ordered children of `parent`; empty if it has none.
    fn children(&self, parent: &CheckpointId) -> StoreResult<Vec<Checkpoint>>;

    /// Ordered root checkpoints of `session`; empty for an unknown session.
    fn roots(&self, session: &SessionId) -> StoreResult<Vec<Checkpoint>>;

    /// The checkpoint itself followed by each ancestor up to and including
    /// its root. Fails with `NotFound` if `id` is unknown.
    fn ancestors(&self, id: &CheckpointId) -> StoreResult<Vec<Checkpoint>>;

    /// Every checkpoint of `session`, in no particular order.
    fn list_by_session(&self, session: &SessionId) -> StoreResult<Vec<Checkpoint>>;

    /// Sessions that own at least one checkpoint.
    fn sessions(&self) -> StoreResult<Vec<SessionId>>;

    /// Total number of committed checkpoints.
    fn len(&self) -> StoreResult<usize>;

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}
