use arbor_store::CheckpointStore;
use arbor_types::{CheckpointId, CheckpointSummary, SessionId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TreeError, TreeResult};

/// The siblings of one checkpoint and its position among them.
///
/// `total <= 1` means there is nothing to navigate between; the counts are
/// still reported exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchView {
    /// Siblings in `(created_at, sequence)` order, including the checkpoint itself.
    pub siblings: Vec<CheckpointSummary>,
    pub current_index: usize,
    pub total: usize,
}

impl BranchView {
    /// Returns `true` if the checkpoint has at least one sibling fork.
    pub fn has_branches(&self) -> bool {
        self.total > 1
    }

    /// `None` only for a hand-built or deserialized view whose index is out of range.
    pub fn current(&self) -> Option<&CheckpointSummary> {
        self.siblings.get(self.current_index)
    }

    /// The sibling ordered immediately before the current one.
    pub fn previous(&self) -> Option<&CheckpointSummary> {
        self.current_index
            .checked_sub(1)
            .and_then(|i| self.siblings.get(i))
    }

    /// The sibling ordered immediately after the current one.
    pub fn next(&self) -> Option<&CheckpointSummary> {
        self.current_index
            .checked_add(1)
            .and_then(|i| self.siblings.get(i))
    }
}

/// Resolves sibling forks for branch navigation.
pub struct BranchResolver<'s, S: ?Sized> {
    store: &'s S,
}

impl<'s, S: CheckpointStore + ?Sized> BranchResolver<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// List the siblings of `id`.
    ///
    /// A root's siblings are every root of its session. Fails with
    /// `NotFound` for an unknown checkpoint.
    pub fn list_branches(&self, id: &CheckpointId) -> TreeResult<BranchView> {
        let checkpoint = self.store.get(id)?;
        let siblings = match checkpoint.parent_id {
            Some(parent) => self.store.children(&parent)?,
            None => self.store.roots(&checkpoint.session_id)?,
        };

        let current_index = siblings
            .iter()
            .position(|sibling| sibling.id == *id)
            .ok_or_else(|| missing_from_siblings(checkpoint.session_id, *id))?;

        debug!(
            checkpoint = %id.short_id(),
            index = current_index,
            total = siblings.len(),
            "resolved branches"
        );

        Ok(BranchView {
            total: siblings.len(),
            current_index,
            siblings: siblings.iter().map(CheckpointSummary::from).collect(),
        })
    }
}

fn missing_from_siblings(session: SessionId, checkpoint: CheckpointId) -> TreeError {
    TreeError::Inconsistent {
        session,
        checkpoint,
        reason: "checkpoint missing from its own sibling list".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_store::{InMemoryCheckpointStore, StoreError};
    use arbor_types::{Checkpoint, Message, Metadata};

    fn turn(store: &InMemoryCheckpointStore, session: SessionId, parent: Option<&Checkpoint>, text: &str) -> Checkpoint {
        store
            .append(session, parent.map(|p| p.id), vec![Message::user(text)], Metadata::new())
            .unwrap()
    }

    #[test]
    fn fork_reports_position_among_siblings() {
        let store = InMemoryCheckpointStore::new();
        let session = SessionId::new();
        let c0 = turn(&store, session, None, "c0");
        let c1 = turn(&store, session, Some(&c0), "c1");
        let c2 = turn(&store, session, Some(&c1), "c2");
        let c3 = turn(&store, session, Some(&c1), "c3");

        let resolver = BranchResolver::new(&store);

        let view = resolver.list_branches(&c2.id).unwrap();
        let ids: Vec<CheckpointId> = view.siblings.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![c2.id, c3.id]);
        assert_eq!(view.current_index, 0);
        assert_eq!(view.total, 2);
        assert!(view.has_branches());
        assert_eq!(view.current().map(|s| s.id), Some(c2.id));
        assert!(view.previous().is_none());
        assert_eq!(view.next().map(|s| s.id), Some(c3.id));

        let view = resolver.list_branches(&c3.id).unwrap();
        assert_eq!(view.current_index, 1);
        assert_eq!(view.previous().map(|s| s.id), Some(c2.id));
        assert!(view.next().is_none());
    }

    #[test]
    fn single_child_has_no_branches() {
        let store = InMemoryCheckpointStore::new();
        let session = SessionId::new();
        let c0 = turn(&store, session, None, "c0");
        let c1 = turn(&store, session, Some(&c0), "c1");

        let view = BranchResolver::new(&store).list_branches(&c1.id).unwrap();
        assert_eq!(view.total, 1);
        assert_eq!(view.current_index, 0);
        assert!(!view.has_branches());
    }

    #[test]
    fn roots_are_siblings_of_each_other() {
        let store = InMemoryCheckpointStore::new();
        let session = SessionId::new();
        let first = turn(&store, session, None, "first");
        let second = turn(&store, session, None, "second");
        // A root in another session is not a sibling.
        turn(&store, SessionId::new(), None, "elsewhere");

        let view = BranchResolver::new(&store).list_branches(&second.id).unwrap();
        let ids: Vec<CheckpointId> = view.siblings.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(view.current_index, 1);
    }

    #[test]
    fn total_matches_parent_children() {
        let store = InMemoryCheckpointStore::new();
        let session = SessionId::new();
        let root = turn(&store, session, None, "root");
        let kids: Vec<Checkpoint> = (0..5)
            .map(|i| turn(&store, session, Some(&root), &format!("kid {i}")))
            .collect();

        let resolver = BranchResolver::new(&store);
        for kid in &kids {
            let view = resolver.list_branches(&kid.id).unwrap();
            assert_eq!(view.total, store.children(&root.id).unwrap().len());
            assert_eq!(view.siblings[view.current_index].id, kid.id);
        }
    }

    #[test]
    fn out_of_range_view_has_no_current() {
        let store = InMemoryCheckpointStore::new();
        let root = turn(&store, SessionId::new(), None, "hello");
        let mut view = BranchResolver::new(&store).list_branches(&root.id).unwrap();
        view.current_index = 7;
        assert!(view.current().is_none());
        assert!(view.next().is_none());
        assert!(view.previous().is_none());

        let json = serde_json::json!({ "siblings": [], "current_index": 0, "total": 0 });
        let empty: BranchView = serde_json::from_value(json).unwrap();
        assert!(empty.current().is_none());
    }

    #[test]
    fn unknown_checkpoint_is_not_found() {
        let store = InMemoryCheckpointStore::new();
        let missing = CheckpointId::new();
        let err = BranchResolver::new(&store).list_branches(&missing).unwrap_err();
        assert!(matches!(err, TreeError::Store(StoreError::NotFound(id)) if id == missing));
    }

    #[test]
    fn view_serializes_with_snake_case_fields() {
        let store = InMemoryCheckpointStore::new();
        let root = turn(&store, SessionId::new(), None, "hello");
        let view = BranchResolver::new(&store).list_branches(&root.id).unwrap();
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["current_index"], 0);
        assert_eq!(json["total"], 1);
        assert_eq!(json["siblings"][0]["preview"], "hello");
    }
}
