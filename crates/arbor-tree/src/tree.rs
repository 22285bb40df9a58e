//! Flat, id-indexed reconstruction of a session's checkpoint tree.
//!
//! The tree is never materialised as nested owning nodes. [`TreeBuilder`]
//! groups the session's checkpoints by parent id in one pass, then walks
//! the roots with an explicit stack to emit nodes in a deterministic
//! pre-order (siblings by `(created_at, sequence)`).

use std::collections::HashMap;

use arbor_store::CheckpointStore;
use arbor_types::{Checkpoint, CheckpointId, CheckpointSummary, SessionId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TreeError, TreeResult};

/// One checkpoint placed in the rendered tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub summary: CheckpointSummary,
    /// Distance from the session root (roots are depth 0).
    pub depth: usize,
    pub child_count: usize,
}

/// A parent → child link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeEdge {
    pub parent: CheckpointId,
    pub child: CheckpointId,
}

/// Whole-session tree: pre-ordered nodes plus the edges between them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTree {
    pub session_id: SessionId,
    pub roots: Vec<CheckpointId>,
    pub nodes: Vec<TreeNode>,
    pub edges: Vec<TreeEdge>,
}

impl SessionTree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of checkpoints with no children, in pre-order.
    pub fn leaves(&self) -> Vec<CheckpointId> {
        self.nodes
            .iter()
            .filter(|node| node.child_count == 0)
            .map(|node| node.summary.id)
            .collect()
    }

    pub fn node(&self, id: &CheckpointId) -> Option<&TreeNode> {
        self.nodes.iter().find(|node| node.summary.id == *id)
    }
}

/// Builds [`SessionTree`]s from a checkpoint store.
pub struct TreeBuilder<'s, S: ?Sized> {
    store: &'s S,
}

impl<'s, S: CheckpointStore + ?Sized> TreeBuilder<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Reconstruct the tree of `session`. An unknown session yields an
    /// empty tree.
    pub fn build_tree(&self, session: &SessionId) -> TreeResult<SessionTree> {
        let checkpoints = self.store.list_by_session(session)?;
        let tree = assemble(*session, checkpoints)?;
        debug!(
            session = %session.short_id(),
            nodes = tree.nodes.len(),
            roots = tree.roots.len(),
            "built session tree"
        );
        Ok(tree)
    }
}

/// Assemble a tree from an unordered set of one session's checkpoints.
pub(crate) fn assemble(session: SessionId, checkpoints: Vec<Checkpoint>) -> TreeResult<SessionTree> {
    let total = checkpoints.len();

    let mut by_parent: HashMap<Option<CheckpointId>, Vec<Checkpoint>> = HashMap::new();
    for checkpoint in checkpoints {
        by_parent.entry(checkpoint.parent_id).or_default().push(checkpoint);
    }
    for group in by_parent.values_mut() {
        group.sort_by_key(Checkpoint::order_key);
    }

    let roots = by_parent.remove(&None).unwrap_or_default();
    let root_ids = roots.iter().map(|c| c.id).collect();

    let mut nodes = Vec::with_capacity(total);
    let mut edges = Vec::with_capacity(total.saturating_sub(1));
    let mut stack: Vec<(Checkpoint, usize)> = roots.into_iter().rev().map(|c| (c, 0)).collect();

    while let Some((checkpoint, depth)) = stack.pop() {
        let children = by_parent.remove(&Some(checkpoint.id)).unwrap_or_default();
        for child in children.iter() {
            edges.push(TreeEdge {
                parent: checkpoint.id,
                child: child.id,
            });
        }
        nodes.push(TreeNode {
            summary: checkpoint.summary(),
            depth,
            child_count: children.len(),
        });
        stack.extend(children.into_iter().rev().map(|c| (c, depth + 1)));
    }

    // Anything left over hangs off a parent that is not in this session.
    if let Some(orphan) = by_parent.into_values().flatten().next() {
        return Err(TreeError::Inconsistent {
            session,
            checkpoint: orphan.id,
            reason: "checkpoint is not reachable from any session root".into(),
        });
    }

    Ok(SessionTree {
        session_id: session,
        roots: root_ids,
        nodes,
        edges,
    })
}
