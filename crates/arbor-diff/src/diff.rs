//! Checkpoint-to-checkpoint divergence.
//!
//! [`DiffEngine::diff`] splits the histories of two checkpoints into the
//! part they share (root through the lowest common ancestor) and the part
//! unique to each side (strictly below the LCA, down to and including the
//! checkpoint). All message lists are in root-to-leaf order.

use arbor_store::CheckpointStore;
use arbor_types::{Checkpoint, CheckpointId, Message};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DiffError, DiffResult};
use crate::lca::lowest_common_ancestor;

/// The divergence between two checkpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointDiff {
    pub checkpoint_a: CheckpointId,
    pub checkpoint_b: CheckpointId,
    /// Messages from the root through the LCA, inclusive.
    pub common_prefix: Vec<Message>,
    /// Messages strictly below the LCA down to `checkpoint_a`.
    pub unique_a: Vec<Message>,
    /// Messages strictly below the LCA down to `checkpoint_b`.
    pub unique_b: Vec<Message>,
    pub lca: Checkpoint,
    /// Checkpoint ids strictly below the LCA down to `checkpoint_a`.
    pub path_a: Vec<CheckpointId>,
    /// Checkpoint ids strictly below the LCA down to `checkpoint_b`.
    pub path_b: Vec<CheckpointId>,
}

impl CheckpointDiff {
    /// Both sides are the same checkpoint.
    pub fn is_identical(&self) -> bool {
        self.checkpoint_a == self.checkpoint_b
    }

    /// One side is an ancestor of (or equal to) the other.
    pub fn is_ancestor_relation(&self) -> bool {
        self.path_a.is_empty() || self.path_b.is_empty()
    }
}

/// Computes [`CheckpointDiff`]s against a checkpoint store.
pub struct DiffEngine<'s, S: ?Sized> {
    store: &'s S,
}

impl<'s, S: CheckpointStore + ?Sized> DiffEngine<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Diff `a` against `b`.
    ///
    /// Fails with `NotFound` if either id is unknown and with `InvalidMerge`
    /// if their ancestor chains end at different roots.
    pub fn diff(&self, a: &CheckpointId, b: &CheckpointId) -> DiffResult<CheckpointDiff> {
        let chain_a = self.store.ancestors(a)?;
        let chain_b = self.store.ancestors(b)?;

        let root_a = chain_a.last().map(|c| c.id);
        let root_b = chain_b.last().map(|c| c.id);
        if root_a != root_b {
            return Err(DiffError::InvalidMerge {
                a: *a,
                b: *b,
                reason: "checkpoints do not share a root".into(),
            });
        }

        let ids_a: Vec<CheckpointId> = chain_a.iter().map(|c| c.id).collect();
        let ids_b: Vec<CheckpointId> = chain_b.iter().map(|c| c.id).collect();
        let lca_id = lowest_common_ancestor(&ids_a, &ids_b).ok_or_else(|| DiffError::InvalidMerge {
            a: *a,
            b: *b,
            reason: "no common ancestor".into(),
        })?;

        // Both chains contain the LCA, so these positions exist.
        let split_a = ids_a.iter().position(|id| *id == lca_id).unwrap_or(ids_a.len());
        let split_b = ids_b.iter().position(|id| *id == lca_id).unwrap_or(ids_b.len());

        let (below_a, shared) = chain_a.split_at(split_a);
        let below_b = &chain_b[..split_b];
        let lca = shared.first().cloned().ok_or(arbor_store::StoreError::NotFound(lca_id))?;

        let diff = CheckpointDiff {
            checkpoint_a: *a,
            checkpoint_b: *b,
            common_prefix: root_to_leaf_messages(shared),
            unique_a: root_to_leaf_messages(below_a),
            unique_b: root_to_leaf_messages(below_b),
            path_a: below_a.iter().rev().map(|c| c.id).collect(),
            path_b: below_b.iter().rev().map(|c| c.id).collect(),
            lca,
        };

        debug!(
            a = %a.short_id(),
            b = %b.short_id(),
            lca = %lca_id.short_id(),
            unique_a = diff.unique_a.len(),
            unique_b = diff.unique_b.len(),
            "computed checkpoint diff"
        );
        Ok(diff)
    }
}

/// Flatten a node-to-root slice into root-to-leaf message order.
fn root_to_leaf_messages(node_to_root: &[Checkpoint]) -> Vec<Message> {
    node_to_root
        .iter()
        .rev()
        .flat_map(|c| c.messages.iter().cloned())
        .collect()
}
