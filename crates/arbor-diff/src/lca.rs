use std::collections::HashSet;

use arbor_types::CheckpointId;

/// Lowest common ancestor of two node-to-root chains.
///
/// Each chain starts at a checkpoint and ends at its root. Every id of
/// `chain_a` goes into a set; the first id of `chain_b` found in that set is
/// the deepest shared ancestor. Returns `None` when the chains share
/// nothing.
pub fn lowest_common_ancestor(
    chain_a: &[CheckpointId],
    chain_b: &[CheckpointId],
) -> Option<CheckpointId> {
    let seen: HashSet<&CheckpointId> = chain_a.iter().collect();
    chain_b.iter().find(|id| seen.contains(id)).copied()
}
