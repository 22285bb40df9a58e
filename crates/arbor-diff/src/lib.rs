//! Divergence diffing between two checkpoints of one session tree.
//!
//! # Key Types
//!
//! - [`DiffEngine`] -- computes a [`CheckpointDiff`] from a checkpoint store
//! - [`CheckpointDiff`] -- shared history, each side's unique messages, and the LCA
//! - [`lowest_common_ancestor`] -- the pure LCA step over node-to-root id chains

pub mod diff;
pub mod error;
pub mod lca;

pub use diff::{CheckpointDiff, DiffEngine};
pub use error::{DiffError, DiffResult};
pub use lca::lowest_common_ancestor;
