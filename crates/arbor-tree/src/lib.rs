//! Read-only navigation over a session's checkpoint tree.
//!
//! - [`BranchResolver`] answers "which forks sit beside this checkpoint, and
//!   where is it among them?" for branch-navigation controls.
//! - [`TreeBuilder`] flattens a whole session into an id-indexed
//!   [`SessionTree`] (nodes in a stable pre-order plus parent/child edges)
//!   ready for rendering or serialization.
//!
//! Both only read from a [`CheckpointStore`](arbor_store::CheckpointStore)
//! and are safe to run concurrently with appends.

pub mod branch;
pub mod error;
pub mod tree;

pub use branch::{BranchResolver, BranchView};
pub use error::{TreeError, TreeResult};
pub use tree::{SessionTree, TreeBuilder, TreeEdge, TreeNode};
