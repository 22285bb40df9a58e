//! Error types for the diff crate.

use arbor_types::CheckpointId;

/// Errors that can occur while diffing two checkpoints.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// The checkpoints do not share a root, so they cannot be diffed or merged.
    #[error("invalid merge of {a} and {b}: {reason}")]
    InvalidMerge {
        a: CheckpointId,
        b: CheckpointId,
        reason: String,
    },

    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] arbor_store::StoreError),
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;
