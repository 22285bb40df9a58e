use arbor_store::StoreError;
use arbor_types::{CheckpointId, SessionId};

/// Errors from branch and tree queries.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The store returned a structure that does not form a rooted tree.
    #[error("inconsistent tree in session {session} at checkpoint {checkpoint}: {reason}")]
    Inconsistent {
        session: SessionId,
        checkpoint: CheckpointId,
        reason: String,
    },
}

pub type TreeResult<T> = Result<T, TreeError>;
