use arbor_types::{CheckpointId, SessionId};

/// Errors from checkpoint store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested checkpoint does not exist.
    #[error("checkpoint not found: {0}")]
    NotFound(CheckpointId),

    /// An append referenced a parent that is missing or owned by another session.
    #[error("invalid parent {parent} for session {session}: {reason}")]
    InvalidParent {
        session: SessionId,
        parent: CheckpointId,
        reason: String,
    },

    /// The session kept advancing underneath an append until retries ran out.
    #[error("concurrent modification of session {session} after {attempts} attempts")]
    ConcurrentModification { session: SessionId, attempts: u32 },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the append log.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A failed append could not be rolled back; the log must be reopened.
    #[error("checkpoint log at offset {offset} needs recovery: {reason}")]
    LogNeedsRecovery { offset: u64, reason: String },

    /// A lock guarding the index was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Checkpoint and session ids the error refers to, as strings.
    pub fn ids(&self) -> Vec<String> {
        match self {
            Self::NotFound(id) => vec![id.to_string()],
            Self::InvalidParent { session, parent, .. } => vec![session.to_string(), parent.to_string()],
            Self::ConcurrentModification { session, .. } => vec![session.to_string()],
            _ => Vec::new(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
