//! Error types for the merge crate.

use arbor_diff::DiffError;
use arbor_store::StoreError;
use arbor_types::{CheckpointId, SessionId};

use crate::event::MergePhase;
use crate::session::SessionError;

/// Errors that can occur while merging two branches.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// The checkpoints are identical, unrelated, or outside the requested session.
    #[error("invalid merge of {a} and {b}: {reason}")]
    InvalidMerge {
        a: CheckpointId,
        b: CheckpointId,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// The chat engine failed or produced nothing during reconciliation.
    #[error("upstream chat engine failure merging {a} and {b} of session {session}: {reason}")]
    Upstream {
        session: SessionId,
        a: CheckpointId,
        b: CheckpointId,
        reason: String,
    },

    /// The caller cancelled, the event stream was dropped, or the deadline passed.
    #[error("merge of {a} and {b} of session {session} cancelled: {reason}")]
    Cancelled {
        session: SessionId,
        a: CheckpointId,
        b: CheckpointId,
        reason: String,
    },

    #[error("invalid merge phase transition {from} -> {to}")]
    InvalidTransition { from: MergePhase, to: MergePhase },

    /// The merge task panicked or was aborted.
    #[error("merge task failed: {0}")]
    Task(String),
}

impl MergeError {
    /// Session and checkpoint ids the error refers to, as strings.
    pub fn ids(&self) -> Vec<String> {
        match self {
            Self::InvalidMerge { a, b, .. } => vec![a.to_string(), b.to_string()],
            Self::Upstream { session, a, b, .. } | Self::Cancelled { session, a, b, .. } => {
                vec![session.to_string(), a.to_string(), b.to_string()]
            }
            Self::Store(err) => err.ids(),
            Self::Session(SessionError::NotFound(id)) => vec![id.to_string()],
            _ => Vec::new(),
        }
    }

    /// Returns `true` if the error was raised before any side effect.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::InvalidMerge { .. } | Self::Store(StoreError::NotFound(_))
        )
    }
}

impl From<DiffError> for MergeError {
    fn from(err: DiffError) -> Self {
        match err {
            DiffError::InvalidMerge { a, b, reason } => Self::InvalidMerge { a, b, reason },
            DiffError::Store(store) => Self::Store(store),
        }
    }
}

/// Convenience alias for merge results.
pub type MergeResult<T> = Result<T, MergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_after_resolve_name_their_checkpoints() {
        let (session, a, b) = (SessionId::new(), CheckpointId::new(), CheckpointId::new());
        let err = MergeError::Upstream {
            session,
            a,
            b,
            reason: "timeout".into(),
        };
        let text = err.to_string();
        assert!(text.contains(&a.to_string()) && text.contains(&b.to_string()));
        assert_eq!(err.ids(), vec![session.to_string(), a.to_string(), b.to_string()]);
        assert!(!err.is_structural());
    }

    #[test]
    fn store_errors_pass_their_ids_through() {
        let id = CheckpointId::new();
        let err = MergeError::from(StoreError::NotFound(id));
        assert_eq!(err.ids(), vec![id.to_string()]);
        assert!(err.is_structural());
        assert!(MergeError::Task("panicked".into()).ids().is_empty());
    }
}
