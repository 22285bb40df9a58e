use std::fmt;

use arbor_types::{CheckpointId, SessionId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MergeError, MergeResult};

/// One event on a merge stream.
///
/// Serialized with a `type` tag: `{"type":"chunk","content":...}`,
/// `{"type":"end","new_session_id":...}`, `{"type":"error","error":...,"ids":[...]}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MergeEvent {
    /// A reconciled content fragment, forwarded as soon as it arrives.
    Chunk { content: String },
    /// The merge committed.
    End {
        new_session_id: SessionId,
        root_checkpoint_id: CheckpointId,
    },
    /// The merge failed; nothing was committed. `ids` names the session and
    /// checkpoints involved.
    Error {
        error: String,
        #[serde(default)]
        ids: Vec<String>,
    },
}

impl MergeEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }
}

/// Phase of the merge state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePhase {
    Resolving,
    Reconciling,
    Committing,
    Done,
    Errored,
}

impl MergePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Errored)
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn advance(self, next: MergePhase) -> MergeResult<MergePhase> {
        let allowed = match (self, next) {
            (Self::Resolving, Self::Reconciling)
            | (Self::Reconciling, Self::Committing)
            | (Self::Committing, Self::Done) => true,
            (from, Self::Errored) => !from.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(MergeError::InvalidTransition {
                from: self,
                to: next,
            });
        }
        debug!(from = %self, to = %next, "merge phase transition");
        Ok(next)
    }
}

impl fmt::Display for MergePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolving => "resolving",
            Self::Reconciling => "reconciling",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}
