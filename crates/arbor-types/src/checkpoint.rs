//! The checkpoint record and its lightweight list view.
//!
//! A [`Checkpoint`] is immutable once appended. Siblings (checkpoints sharing
//! a parent) are totally ordered by [`Checkpoint::order_key`]: the creation
//! anchor first, then the store-assigned insertion sequence.

use serde::{Deserialize, Serialize};

use crate::identity::{CheckpointId, SessionId};
use crate::message::{Message, Metadata};
use crate::temporal::TemporalAnchor;

/// Maximum number of characters kept in a [`CheckpointSummary::preview`].
pub const PREVIEW_CHARS: usize = 80;

/// Immutable snapshot of conversation state produced by one turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub session_id: SessionId,
    /// `None` only for a session root.
    pub parent_id: Option<CheckpointId>,
    pub created_at: TemporalAnchor,
    /// Store-wide insertion sequence, assigned at append time.
    pub sequence: u64,
    /// Turn content attributable to this checkpoint, in order.
    pub messages: Vec<Message>,
    pub metadata: Metadata,
}

impl Checkpoint {
    /// Returns `true` if this checkpoint has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Sibling ordering key: `(created_at, sequence)`.
    pub fn order_key(&self) -> (TemporalAnchor, u64) {
        (self.created_at, self.sequence)
    }

    /// Short, single-line preview of the last message.
    pub fn preview(&self) -> String {
        let Some(last) = self.messages.last() else {
            return String::new();
        };
        let flattened = last.content.split_whitespace().collect::<Vec<_>>().join(" ");
        if flattened.chars().count() <= PREVIEW_CHARS {
            return flattened;
        }
        let mut truncated: String = flattened.chars().take(PREVIEW_CHARS).collect();
        truncated.push('…');
        truncated
    }

    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary::from(self)
    }
}

/// List view of a checkpoint, without its full message bodies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub id: CheckpointId,
    pub session_id: SessionId,
    pub parent_id: Option<CheckpointId>,
    pub created_at: TemporalAnchor,
    pub sequence: u64,
    pub message_count: usize,
    pub preview: String,
}

impl From<&Checkpoint> for CheckpointSummary {
    fn from(checkpoint: &Checkpoint) -> Self {
        Self {
            id: checkpoint.id,
            session_id: checkpoint.session_id,
            parent_id: checkpoint.parent_id,
            created_at: checkpoint.created_at,
            sequence: checkpoint.sequence,
            message_count: checkpoint.messages.len(),
            preview: checkpoint.preview(),
        }
    }
}
