use std::fmt::Write as _;

use arbor_diff::CheckpointDiff;
use arbor_types::{CheckpointId, Message, SessionId};
use serde::{Deserialize, Serialize};

const SYSTEM_FRAMING: &str = "You are reconciling two diverging branches of one conversation. \
Both branches share the history above. Combine the content unique to branch A and branch B \
into a single coherent reply. Keep every point that does not conflict; where they conflict, \
follow the instruction if one is given, otherwise present both positions.";

/// Everything the chat engine needs to reconcile two branches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileRequest {
    pub session_id: SessionId,
    pub checkpoint_a: CheckpointId,
    pub checkpoint_b: CheckpointId,
    pub lca: CheckpointId,
    pub common_prefix: Vec<Message>,
    pub unique_a: Vec<Message>,
    pub unique_b: Vec<Message>,
    pub instruction: Option<String>,
}

impl ReconcileRequest {
    pub fn from_diff(session_id: SessionId, diff: &CheckpointDiff, instruction: Option<String>) -> Self {
        Self {
            session_id,
            checkpoint_a: diff.checkpoint_a,
            checkpoint_b: diff.checkpoint_b,
            lca: diff.lca.id,
            common_prefix: diff.common_prefix.clone(),
            unique_a: diff.unique_a.clone(),
            unique_b: diff.unique_b.clone(),
            instruction: instruction.filter(|i| !i.trim().is_empty()),
        }
    }

    /// Render the request as a chat transcript: system framing, the shared
    /// history verbatim, then one user turn laying out both branches and the
    /// instruction.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.common_prefix.len() + 2);
        messages.push(Message::system(SYSTEM_FRAMING));
        messages.extend(self.common_prefix.iter().cloned());

        let mut body = String::new();
        render_branch(&mut body, "Branch A", &self.unique_a);
        body.push('\n');
        render_branch(&mut body, "Branch B", &self.unique_b);
        if let Some(instruction) = &self.instruction {
            let _ = write!(body, "\nInstruction: {instruction}\n");
        }
        messages.push(Message::user(body));
        messages
    }
}

pub(crate) fn render_branch(out: &mut String, heading: &str, messages: &[Message]) {
    let _ = writeln!(out, "## {heading}");
    if messages.is_empty() {
        out.push_str("(no additional content)\n");
    }
    for message in messages {
        let _ = writeln!(out, "[{}] {}", message.role, message.content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::Role;

    fn request(instruction: Option<&str>) -> ReconcileRequest {
        ReconcileRequest {
            session_id: SessionId::new(),
            checkpoint_a: CheckpointId::new(),
            checkpoint_b: CheckpointId::new(),
            lca: CheckpointId::new(),
            common_prefix: vec![Message::user("plan a trip"), Message::assistant("where to?")],
            unique_a: vec![Message::user("by train")],
            unique_b: vec![Message::user("by plane")],
            instruction: instruction.map(str::to_string),
        }
    }

    #[test]
    fn transcript_layout() {
        let messages = request(Some("prefer the cheaper option")).to_messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "plan a trip");
        assert_eq!(messages[2].content, "where to?");

        let last = &messages[3];
        assert_eq!(last.role, Role::User);
        let a = last.content.find("## Branch A").unwrap();
        let b = last.content.find("## Branch B").unwrap();
        assert!(a < b);
        assert!(last.content.contains("[user] by train"));
        assert!(last.content.contains("[user] by plane"));
        assert!(last.content.ends_with("Instruction: prefer the cheaper option\n"));
    }

    #[test]
    fn empty_branch_is_marked() {
        let mut req = request(None);
        req.unique_a.clear();
        let body = &req.to_messages()[3].content;
        assert!(body.contains("## Branch A\n(no additional content)\n"));
        assert!(!body.contains("Instruction"));
    }
}
