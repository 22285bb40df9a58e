//! The external chat engine seam.
//!
//! A [`ChatEngine`] turns a [`ReconcileRequest`] into a stream of text
//! fragments. The coordinator never retries it; a failed or empty stream
//! fails the merge.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::prompt::{render_branch, ReconcileRequest};

/// Stream of reconciled content fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

/// Errors reported by a chat engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The request could not be started.
    #[error("request failed: {0}")]
    Request(String),

    /// The stream broke after it started.
    #[error("stream failed: {0}")]
    Stream(String),
}

#[async_trait]
pub trait ChatEngine: Send + Sync {
    /// Start streaming a reconciliation of the two branches in `request`.
    async fn stream_reconciliation(&self, request: ReconcileRequest) -> Result<FragmentStream, EngineError>;
}

/// Deterministic engine that needs no model: it lays both branches' unique
/// content side by side under headings, one fragment per line.
///
/// Used by the offline server and CLI.
#[derive(Clone, Copy, Debug, Default)]
pub struct JuxtaposeEngine;

#[async_trait]
impl ChatEngine for JuxtaposeEngine {
    async fn stream_reconciliation(&self, request: ReconcileRequest) -> Result<FragmentStream, EngineError> {
        let mut text = String::new();
        render_branch(&mut text, "Branch A", &request.unique_a);
        text.push('\n');
        render_branch(&mut text, "Branch B", &request.unique_b);
        if let Some(instruction) = &request.instruction {
            text.push_str("\nRequested: ");
            text.push_str(instruction);
            text.push('\n');
        }

        let fragments: Vec<Result<String, EngineError>> =
            text.split_inclusive('\n').map(|line| Ok(line.to_string())).collect();
        Ok(Box::pin(futures::stream::iter(fragments)))
    }
}
