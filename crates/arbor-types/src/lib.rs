//! Foundation types for Arbor, the branching conversation history engine.
//!
//! Every conversational turn is recorded as an immutable, parent-linked
//! [`Checkpoint`]. The checkpoints of one session form a rooted tree that can
//! be navigated, diffed, and merged by the higher-level Arbor crates.
//!
//! # Key Types
//!
//! - [`CheckpointId`]: UUID v7 identifier assigned at append time, never reused
//! - [`SessionId`]: UUID v7 identifier of the owning conversation thread
//! - [`TemporalAnchor`]: Hybrid Logical Clock timestamp used as `created_at`
//! - [`Message`] / [`Role`]: turn content attributable to a checkpoint
//! - [`Checkpoint`] / [`CheckpointSummary`]: the stored record and its list view

pub mod checkpoint;
pub mod error;
pub mod identity;
pub mod message;
pub mod temporal;

pub use checkpoint::{Checkpoint, CheckpointSummary, PREVIEW_CHARS};
pub use error::TypeError;
pub use identity::{CheckpointId, SessionId};
pub use message::{Message, Metadata, Role};
pub use temporal::TemporalAnchor;
