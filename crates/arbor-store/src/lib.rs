//! Append-only checkpoint storage for Arbor.
//!
//! Checkpoints are immutable records keyed by [`CheckpointId`] and linked to
//! their parent. The store keeps an arena of checkpoints plus id-based
//! indexes (parent → children, session → roots/members) so that every
//! navigation query is a lookup, never a reconstruction of nested objects.
//!
//! # Backends
//!
//! All backends implement the [`CheckpointStore`] trait:
//!
//! - [`InMemoryCheckpointStore`] -- arena store for tests and embedding
//! - [`LogCheckpointStore`] -- the in-memory arena fronted by a CRC-framed
//!   append log that is replayed on open
//!
//! # Design Rules
//!
//! 1. Checkpoints are never mutated or deleted once committed.
//! 2. Reads are safe to run concurrently (committed data is immutable).
//! 3. Appends to one session are serialized by an optimistic version check;
//!    appends to different sessions never conflict.
//! 4. Persist-then-publish: a checkpoint becomes visible only after the
//!    backend has durably accepted it.
//!
//! [`CheckpointId`]: arbor_types::CheckpointId

pub mod clock;
pub mod config;
pub mod durable;
pub mod error;
mod index;
pub mod log;
pub mod memory;
pub mod traits;

pub use clock::HybridLogicalClock;
pub use config::{StoreConfig, SyncMode};
pub use durable::LogCheckpointStore;
pub use error::{StoreError, StoreResult};
pub use log::{CheckpointLog, Recovery};
pub use memory::InMemoryCheckpointStore;
pub use traits::CheckpointStore;
