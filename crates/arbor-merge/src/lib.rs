//! Merge of two diverging branches into a brand-new session.
//!
//! A merge runs as an explicit state machine:
//!
//! ```text
//! Resolving -> Reconciling -> Committing -> Done
//!      \            \             \
//!       `------------`-------------`--> Errored
//! ```
//!
//! `Resolving` diffs the two checkpoints and rejects unrelated or identical
//! inputs before anything is spawned. `Reconciling` streams fragments from a
//! [`ChatEngine`] and forwards each one as a [`MergeEvent::Chunk`]; it is the
//! only suspension point and is cancelable. `Committing` creates the new
//! session and its root checkpoint in one step, and only after the stream
//! completed successfully. Partial content is never committed.
//!
//! # Key Types
//!
//! - [`MergeCoordinator`] -- validates a [`MergeRequest`] and spawns the merge
//! - [`MergeHandle`] / [`MergeStream`] -- the event stream, cancel token, and outcome
//! - [`ChatEngine`] / [`SessionService`] -- external collaborators
//! - [`JuxtaposeEngine`] / [`InMemorySessionService`] -- bundled offline implementations

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod event;
pub mod prompt;
pub mod session;

pub use config::MergeConfig;
pub use coordinator::{
    MergeCommit, MergeCoordinator, MergeHandle, MergeOutcome, MergeRequest, MergeStream,
    PROVENANCE_CHECKPOINT_A, PROVENANCE_CHECKPOINT_B, PROVENANCE_INSTRUCTION, PROVENANCE_LCA,
    PROVENANCE_SOURCE_SESSION,
};
pub use engine::{ChatEngine, EngineError, FragmentStream, JuxtaposeEngine};
pub use error::{MergeError, MergeResult};
pub use event::{MergeEvent, MergePhase};
pub use prompt::ReconcileRequest;
pub use session::{InMemorySessionService, NewSession, SessionError, SessionRecord, SessionService};
