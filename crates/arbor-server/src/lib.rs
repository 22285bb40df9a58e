//! HTTP server for Arbor.
//!
//! Exposes the read-only navigation queries (checkpoints, branches, tree,
//! diff), the turn-completion append callback, and a server-sent-events
//! merge stream over a process-wide checkpoint store.

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ErrorBody, ServerError, ServerResult};
pub use server::ArborServer;
pub use state::AppState;
