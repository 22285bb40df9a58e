use std::sync::Arc;

use arbor_merge::{ChatEngine, InMemorySessionService, MergeConfig, MergeCoordinator};
use arbor_store::CheckpointStore;

/// Shared handles behind every request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CheckpointStore>,
    pub sessions: Arc<InMemorySessionService>,
    pub merges: Arc<MergeCoordinator>,
}

impl AppState {
    pub fn new(store: Arc<dyn CheckpointStore>, engine: Arc<dyn ChatEngine>, merge: MergeConfig) -> Self {
        let sessions = Arc::new(InMemorySessionService::new());
        let merges = MergeCoordinator::new(Arc::clone(&store), engine, sessions.clone(), merge);
        Self {
            store,
            sessions,
            merges: Arc::new(merges),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("merges", &self.merges)
            .finish_non_exhaustive()
    }
}
