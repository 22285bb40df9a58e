use std::sync::Arc;

use arbor_merge::{ChatEngine, JuxtaposeEngine};
use arbor_store::LogCheckpointStore;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::build_router;
use crate::state::AppState;

/// Arbor checkpoint server.
///
/// Owns the process-wide store: opened (and recovered) in [`open`], flushed
/// when [`serve`] returns.
///
/// [`open`]: ArborServer::open
/// [`serve`]: ArborServer::serve
pub struct ArborServer {
    config: ServerConfig,
    store: Arc<LogCheckpointStore>,
    state: AppState,
}

impl ArborServer {
    /// Open the checkpoint log under `config.data_dir` with the offline
    /// [`JuxtaposeEngine`] as chat engine.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        Self::open_with_engine(config, Arc::new(JuxtaposeEngine))
    }

    pub fn open_with_engine(config: ServerConfig, engine: Arc<dyn ChatEngine>) -> ServerResult<Self> {
        let store = Arc::new(LogCheckpointStore::open(&config.log_path(), config.store.clone())?);
        let state = AppState::new(store.clone(), engine, config.merge.clone());
        Ok(Self { config, store, state })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Serve until Ctrl-C, then flush the checkpoint log.
    pub async fn serve(self) -> ServerResult<()> {
        let app = self.router();
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(
            addr = %self.config.bind_addr,
            data_dir = %self.config.data_dir.display(),
            "Arbor server listening"
        );
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        self.store.flush()?;
        info!("Arbor server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
