use std::convert::Infallible;

use arbor_diff::{CheckpointDiff, DiffEngine};
use arbor_merge::MergeRequest;
use arbor_store::CheckpointStore;
use arbor_tree::{BranchResolver, BranchView, SessionTree, TreeBuilder};
use arbor_types::{Checkpoint, CheckpointId, CheckpointSummary, Message, Metadata, SessionId};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionListing {
    pub session_id: SessionId,
    pub checkpoint_count: usize,
    pub title: Option<String>,
}

/// Turn-completion callback body.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppendCheckpointBody {
    #[serde(default)]
    pub parent_id: Option<CheckpointId>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DiffQuery {
    pub a: CheckpointId,
    pub b: CheckpointId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MergeBody {
    pub checkpoint_a: CheckpointId,
    pub checkpoint_b: CheckpointId,
    #[serde(default)]
    pub instruction: Option<String>,
}

/// Health check handler.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Info handler.
pub async fn info_handler(State(state): State<AppState>) -> ServerResult<Json<serde_json::Value>> {
    Ok(Json(json!({
        "name": "arbor-server",
        "version": env!("CARGO_PKG_VERSION"),
        "checkpoints": state.store.len()?,
        "sessions": state.store.sessions()?.len(),
    })))
}

pub async fn list_sessions(State(state): State<AppState>) -> ServerResult<Json<Vec<SessionListing>>> {
    let mut listings = Vec::new();
    for session_id in state.store.sessions()? {
        listings.push(SessionListing {
            session_id,
            checkpoint_count: state.store.list_by_session(&session_id)?.len(),
            title: state.sessions.get(&session_id).ok().map(|r| r.title),
        });
    }
    Ok(Json(listings))
}

/// Flat checkpoint summaries, ordered by `(created_at, sequence)`.
pub async fn list_checkpoints(
    State(state): State<AppState>,
    Path(session): Path<SessionId>,
) -> ServerResult<Json<Vec<CheckpointSummary>>> {
    let mut checkpoints = state.store.list_by_session(&session)?;
    checkpoints.sort_by_key(Checkpoint::order_key);
    Ok(Json(checkpoints.iter().map(CheckpointSummary::from).collect()))
}

pub async fn append_checkpoint(
    State(state): State<AppState>,
    Path(session): Path<SessionId>,
    Json(body): Json<AppendCheckpointBody>,
) -> ServerResult<(StatusCode, Json<CheckpointSummary>)> {
    if body.messages.is_empty() {
        return Err(ServerError::BadRequest("a checkpoint needs at least one message".into()));
    }

    let store = state.store.clone();
    let checkpoint = tokio::task::spawn_blocking(move || {
        store.append(session, body.parent_id, body.messages, body.metadata)
    })
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))??;

    Ok((StatusCode::CREATED, Json(checkpoint.summary())))
}

pub async fn list_branches(
    State(state): State<AppState>,
    Path((session, checkpoint)): Path<(SessionId, CheckpointId)>,
) -> ServerResult<Json<BranchView>> {
    require_in_session(state.store.as_ref(), &session, &checkpoint)?;
    let view = BranchResolver::new(state.store.as_ref()).list_branches(&checkpoint)?;
    Ok(Json(view))
}

pub async fn session_tree(
    State(state): State<AppState>,
    Path(session): Path<SessionId>,
) -> ServerResult<Json<SessionTree>> {
    Ok(Json(TreeBuilder::new(state.store.as_ref()).build_tree(&session)?))
}

pub async fn diff_checkpoints(
    State(state): State<AppState>,
    Path(session): Path<SessionId>,
    Query(query): Query<DiffQuery>,
) -> ServerResult<Json<CheckpointDiff>> {
    require_in_session(state.store.as_ref(), &session, &query.a)?;
    require_in_session(state.store.as_ref(), &session, &query.b)?;
    Ok(Json(DiffEngine::new(state.store.as_ref()).diff(&query.a, &query.b)?))
}

/// Start a merge and stream its events as server-sent events.
///
/// Structural errors are returned as a plain JSON error before the stream
/// opens. A client disconnect drops the stream, which cancels the merge.
pub async fn merge_checkpoints(
    State(state): State<AppState>,
    Path(session): Path<SessionId>,
    Json(body): Json<MergeBody>,
) -> ServerResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    require_in_session(state.store.as_ref(), &session, &body.checkpoint_a)?;
    require_in_session(state.store.as_ref(), &session, &body.checkpoint_b)?;

    let request = MergeRequest {
        session_id: session,
        checkpoint_a: body.checkpoint_a,
        checkpoint_b: body.checkpoint_b,
        instruction: body.instruction,
    };
    let handle = state.merges.merge(request, CancellationToken::new())?;
    debug!(session = %session.short_id(), "merge stream opened");

    let events = handle.events.map(|event| {
        let event = Event::default().json_data(&event).unwrap_or_else(|e| {
            warn!(error = %e, "failed to encode merge event");
            Event::default().event("error").data(e.to_string())
        });
        Ok::<_, Infallible>(event)
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// 404 unless `checkpoint` exists and belongs to `session`.
fn require_in_session(
    store: &dyn CheckpointStore,
    session: &SessionId,
    checkpoint: &CheckpointId,
) -> ServerResult<()> {
    let found = store.get(checkpoint)?;
    if found.session_id != *session {
        return Err(ServerError::NotInSession {
            session: *session,
            checkpoint: *checkpoint,
        });
    }
    Ok(())
}
