use arbor_diff::DiffError;
use arbor_merge::{MergeError, SessionError};
use arbor_store::StoreError;
use arbor_tree::TreeError;
use arbor_types::{CheckpointId, SessionId};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// A checkpoint was addressed under a session it does not belong to.
    #[error("checkpoint {checkpoint} not found in session {session}")]
    NotInSession {
        session: SessionId,
        checkpoint: CheckpointId,
    },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    /// Ids involved, so a client can re-render without refetching the tree.
    pub ids: Vec<String>,
}

struct Classified {
    status: StatusCode,
    kind: &'static str,
    ids: Vec<String>,
}

impl Classified {
    fn new(status: StatusCode, kind: &'static str, ids: Vec<String>) -> Self {
        Self { status, kind, ids }
    }

    fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", Vec::new())
    }
}

fn classify_store(err: &StoreError) -> Classified {
    let (status, kind) = match err {
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        StoreError::InvalidParent { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_parent"),
        StoreError::ConcurrentModification { .. } => (StatusCode::CONFLICT, "concurrent_modification"),
        _ => return Classified::internal(),
    };
    Classified::new(status, kind, err.ids())
}

fn invalid_merge(a: &CheckpointId, b: &CheckpointId) -> Classified {
    Classified::new(StatusCode::BAD_REQUEST, "invalid_merge", vec![a.to_string(), b.to_string()])
}

impl ServerError {
    fn classify(&self) -> Classified {
        match self {
            Self::NotInSession { session, checkpoint } => Classified::new(
                StatusCode::NOT_FOUND,
                "not_found",
                vec![session.to_string(), checkpoint.to_string()],
            ),
            Self::BadRequest(_) => Classified::new(StatusCode::BAD_REQUEST, "bad_request", Vec::new()),
            Self::Store(err) | Self::Tree(TreeError::Store(err)) | Self::Diff(DiffError::Store(err)) => {
                classify_store(err)
            }
            Self::Diff(DiffError::InvalidMerge { a, b, .. }) => invalid_merge(a, b),
            Self::Merge(err) => match err {
                MergeError::InvalidMerge { a, b, .. } => invalid_merge(a, b),
                MergeError::Store(err) => classify_store(err),
                MergeError::Session(SessionError::NotFound(_)) => {
                    Classified::new(StatusCode::NOT_FOUND, "not_found", err.ids())
                }
                MergeError::Upstream { .. } => Classified::new(StatusCode::BAD_GATEWAY, "upstream", err.ids()),
                MergeError::Cancelled { .. } => {
                    Classified::new(StatusCode::SERVICE_UNAVAILABLE, "cancelled", err.ids())
                }
                _ => Classified::internal(),
            },
            _ => Classified::internal(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.classify().status
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let Classified { status, kind, ids } = self.classify();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "request rejected");
        }
        let body = ErrorBody {
            error: kind,
            message: self.to_string(),
            ids,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_statuses() {
        let id = CheckpointId::new();
        let session = SessionId::new();
        assert_eq!(ServerError::from(StoreError::NotFound(id)).status(), StatusCode::NOT_FOUND);
        let invalid = StoreError::InvalidParent {
            session,
            parent: id,
            reason: "missing".into(),
        };
        assert_eq!(ServerError::from(invalid).status(), StatusCode::UNPROCESSABLE_ENTITY);
        let conflict = StoreError::ConcurrentModification { session, attempts: 9 };
        assert_eq!(ServerError::from(conflict).status(), StatusCode::CONFLICT);
        assert_eq!(ServerError::from(StoreError::LockPoisoned).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn nested_errors_keep_their_meaning() {
        let id = CheckpointId::new();
        let tree = ServerError::from(TreeError::Store(StoreError::NotFound(id)));
        assert_eq!(tree.status(), StatusCode::NOT_FOUND);

        let merge = ServerError::from(MergeError::InvalidMerge {
            a: id,
            b: id,
            reason: "same".into(),
        });
        assert_eq!(merge.status(), StatusCode::BAD_REQUEST);
        assert_eq!(merge.classify().ids, vec![id.to_string(), id.to_string()]);

        let session = SessionId::new();
        let upstream = ServerError::from(MergeError::Upstream {
            session,
            a: id,
            b: id,
            reason: "reset".into(),
        });
        assert_eq!(upstream.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(upstream.classify().ids, vec![session.to_string(), id.to_string(), id.to_string()]);

        let conflict = ServerError::from(MergeError::Store(StoreError::ConcurrentModification { session, attempts: 9 }));
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert_eq!(conflict.classify().ids, vec![session.to_string()]);
    }
}
