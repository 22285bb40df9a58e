use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use arbor_diff::DiffEngine;
use arbor_store::CheckpointStore;
use arbor_types::{Checkpoint, CheckpointId, Message, Metadata, SessionId};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::MergeConfig;
use crate::engine::ChatEngine;
use crate::error::{MergeError, MergeResult};
use crate::event::{MergeEvent, MergePhase};
use crate::prompt::ReconcileRequest;
use crate::session::{NewSession, SessionService};

pub const PROVENANCE_SOURCE_SESSION: &str = "merge.source_session";
pub const PROVENANCE_CHECKPOINT_A: &str = "merge.checkpoint_a";
pub const PROVENANCE_CHECKPOINT_B: &str = "merge.checkpoint_b";
pub const PROVENANCE_LCA: &str = "merge.lca";
pub const PROVENANCE_INSTRUCTION: &str = "merge.instruction";

/// A request to merge two checkpoints of one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub session_id: SessionId,
    pub checkpoint_a: CheckpointId,
    pub checkpoint_b: CheckpointId,
    #[serde(default)]
    pub instruction: Option<String>,
}

/// A committed merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeCommit {
    pub session_id: SessionId,
    pub root: Checkpoint,
}

/// Final result of a spawned merge.
pub type MergeOutcome = MergeResult<MergeCommit>;

/// Event stream of one merge. Dropping it cancels the merge.
pub struct MergeStream {
    events: mpsc::Receiver<MergeEvent>,
    _cancel_on_drop: DropGuard,
}

impl Stream for MergeStream {
    type Item = MergeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl std::fmt::Debug for MergeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeStream").finish_non_exhaustive()
    }
}

/// A running merge.
#[derive(Debug)]
pub struct MergeHandle {
    pub events: MergeStream,
    pub cancel: CancellationToken,
    pub outcome: JoinHandle<MergeOutcome>,
}

impl MergeHandle {
    /// Drain every event and wait for the outcome.
    pub async fn finish(self) -> (Vec<MergeEvent>, MergeOutcome) {
        let events: Vec<MergeEvent> = self.events.collect().await;
        let outcome = match self.outcome.await {
            Ok(outcome) => outcome,
            Err(join) => Err(MergeError::Task(join.to_string())),
        };
        (events, outcome)
    }
}

/// Orchestrates resolve, reconcile and commit for branch merges.
pub struct MergeCoordinator {
    store: Arc<dyn CheckpointStore>,
    engine: Arc<dyn ChatEngine>,
    sessions: Arc<dyn SessionService>,
    config: MergeConfig,
    reconcile_deadline: Option<Duration>,
}

impl MergeCoordinator {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        engine: Arc<dyn ChatEngine>,
        sessions: Arc<dyn SessionService>,
        config: MergeConfig,
    ) -> Self {
        let reconcile_deadline = config.reconcile_deadline();
        Self {
            store,
            engine,
            sessions,
            config,
            reconcile_deadline,
        }
    }

    /// Override the configured reconciling deadline.
    pub fn with_reconcile_deadline(mut self, deadline: Duration) -> Self {
        self.reconcile_deadline = Some(deadline);
        self
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Validate `request` and start the merge.
    ///
    /// Structural problems (unknown checkpoints, identical or unrelated
    /// checkpoints, checkpoints outside `request.session_id`) are returned
    /// here, before any collaborator is called. Otherwise the reconcile and
    /// commit phases run on a spawned Tokio task; cancelling `cancel` or
    /// dropping the returned stream stops it without committing.
    pub fn merge(&self, request: MergeRequest, cancel: CancellationToken) -> MergeResult<MergeHandle> {
        let phase = MergePhase::Resolving;
        let reconcile = self.resolve(&request)?;
        let phase = phase.advance(MergePhase::Reconciling)?;

        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let task = MergeTask {
            store: Arc::clone(&self.store),
            engine: Arc::clone(&self.engine),
            sessions: Arc::clone(&self.sessions),
            request: reconcile,
            deadline: self.reconcile_deadline,
            cancel: cancel.clone(),
            events: tx,
        };
        let outcome = tokio::spawn(task.run(phase));

        Ok(MergeHandle {
            events: MergeStream {
                events: rx,
                _cancel_on_drop: cancel.clone().drop_guard(),
            },
            cancel,
            outcome,
        })
    }

    fn resolve(&self, request: &MergeRequest) -> MergeResult<ReconcileRequest> {
        let (a, b) = (request.checkpoint_a, request.checkpoint_b);
        if a == b {
            return Err(MergeError::InvalidMerge {
                a,
                b,
                reason: "cannot merge a checkpoint with itself".into(),
            });
        }

        let diff = DiffEngine::new(self.store.as_ref()).diff(&a, &b)?;
        if diff.lca.session_id != request.session_id {
            return Err(MergeError::InvalidMerge {
                a,
                b,
                reason: format!("checkpoints belong to session {}", diff.lca.session_id),
            });
        }

        debug!(
            session = %request.session_id.short_id(),
            a = %a.short_id(),
            b = %b.short_id(),
            lca = %diff.lca.id.short_id(),
            "resolved merge"
        );
        Ok(ReconcileRequest::from_diff(
            request.session_id,
            &diff,
            request.instruction.clone(),
        ))
    }
}

impl std::fmt::Debug for MergeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeCoordinator")
            .field("config", &self.config)
            .field("reconcile_deadline", &self.reconcile_deadline)
            .finish_non_exhaustive()
    }
}

struct MergeTask {
    store: Arc<dyn CheckpointStore>,
    engine: Arc<dyn ChatEngine>,
    sessions: Arc<dyn SessionService>,
    request: ReconcileRequest,
    deadline: Option<Duration>,
    cancel: CancellationToken,
    events: mpsc::Sender<MergeEvent>,
}

impl MergeTask {
    fn cancelled(&self, reason: impl Into<String>) -> MergeError {
        MergeError::Cancelled {
            session: self.request.session_id,
            a: self.request.checkpoint_a,
            b: self.request.checkpoint_b,
            reason: reason.into(),
        }
    }

    fn upstream(&self, reason: impl Into<String>) -> MergeError {
        MergeError::Upstream {
            session: self.request.session_id,
            a: self.request.checkpoint_a,
            b: self.request.checkpoint_b,
            reason: reason.into(),
        }
    }

    /// The error's own ids, or this merge's when it names none.
    fn error_ids(&self, err: &MergeError) -> Vec<String> {
        let ids = err.ids();
        if !ids.is_empty() {
            return ids;
        }
        vec![
            self.request.session_id.to_string(),
            self.request.checkpoint_a.to_string(),
            self.request.checkpoint_b.to_string(),
        ]
    }

    async fn run(self, mut phase: MergePhase) -> MergeOutcome {
        let result = self.reconcile_and_commit(&mut phase).await;
        match result {
            Ok(commit) => {
                let _ = self
                    .events
                    .send(MergeEvent::End {
                        new_session_id: commit.session_id,
                        root_checkpoint_id: commit.root.id,
                    })
                    .await;
                info!(
                    source = %self.request.session_id.short_id(),
                    session = %commit.session_id.short_id(),
                    "merge committed"
                );
                Ok(commit)
            }
            Err(err) => {
                if let Ok(errored) = phase.advance(MergePhase::Errored) {
                    phase = errored;
                }
                warn!(
                    source = %self.request.session_id.short_id(),
                    a = %self.request.checkpoint_a.short_id(),
                    b = %self.request.checkpoint_b.short_id(),
                    phase = %phase,
                    error = %err,
                    "merge failed"
                );
                let _ = self
                    .events
                    .send(MergeEvent::Error {
                        error: err.to_string(),
                        ids: self.error_ids(&err),
                    })
                    .await;
                Err(err)
            }
        }
    }

    async fn reconcile_and_commit(&self, phase: &mut MergePhase) -> MergeOutcome {
        let content = self.reconcile().await?;
        *phase = phase.advance(MergePhase::Committing)?;
        let commit = self.commit(content).await?;
        *phase = phase.advance(MergePhase::Done)?;
        Ok(commit)
    }

    /// Stream fragments until the engine finishes, the caller cancels, or
    /// the deadline passes. Only the finished text is returned.
    async fn reconcile(&self) -> MergeResult<String> {
        let deadline = async {
            match self.deadline {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled("cancelled by caller")),
            limit = deadline => Err(self.cancelled(format!(
                "reconciliation exceeded deadline of {}ms",
                limit.as_millis()
            ))),
            result = self.stream_fragments() => result,
        }
    }

    async fn stream_fragments(&self) -> MergeResult<String> {
        let mut stream = self
            .engine
            .stream_reconciliation(self.request.clone())
            .await
            .map_err(|e| self.upstream(e.to_string()))?;

        let mut content = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment.map_err(|e| self.upstream(e.to_string()))?;
            if fragment.is_empty() {
                continue;
            }
            content.push_str(&fragment);
            if self
                .events
                .send(MergeEvent::Chunk { content: fragment })
                .await
                .is_err()
            {
                return Err(self.cancelled("event stream dropped"));
            }
        }

        if content.trim().is_empty() {
            return Err(self.upstream("chat engine produced no content"));
        }
        Ok(content)
    }

    /// Create the new session and its root checkpoint, or neither.
    async fn commit(&self, content: String) -> MergeOutcome {
        if self.cancel.is_cancelled() {
            return Err(self.cancelled("cancelled before commit"));
        }

        let request = &self.request;
        let record = self
            .sessions
            .create_session(NewSession {
                title: format!(
                    "Merge of {} and {}",
                    request.checkpoint_a.short_id(),
                    request.checkpoint_b.short_id()
                ),
                merged_from: Some(request.session_id),
            })
            .await?;

        let mut metadata = Metadata::new();
        metadata.insert(PROVENANCE_SOURCE_SESSION.into(), request.session_id.to_string());
        metadata.insert(PROVENANCE_CHECKPOINT_A.into(), request.checkpoint_a.to_string());
        metadata.insert(PROVENANCE_CHECKPOINT_B.into(), request.checkpoint_b.to_string());
        metadata.insert(PROVENANCE_LCA.into(), request.lca.to_string());
        if let Some(instruction) = &request.instruction {
            metadata.insert(PROVENANCE_INSTRUCTION.into(), instruction.clone());
        }

        // Appends may block on log I/O, so they stay off the async workers.
        let store = Arc::clone(&self.store);
        let session_id = record.id;
        let appended = tokio::task::spawn_blocking(move || {
            store.append(session_id, None, vec![Message::assistant(content)], metadata)
        })
        .await
        .map_err(|join| MergeError::Task(join.to_string()))
        .and_then(|result| result.map_err(MergeError::from));

        match appended {
            Ok(root) => Ok(MergeCommit { session_id, root }),
            Err(err) => {
                if let Err(rollback) = self.sessions.discard_session(&session_id).await {
                    warn!(session = %session_id, error = %rollback, "failed to discard merge session");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, FragmentStream, JuxtaposeEngine};
    use crate::session::InMemorySessionService;
    use arbor_store::{InMemoryCheckpointStore, StoreError, StoreResult};
    use async_trait::async_trait;
    use futures::stream;

    struct Fixture {
        store: Arc<InMemoryCheckpointStore>,
        sessions: Arc<InMemorySessionService>,
        session: SessionId,
        c0: Checkpoint,
        c2: Checkpoint,
        c3: Checkpoint,
    }

    /// c0 <- c1 <- {c2, c3}
    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let session = SessionId::new();
        let append = |parent: Option<&Checkpoint>, text: &str| {
            store
                .append(
                    session,
                    parent.map(|p| p.id),
                    vec![Message::user(text), Message::assistant(format!("re: {text}"))],
                    Metadata::new(),
                )
                .unwrap()
        };
        let c0 = append(None, "design a cache");
        let c1 = append(Some(&c0), "make it concurrent");
        let c2 = append(Some(&c1), "use a queue");
        let c3 = append(Some(&c1), "use a lock");
        Fixture {
            store,
            sessions: Arc::new(InMemorySessionService::new()),
            session,
            c0,
            c2,
            c3,
        }
    }

    fn coordinator(f: &Fixture, engine: impl ChatEngine + 'static) -> MergeCoordinator {
        MergeCoordinator::new(
            f.store.clone(),
            Arc::new(engine),
            f.sessions.clone(),
            MergeConfig::default(),
        )
    }

    fn request(f: &Fixture, a: &Checkpoint, b: &Checkpoint) -> MergeRequest {
        MergeRequest {
            session_id: f.session,
            checkpoint_a: a.id,
            checkpoint_b: b.id,
            instruction: Some("combine both approaches".into()),
        }
    }

    /// Yields the given fragments, then hangs until dropped.
    struct HangingEngine(Vec<&'static str>);

    #[async_trait]
    impl ChatEngine for HangingEngine {
        async fn stream_reconciliation(&self, _: ReconcileRequest) -> Result<FragmentStream, EngineError> {
            let head = stream::iter(self.0.clone()).map(|s| Ok::<_, EngineError>(s.to_string()));
            Ok(Box::pin(head.chain(stream::pending())))
        }
    }

    /// Yields one fragment, then fails.
    struct FailingEngine;

    #[async_trait]
    impl ChatEngine for FailingEngine {
        async fn stream_reconciliation(&self, _: ReconcileRequest) -> Result<FragmentStream, EngineError> {
            Ok(Box::pin(stream::iter(vec![
                Ok("partial ".to_string()),
                Err(EngineError::Stream("connection reset".into())),
            ])))
        }
    }

    struct EmptyEngine;

    #[async_trait]
    impl ChatEngine for EmptyEngine {
        async fn stream_reconciliation(&self, _: ReconcileRequest) -> Result<FragmentStream, EngineError> {
            Ok(Box::pin(stream::iter(vec![Ok::<_, EngineError>("  ".to_string())])))
        }
    }

    /// Delegates to the inner store, recording the thread of every append.
    /// Refuses appends when `read_only` is set.
    struct ObservedStore {
        inner: Arc<InMemoryCheckpointStore>,
        read_only: bool,
        append_threads: std::sync::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl ObservedStore {
        fn new(inner: Arc<InMemoryCheckpointStore>, read_only: bool) -> Self {
            Self {
                inner,
                read_only,
                append_threads: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    impl CheckpointStore for ObservedStore {
        fn append(
            &self,
            session: SessionId,
            parent: Option<CheckpointId>,
            messages: Vec<Message>,
            metadata: Metadata,
        ) -> StoreResult<Checkpoint> {
            self.append_threads.lock().unwrap().push(std::thread::current().id());
            if self.read_only {
                return Err(StoreError::ConcurrentModification { session, attempts: 1 });
            }
            self.inner.append(session, parent, messages, metadata)
        }
        fn get(&self, id: &CheckpointId) -> StoreResult<Checkpoint> {
            self.inner.get(id)
        }
        fn children(&self, parent: &CheckpointId) -> StoreResult<Vec<Checkpoint>> {
            self.inner.children(parent)
        }
        fn roots(&self, session: &SessionId) -> StoreResult<Vec<Checkpoint>> {
            self.inner.roots(session)
        }
        fn ancestors(&self, id: &CheckpointId) -> StoreResult<Vec<Checkpoint>> {
            self.inner.ancestors(id)
        }
        fn list_by_session(&self, session: &SessionId) -> StoreResult<Vec<Checkpoint>> {
            self.inner.list_by_session(session)
        }
        fn sessions(&self) -> StoreResult<Vec<SessionId>> {
            self.inner.sessions()
        }
        fn len(&self) -> StoreResult<usize> {
            self.inner.len()
        }
    }

    #[tokio::test]
    async fn fork_merge_commits_new_session_with_provenance() {
        let f = fixture();
        let before = f.store.len().unwrap();
        let handle = coordinator(&f, JuxtaposeEngine)
            .merge(request(&f, &f.c2, &f.c3), CancellationToken::new())
            .unwrap();
        let (events, outcome) = handle.finish().await;
        let commit = outcome.unwrap();

        let chunks: String = events
            .iter()
            .filter_map(|e| match e {
                MergeEvent::Chunk { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert!(chunks.contains("use a queue"));
        assert!(chunks.contains("use a lock"));
        assert_eq!(
            events.last(),
            Some(&MergeEvent::End {
                new_session_id: commit.session_id,
                root_checkpoint_id: commit.root.id,
            })
        );

        assert_ne!(commit.session_id, f.session);
        assert!(commit.root.is_root());
        assert_eq!(commit.root.session_id, commit.session_id);
        assert_eq!(commit.root.messages, vec![Message::assistant(chunks)]);
        let meta = &commit.root.metadata;
        assert_eq!(meta[PROVENANCE_CHECKPOINT_A], f.c2.id.to_string());
        assert_eq!(meta[PROVENANCE_CHECKPOINT_B], f.c3.id.to_string());
        assert_eq!(meta[PROVENANCE_SOURCE_SESSION], f.session.to_string());
        assert_eq!(meta[PROVENANCE_INSTRUCTION], "combine both approaches");

        assert_eq!(f.store.len().unwrap(), before + 1);
        let record = f.sessions.get(&commit.session_id).unwrap();
        assert_eq!(record.merged_from, Some(f.session));
        // Source session untouched.
        assert_eq!(f.store.list_by_session(&f.session).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn identical_checkpoints_rejected_before_spawning() {
        let f = fixture();
        let err = coordinator(&f, JuxtaposeEngine)
            .merge(request(&f, &f.c2, &f.c2), CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, MergeError::InvalidMerge { .. }));
        assert!(err.is_structural());
    }

    #[tokio::test]
    async fn cross_session_merge_is_invalid_and_writes_nothing() {
        let f = fixture();
        let other = f
            .store
            .append(SessionId::new(), None, vec![Message::user("elsewhere")], Metadata::new())
            .unwrap();
        let before = f.store.len().unwrap();

        let err = coordinator(&f, JuxtaposeEngine)
            .merge(request(&f, &f.c2, &other), CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, MergeError::InvalidMerge { a, b, .. } if a == f.c2.id && b == other.id));
        assert_eq!(f.store.len().unwrap(), before);
        assert!(f.sessions.is_empty().unwrap());
    }

    #[tokio::test]
    async fn checkpoints_outside_requested_session_are_invalid() {
        let f = fixture();
        let mut req = request(&f, &f.c2, &f.c3);
        req.session_id = SessionId::new();
        let err = coordinator(&f, JuxtaposeEngine)
            .merge(req, CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, MergeError::InvalidMerge { .. }));
    }

    #[tokio::test]
    async fn unknown_checkpoint_is_not_found() {
        let f = fixture();
        let mut req = request(&f, &f.c2, &f.c3);
        req.checkpoint_b = CheckpointId::new();
        let err = coordinator(&f, JuxtaposeEngine)
            .merge(req, CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, MergeError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn ancestor_merge_is_allowed() {
        let f = fixture();
        let handle = coordinator(&f, JuxtaposeEngine)
            .merge(request(&f, &f.c0, &f.c3), CancellationToken::new())
            .unwrap();
        let (_, outcome) = handle.finish().await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn cancel_mid_stream_commits_nothing() {
        let f = fixture();
        let before = f.store.len().unwrap();
        let mut handle = coordinator(&f, HangingEngine(vec!["first fragment"]))
            .merge(request(&f, &f.c2, &f.c3), CancellationToken::new())
            .unwrap();

        let first = handle.events.next().await;
        assert_eq!(first, Some(MergeEvent::Chunk { content: "first fragment".into() }));
        handle.cancel.cancel();

        let (rest, outcome) = handle.finish().await;
        assert!(matches!(rest.as_slice(), [MergeEvent::Error { .. }]));
        assert!(matches!(outcome, Err(MergeError::Cancelled { .. })));
        assert_eq!(f.store.len().unwrap(), before);
        assert!(f.sessions.is_empty().unwrap());
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels() {
        let f = fixture();
        let before = f.store.len().unwrap();
        let handle = coordinator(&f, HangingEngine(vec![]))
            .merge(request(&f, &f.c2, &f.c3), CancellationToken::new())
            .unwrap();
        let cancel = handle.cancel.clone();
        let MergeHandle { events, outcome, .. } = handle;
        drop(events);

        assert!(cancel.is_cancelled());
        assert!(matches!(outcome.await.unwrap(), Err(MergeError::Cancelled { .. })));
        assert_eq!(f.store.len().unwrap(), before);
    }

    #[tokio::test]
    async fn deadline_is_a_cancellation() {
        let f = fixture();
        let handle = coordinator(&f, HangingEngine(vec!["slow"]))
            .with_reconcile_deadline(Duration::from_millis(20))
            .merge(request(&f, &f.c2, &f.c3), CancellationToken::new())
            .unwrap();
        let (events, outcome) = handle.finish().await;
        assert!(matches!(events.last(), Some(MergeEvent::Error { error, .. }) if error.contains("deadline")));
        assert!(matches!(outcome, Err(MergeError::Cancelled { .. })));
        assert!(f.sessions.is_empty().unwrap());
    }

    #[tokio::test]
    async fn upstream_failure_discards_partial_content() {
        let f = fixture();
        let before = f.store.len().unwrap();
        let handle = coordinator(&f, FailingEngine)
            .merge(request(&f, &f.c2, &f.c3), CancellationToken::new())
            .unwrap();
        let (events, outcome) = handle.finish().await;

        assert_eq!(events.first(), Some(&MergeEvent::Chunk { content: "partial ".into() }));
        assert!(matches!(events.last(), Some(MergeEvent::Error { error, .. }) if error.contains("connection reset")));
        assert!(matches!(outcome, Err(MergeError::Upstream { .. })));
        assert_eq!(f.store.len().unwrap(), before);
        assert!(f.sessions.is_empty().unwrap());
    }

    #[tokio::test]
    async fn empty_reconciliation_is_upstream_failure() {
        let f = fixture();
        let handle = coordinator(&f, EmptyEngine)
            .merge(request(&f, &f.c2, &f.c3), CancellationToken::new())
            .unwrap();
        let (_, outcome) = handle.finish().await;
        assert!(matches!(outcome, Err(MergeError::Upstream { .. })));
        assert!(f.sessions.is_empty().unwrap());
    }

    #[tokio::test]
    async fn failed_append_rolls_back_session() {
        let f = fixture();
        let coordinator = MergeCoordinator::new(
            Arc::new(ObservedStore::new(f.store.clone(), true)),
            Arc::new(JuxtaposeEngine),
            f.sessions.clone(),
            MergeConfig::default(),
        );
        let handle = coordinator
            .merge(request(&f, &f.c2, &f.c3), CancellationToken::new())
            .unwrap();
        let (events, outcome) = handle.finish().await;
        assert!(matches!(events.last(), Some(MergeEvent::Error { .. })));
        assert!(matches!(outcome, Err(MergeError::Store(StoreError::ConcurrentModification { .. }))));
        assert!(f.sessions.is_empty().unwrap());
    }

    #[tokio::test]
    async fn failure_events_name_the_merged_checkpoints() {
        let f = fixture();
        let handle = coordinator(&f, FailingEngine)
            .merge(request(&f, &f.c2, &f.c3), CancellationToken::new())
            .unwrap();
        let (events, outcome) = handle.finish().await;

        let expected = vec![f.session.to_string(), f.c2.id.to_string(), f.c3.id.to_string()];
        match events.last() {
            Some(MergeEvent::Error { error, ids }) => {
                assert!(error.contains(&f.c2.id.to_string()));
                assert!(error.contains(&f.c3.id.to_string()));
                assert_eq!(ids, &expected);
            }
            other => panic!("expected an error event, got {other:?}"),
        }
        let err = outcome.unwrap_err();
        assert!(matches!(&err, MergeError::Upstream { a, b, .. } if *a == f.c2.id && *b == f.c3.id));
        assert_eq!(err.ids(), expected);
    }

    #[tokio::test]
    async fn cancellation_names_the_merged_checkpoints() {
        let f = fixture();
        let handle = coordinator(&f, HangingEngine(vec![]))
            .merge(request(&f, &f.c2, &f.c3), CancellationToken::new())
            .unwrap();
        handle.cancel.cancel();
        let (events, outcome) = handle.finish().await;
        assert!(matches!(
            events.last(),
            Some(MergeEvent::Error { ids, .. }) if ids.contains(&f.c2.id.to_string())
        ));
        assert!(matches!(outcome, Err(MergeError::Cancelled { session, .. }) if session == f.session));
    }

    #[tokio::test]
    async fn commit_appends_off_the_async_thread() {
        let f = fixture();
        let observed = Arc::new(ObservedStore::new(f.store.clone(), false));
        let coordinator = MergeCoordinator::new(
            observed.clone(),
            Arc::new(JuxtaposeEngine),
            f.sessions.clone(),
            MergeConfig::default(),
        );
        let handle = coordinator
            .merge(request(&f, &f.c2, &f.c3), CancellationToken::new())
            .unwrap();
        let (_, outcome) = handle.finish().await;
        let commit = outcome.unwrap();
        assert_eq!(f.store.get(&commit.root.id).unwrap(), commit.root);

        // The test runtime is single-threaded, so any other thread is the blocking pool.
        let threads = observed.append_threads.lock().unwrap().clone();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }
}
