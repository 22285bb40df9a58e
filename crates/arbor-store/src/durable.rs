use std::path::Path;

use arbor_types::{Checkpoint, CheckpointId, Message, Metadata, SessionId};
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::index::CheckpointIndex;
use crate::log::CheckpointLog;
use crate::memory::InMemoryCheckpointStore;
use crate::traits::CheckpointStore;

/// Durable checkpoint store: the in-memory arena fronted by an append log.
///
/// Every append is written to the log before it becomes visible. On open the
/// log is replayed into a fresh index, a torn tail is truncated, and the
/// clock is advanced past the newest recovered checkpoint.
pub struct LogCheckpointStore {
    memory: InMemoryCheckpointStore,
    log: CheckpointLog,
}

impl LogCheckpointStore {
    /// Open (or create) a store backed by the log file at `path`.
    pub fn open(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let log = CheckpointLog::open(path, config.sync_mode)?;
        let recovery = log.recover()?;

        let file_len = log.offset()?;
        if recovery.valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len = recovery.valid_len,
                file_len,
                "truncating torn tail of checkpoint log"
            );
            log.truncate_to(recovery.valid_len)?;
        }

        let recovered = recovery.checkpoints.len();
        let index = CheckpointIndex::rebuild(recovery.checkpoints);
        info!(
            path = %path.display(),
            recovered,
            indexed = index.len(),
            skipped = recovery.skipped,
            "opened checkpoint store"
        );

        Ok(Self {
            memory: InMemoryCheckpointStore::from_index(index, config),
            log,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        self.memory.config()
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }

    /// Flush and fsync the log. Call before shutdown.
    pub fn flush(&self) -> StoreResult<()> {
        self.log.flush()
    }
}

impl CheckpointStore for LogCheckpointStore {
    fn append(
        &self,
        session: SessionId,
        parent: Option<CheckpointId>,
        messages: Vec<Message>,
        metadata: Metadata,
    ) -> StoreResult<Checkpoint> {
        self.memory
            .append_with(session, parent, messages, metadata, |checkpoint| {
                self.log.append(checkpoint).map(|_| ())
            })
    }

    fn get(&self, id: &CheckpointId) -> StoreResult<Checkpoint> {
        self.memory.get(id)
    }

    fn children(&self, parent: &CheckpointId) -> StoreResult<Vec<Checkpoint>> {
        self.memory.children(parent)
    }

    fn roots(&self, session: &SessionId) -> StoreResult<Vec<Checkpoint>> {
        self.memory.roots(session)
    }

    fn ancestors(&self, id: &CheckpointId) -> StoreResult<Vec<Checkpoint>> {
        self.memory.ancestors(id)
    }

    fn list_by_session(&self, session: &SessionId) -> StoreResult<Vec<Checkpoint>> {
        self.memory.list_by_session(session)
    }

    fn sessions(&self) -> StoreResult<Vec<SessionId>> {
        self.memory.sessions()
    }

    fn len(&self) -> StoreResult<usize> {
        self.memory.len()
    }
}

impl std::fmt::Debug for LogCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCheckpointStore")
            .field("path", &self.log.path())
            .field("memory", &self.memory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    fn turn(text: &str) -> Vec<Message> {
        vec![Message::user(text), Message::assistant(format!("re: {text}"))]
    }

    #[test]
    fn reopen_preserves_tree_and_sibling_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("checkpoints.log");
        let session = SessionId::new();

        let (root, first, second) = {
            let store = LogCheckpointStore::open(&path, StoreConfig::default()).unwrap();
            let root = store.append(session, None, turn("hello"), Metadata::new()).unwrap();
            let first = store
                .append(session, Some(root.id), turn("left"), Metadata::new())
                .unwrap();
            let second = store
                .append(session, Some(root.id), turn("right"), Metadata::new())
                .unwrap();
            store.flush().unwrap();
            (root, first, second)
        };

        let store = LogCheckpointStore::open(&path, StoreConfig::default()).unwrap();
        assert_eq!(store.len().unwrap(), 3);
        assert_eq!(store.get(&root.id).unwrap(), root);
        assert_eq!(store.roots(&session).unwrap(), vec![root.clone()]);
        let children: Vec<CheckpointId> =
            store.children(&root.id).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(children, vec![first.id, second.id]);
        assert_eq!(store.sessions().unwrap(), vec![session]);
    }

    #[test]
    fn appends_after_reopen_sort_after_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.log");
        let session = SessionId::new();

        let root = {
            let store = LogCheckpointStore::open(&path, StoreConfig::default()).unwrap();
            store.append(session, None, turn("hello"), Metadata::new()).unwrap()
        };

        let store = LogCheckpointStore::open(&path, StoreConfig::default()).unwrap();
        let child = store
            .append(session, Some(root.id), turn("again"), Metadata::new())
            .unwrap();
        assert!(child.created_at > root.created_at);
        assert!(child.sequence > root.sequence);
    }

    #[test]
    fn torn_tail_is_dropped_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.log");
        let session = SessionId::new();

        let root = {
            let store = LogCheckpointStore::open(&path, StoreConfig::default()).unwrap();
            let root = store.append(session, None, turn("kept"), Metadata::new()).unwrap();
            store
                .append(session, Some(root.id), turn("torn"), Metadata::new())
                .unwrap();
            root
        };

        let len = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 3).unwrap();

        let store = LogCheckpointStore::open(&path, StoreConfig::default()).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.children(&root.id).unwrap().is_empty());

        // The log accepts new frames after the truncated tail.
        let next = store
            .append(session, Some(root.id), turn("retry"), Metadata::new())
            .unwrap();
        drop(store);
        let store = LogCheckpointStore::open(&path, StoreConfig::default()).unwrap();
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.get(&next.id).unwrap(), next);
    }

    #[test]
    fn damaged_frame_mid_log_keeps_later_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.log");

        let (first, second_offset, third) = {
            let store = LogCheckpointStore::open(&path, StoreConfig::default()).unwrap();
            let first = store.append(SessionId::new(), None, turn("one"), Metadata::new()).unwrap();
            let second_offset = std::fs::metadata(&path).unwrap().len();
            store.append(SessionId::new(), None, turn("two"), Metadata::new()).unwrap();
            let third = store.append(SessionId::new(), None, turn("three"), Metadata::new()).unwrap();
            store.flush().unwrap();
            (first, second_offset, third)
        };

        // Corrupt the high byte of the second frame's length field.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[second_offset as usize + 3] ^= 0x80;
        std::fs::write(&path, &bytes).unwrap();

        let store = LogCheckpointStore::open(&path, StoreConfig::default()).unwrap();
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.get(&first.id).unwrap(), first);
        assert_eq!(store.get(&third.id).unwrap(), third);
        drop(store);
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn invalid_parent_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.log");
        let store = LogCheckpointStore::open(&path, StoreConfig::default()).unwrap();
        let err = store
            .append(SessionId::new(), Some(CheckpointId::new()), turn("x"), Metadata::new())
            .unwrap_err();
        assert!(matches!(err, crate::StoreError::InvalidParent { .. }));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }
}
