use serde::{Deserialize, Serialize};

/// Flush/sync strategy for the append log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every append.
    EveryWrite,
    /// Flush to the OS page cache only.
    #[default]
    OsDefault,
}

/// Configuration shared by all checkpoint store backends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Node identifier stamped into every `created_at` anchor.
    pub node_id: u16,
    /// How many times an append is retried after losing a version race.
    pub max_append_retries: u32,
    /// Sync strategy for [`LogCheckpointStore`](crate::LogCheckpointStore).
    pub sync_mode: SyncMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            max_append_retries: 8,
            sync_mode: SyncMode::default(),
        }
    }
}

impl StoreConfig {
    /// Total attempts an append makes before reporting a conflict.
    pub fn max_attempts(&self) -> u32 {
        self.max_append_retries.saturating_add(1)
    }
}
