use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for [`MergeCoordinator`](crate::MergeCoordinator).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Capacity of the channel between the merge task and its event stream.
    pub event_buffer: usize,
    /// Upper bound on the reconciling phase, in seconds. Expiry cancels the merge.
    pub reconcile_deadline_secs: Option<u64>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            event_buffer: 64,
            reconcile_deadline_secs: None,
        }
    }
}

impl MergeConfig {
    pub fn reconcile_deadline(&self) -> Option<Duration> {
        self.reconcile_deadline_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = MergeConfig::default();
        assert_eq!(c.event_buffer, 64);
        assert!(c.reconcile_deadline().is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c: MergeConfig = toml::from_str("reconcile_deadline_secs = 30").unwrap();
        assert_eq!(c.event_buffer, 64);
        assert_eq!(c.reconcile_deadline(), Some(Duration::from_secs(30)));
    }
}
