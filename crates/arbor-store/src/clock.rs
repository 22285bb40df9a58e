use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use arbor_types::TemporalAnchor;

/// Internal mutable state of the Hybrid Logical Clock.
struct HlcState {
    /// Last-known physical millisecond timestamp.
    physical_ms: u64,
    /// Logical counter for events within the same physical millisecond.
    logical: u32,
}

/// Hybrid Logical Clock stamping checkpoint creation times.
///
/// Produces strictly increasing [`TemporalAnchor`] values for one store,
/// even when the wall clock stalls or steps backwards.
///
/// # HLC Rules
///
/// - **Local event**: `physical = max(wall_clock, state.physical)`.
///   If physical advanced, `logical = 0`; otherwise `logical += 1`.
/// - **Observe**: after recovering persisted checkpoints the clock is moved
///   past the newest recovered anchor, so new checkpoints sort after old ones.
pub struct HybridLogicalClock {
    node_id: u16,
    state: Mutex<HlcState>,
}

impl HybridLogicalClock {
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id,
            state: Mutex::new(HlcState {
                physical_ms: 0,
                logical: 0,
            }),
        }
    }

    /// Generate a timestamp strictly greater than any previously returned.
    pub fn now(&self) -> TemporalAnchor {
        let wall = Self::wall_clock_ms();
        let mut state = self.lock();

        let new_physical = wall.max(state.physical_ms);
        let new_logical = if new_physical > state.physical_ms {
            0
        } else {
            state.logical + 1
        };

        state.physical_ms = new_physical;
        state.logical = new_logical;

        TemporalAnchor::new(new_physical, new_logical, self.node_id)
    }

    /// Advance the clock so every later [`now`](Self::now) is after `seen`.
    pub fn observe(&self, seen: &TemporalAnchor) {
        let mut state = self.lock();
        if (seen.physical_ms, seen.logical) > (state.physical_ms, state.logical) {
            state.physical_ms = seen.physical_ms;
            state.logical = seen.logical;
        }
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    // The state is two integers with no cross-field invariant, so a poisoned
    // guard is still usable.
    fn lock(&self) -> MutexGuard<'_, HlcState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wall_clock_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

impl std::fmt::Debug for HybridLogicalClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridLogicalClock")
            .field("node_id", &self.node_id)
            .finish()
    }
}
