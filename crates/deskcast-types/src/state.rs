//! Stream lifecycle state.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a single stream's pipeline.
///
/// A resize moves a running stream through `Suspended` (torn down, waiting
/// for the new geometry) back to `Running`, or to `Failed` when the rebuild
/// cannot construct the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    /// No pipeline, nothing waiting for one.
    #[default]
    Idle,

    /// Native pipeline is live.
    Running,

    /// Pipeline torn down while the screen geometry changes.
    Suspended {
        /// Whether the pipeline will be rebuilt once the geometry settles.
        rebuild_pending: bool,
    },

    /// Last construction attempt failed; the feed stays dark until restarted.
    Failed {
        /// Construction error message.
        reason: String,
    },
}

impl StreamState {
    /// Returns true if the last construction failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}
