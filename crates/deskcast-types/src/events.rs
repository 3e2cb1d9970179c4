//! Events published by the capture orchestrator.

use serde::{Deserialize, Serialize};

use crate::types::ScreenSize;

/// Events that the capture manager publishes to its observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CaptureEvent {
    /// Geometry-bound pipelines are being torn down.
    ResizeStarted {
        /// Screen size before the change.
        previous: ScreenSize,
    },

    /// Rebuild after a resize finished.
    ResizeCompleted {
        /// Screen size after the change.
        current: ScreenSize,

        /// Streams rebuilt successfully.
        rebuilt: Vec<String>,

        /// Streams whose rebuild failed and which stay dark.
        failed: Vec<String>,
    },

    /// A stream's pipeline could not be constructed.
    StreamFailed {
        /// Stream identifier.
        stream: String,

        /// Error message.
        message: String,
    },

    /// Every stream has been shut down.
    ShutdownCompleted,
}
