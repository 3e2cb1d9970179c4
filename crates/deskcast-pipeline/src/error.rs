//! Error types for the pipeline module.

use thiserror::Error;

/// Errors that can occur while driving a native pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The graph could not be built or brought to the playing state.
    #[error("Pipeline construction failed: {0}")]
    Construction(String),

    /// Create was called on a handle that is already running.
    #[error("Pipeline already running")]
    AlreadyRunning,

    /// No native engine is available in this build.
    #[error("Pipeline engine not supported: {0}")]
    NotSupported(String),

    /// The graph reported an error while being stopped.
    #[error("Failed to stop pipeline: {0}")]
    Stop(String),
}
