//! Error types for the capture module.

use std::time::Duration;

use deskcast_pipeline::PipelineError;
use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The native pipeline could not be built or started.
    #[error("Pipeline construction failed for {stream}: {source}")]
    PipelineConstruction {
        stream: String,
        #[source]
        source: PipelineError,
    },

    /// The native pipeline reported an error while being released.
    #[error("Pipeline release failed for {stream}: {source}")]
    PipelineRelease {
        stream: String,
        #[source]
        source: PipelineError,
    },

    /// Start of a single-instance stream that is already live.
    #[error("{0} is already streaming")]
    AlreadyStreaming(String),

    /// Stop of a stream that is not live.
    #[error("{0} is not streaming")]
    NotStreaming(String),

    /// Subsystem disabled by configuration.
    #[error("{0} is disabled by configuration")]
    SubsystemUnavailable(String),

    /// Broadcast destination rejected.
    #[error("Invalid broadcast destination {url:?}: {reason}")]
    InvalidDestination { url: String, reason: String },

    /// Configuration rejected at construction time.
    #[error("Invalid capture configuration: {field}: {message}")]
    InvalidConfig { field: String, message: String },

    /// No frame arrived in time.
    #[error("No frame produced by {stream} within {timeout:?}")]
    ImageTimeout { stream: String, timeout: Duration },

    /// Video tier id not known.
    #[error("Unknown video tier: {0}")]
    UnknownTier(String),

    /// Operation on a stream that has been shut down.
    #[error("{0} has been shut down")]
    Closed(String),
}
