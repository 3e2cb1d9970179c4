//! Native media pipeline handles.
//!
//! A pipeline is a linear capture → convert → encode → sink graph described
//! by a textual [`PipelineDescriptor`]. Engines turn descriptors into running
//! [`NativePipeline`]s; a [`PipelineHandle`] owns at most one of them.

mod error;
#[cfg(feature = "gstreamer")]
mod gst;
mod handle;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::PipelineError;
#[cfg(feature = "gstreamer")]
pub use gst::GstEngine;
pub use handle::PipelineHandle;

use std::fmt;
use std::sync::Arc;

use deskcast_types::Sample;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Name of the sink element whose output is delivered as samples.
pub const APPSINK_NAME: &str = "appsink";

/// Callback invoked from the pipeline's streaming thread for every sample.
pub type SampleSink = Arc<dyn Fn(Sample) + Send + Sync>;

/// Immutable textual description of a pipeline graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineDescriptor(String);

impl PipelineDescriptor {
    /// Create a descriptor from its launch string.
    pub fn new(description: impl Into<String>) -> Self {
        Self(description.into())
    }

    /// Borrow the launch string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the descriptor delivers samples through an appsink.
    pub fn has_appsink(&self) -> bool {
        self.0.contains(&format!("name={APPSINK_NAME}"))
    }
}

impl fmt::Display for PipelineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A running native graph.
pub trait NativePipeline: Send {
    /// Stop the graph and release its resources.
    ///
    /// Resources are released even if an error is returned.
    fn stop(&mut self) -> PipelineResult<()>;
}

/// Builds running graphs from descriptors.
pub trait PipelineEngine: Send + Sync {
    /// Build and start a graph. On error no native resource is retained.
    fn launch(
        &self,
        descriptor: &PipelineDescriptor,
        sink: SampleSink,
    ) -> PipelineResult<Box<dyn NativePipeline>>;

    /// Get engine name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Create the native engine, GStreamer when compiled in.
#[cfg(feature = "gstreamer")]
pub fn default_engine() -> PipelineResult<Arc<dyn PipelineEngine>> {
    let engine = GstEngine::new()?;
    tracing::info!("Using GStreamer pipeline engine");
    Ok(Arc::new(engine))
}

/// Create the native engine (stub when built without GStreamer).
#[cfg(not(feature = "gstreamer"))]
pub fn default_engine() -> PipelineResult<Arc<dyn PipelineEngine>> {
    Err(PipelineError::NotSupported(
        "built without the `gstreamer` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_detects_appsink() {
        let with_sink = PipelineDescriptor::new("audiotestsrc ! opusenc ! appsink name=appsink");
        let without_sink = PipelineDescriptor::new("videotestsrc ! x264enc ! rtmpsink");

        assert!(with_sink.has_appsink());
        assert!(!without_sink.has_appsink());
    }

    #[cfg(not(feature = "gstreamer"))]
    #[test]
    fn test_default_engine_unsupported_without_gstreamer() {
        assert!(matches!(
            default_engine(),
            Err(PipelineError::NotSupported(_))
        ));
    }
}
