//! Broadcast push feed.

use std::sync::Arc;

use deskcast_desktop::DesktopManager;
use deskcast_pipeline::PipelineEngine;
use deskcast_types::{Codec, StreamMetrics, StreamState};
use tracing::{debug, info, Span};
use url::Url;

use crate::descriptor::DescriptorBuilder;
use crate::error::CaptureError;
use crate::stream::StreamManager;
use crate::CaptureResult;

/// Identifier of the broadcast stream.
pub const BROADCAST_ID: &str = "broadcast";

/// Pushes the screen and audio to an external destination.
///
/// The destination is substituted into the pipeline template on every
/// start, so one manager serves any number of broadcast sessions.
pub struct BroadcastManager {
    stream: StreamManager,
}

impl BroadcastManager {
    pub(crate) fn new(
        builder: DescriptorBuilder,
        desktop: Arc<dyn DesktopManager>,
        engine: Arc<dyn PipelineEngine>,
        parent: &Span,
    ) -> Self {
        Self {
            stream: StreamManager::new(BROADCAST_ID, Codec::H264, builder, desktop, engine, parent),
        }
    }

    /// Start pushing to `url`.
    pub fn start(&self, url: &str) -> CaptureResult<()> {
        let _enter = self.stream.span().enter();

        validate_destination(url)?;
        info!(url, "Starting broadcast");
        self.stream.force_start_with_destination(url)
    }

    /// Stop pushing. Stopping an idle broadcast succeeds.
    pub fn stop(&self) -> CaptureResult<()> {
        let _enter = self.stream.span().enter();

        let result = match self.stream.force_stop() {
            Err(CaptureError::NotStreaming(_)) => {
                debug!("Broadcast not running, nothing to stop");
                Ok(())
            }
            other => other,
        };
        info!("Broadcast stopped");
        result
    }

    /// Check if the push pipeline is running.
    pub fn started(&self) -> bool {
        self.stream.started()
    }

    /// Active destination, if a broadcast was started.
    pub fn url(&self) -> Option<String> {
        self.stream.destination()
    }

    /// Get the lifecycle state.
    pub fn state(&self) -> StreamState {
        self.stream.state()
    }

    /// Get a statistics snapshot.
    pub fn stats(&self) -> StreamMetrics {
        self.stream.stats()
    }

    pub(crate) fn stream(&self) -> &StreamManager {
        &self.stream
    }
}

/// Reject destinations that are not URLs or that would break out of the
/// quoted `location` property.
pub fn validate_destination(url: &str) -> CaptureResult<()> {
    let invalid = |reason: &str| CaptureError::InvalidDestination {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    if url.contains('\'') {
        return Err(invalid("must not contain quotes"));
    }
    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    if !parsed.has_host() {
        return Err(invalid("missing host"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;
    use crate::descriptor::broadcast_builder;
    use deskcast_desktop::VirtualDesktop;
    use deskcast_pipeline::testing::FakeEngine;

    fn setup() -> (FakeEngine, BroadcastManager) {
        let engine = FakeEngine::new();
        let broadcast = BroadcastManager::new(
            broadcast_builder(&CaptureConfig::default()),
            Arc::new(VirtualDesktop::default()),
            engine.shared(),
            &Span::none(),
        );
        (engine, broadcast)
    }

    #[test]
    fn test_start_substitutes_url() {
        let (engine, broadcast) = setup();

        broadcast.start("rtmp://ingest.example.com/live/key").unwrap();

        assert!(broadcast.started());
        assert_eq!(
            broadcast.url().as_deref(),
            Some("rtmp://ingest.example.com/live/key")
        );
        assert!(engine.live()[0]
            .as_str()
            .contains("location='rtmp://ingest.example.com/live/key live=1'"));
    }

    #[test]
    fn test_start_twice_rejected() {
        let (engine, broadcast) = setup();

        broadcast.start("rtmp://a.example.com/live").unwrap();
        let second = broadcast.start("rtmp://b.example.com/live");

        assert!(matches!(second, Err(CaptureError::AlreadyStreaming(_))));
        assert_eq!(engine.live_count(), 1);
        assert_eq!(broadcast.url().as_deref(), Some("rtmp://a.example.com/live"));
    }

    #[test]
    fn test_reusable_across_sessions() {
        let (engine, broadcast) = setup();

        broadcast.start("rtmp://a.example.com/live").unwrap();
        broadcast.stop().unwrap();
        assert!(!broadcast.started());
        assert!(broadcast.url().is_none());

        broadcast.start("rtmp://b.example.com/live").unwrap();
        assert!(engine.live()[0].as_str().contains("rtmp://b.example.com/live"));
    }

    #[test]
    fn test_stop_when_idle_is_ok() {
        let (_engine, broadcast) = setup();
        assert!(broadcast.stop().is_ok());
    }

    #[test]
    fn test_invalid_destinations_rejected() {
        let (engine, broadcast) = setup();

        for url in ["not a url", "rtmp://host/live' ! filesink location='/tmp/x"] {
            assert!(matches!(
                broadcast.start(url),
                Err(CaptureError::InvalidDestination { .. })
            ));
        }
        assert!(engine.launched().is_empty());
    }

    #[test]
    fn test_start_during_resize_keeps_destination() {
        let (engine, broadcast) = setup();
        broadcast.start("rtmp://a.example.com/live").unwrap();

        broadcast.stream().suspend();
        let second = broadcast.start("rtmp://b.example.com/live");
        broadcast.stream().resume().unwrap();

        assert!(matches!(second, Err(CaptureError::AlreadyStreaming(_))));
        assert_eq!(broadcast.url().as_deref(), Some("rtmp://a.example.com/live"));
        assert_eq!(engine.live_count(), 1);
        assert!(engine.live()[0].as_str().contains("rtmp://a.example.com/live"));
    }

    #[test]
    fn test_failed_rebuild_accepts_new_start() {
        let (engine, broadcast) = setup();
        broadcast.start("rtmp://a.example.com/live").unwrap();

        broadcast.stream().suspend();
        engine.fail_launch_when_contains("rtmpsink");
        assert!(broadcast.stream().resume().is_err());
        engine.clear_failures();

        broadcast.start("rtmp://b.example.com/live").unwrap();
        assert!(broadcast.started());
        assert_eq!(broadcast.url().as_deref(), Some("rtmp://b.example.com/live"));
    }

    #[test]
    fn test_failed_start_can_be_retried() {
        let (engine, broadcast) = setup();
        engine.fail_launch_when_contains("rtmpsink");

        let result = broadcast.start("rtmp://a.example.com/live");
        assert!(matches!(result, Err(CaptureError::PipelineConstruction { .. })));
        assert!(!broadcast.started());
        assert!(broadcast.url().is_none());

        engine.clear_failures();
        broadcast.start("rtmp://a.example.com/live").unwrap();
        assert!(broadcast.started());
    }
}
