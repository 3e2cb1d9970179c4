//! Stream manager: one named feed, its pipeline and its subscribers.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;
use deskcast_desktop::DesktopManager;
use deskcast_pipeline::{PipelineEngine, PipelineHandle, SampleSink};
use deskcast_types::{Codec, PeerId, Sample, StreamMetrics, StreamState};
use parking_lot::Mutex;
use tracing::{debug, info, info_span, warn, Span};

use crate::descriptor::{DescriptorBuilder, DescriptorParams};
use crate::error::CaptureError;
use crate::subscribers::SubscriberTable;
use crate::CaptureResult;

/// Lifecycle state guarded by the stream's mutex.
struct StreamInner {
    handle: PipelineHandle,
    peers: HashSet<PeerId>,
    forced: bool,
    destination: Option<String>,
    suspended: bool,
    rebuild_pending: bool,
    failure: Option<String>,
    closed: bool,
}

/// Owns the pipeline of a single feed.
///
/// The pipeline runs while the feed has subscribers or was force-started,
/// except while suspended for a resize or after a failed construction.
/// Subscriber changes, pipeline create/destroy and suspend/resume are
/// serialised by one mutex; sample delivery only touches the subscriber
/// table.
pub struct StreamManager {
    id: String,
    codec: Codec,
    builder: DescriptorBuilder,
    desktop: Arc<dyn DesktopManager>,
    inner: Mutex<StreamInner>,
    table: Arc<SubscriberTable>,
    span: Span,
}

impl StreamManager {
    /// Create an idle stream. No pipeline is built until first use.
    pub fn new(
        id: impl Into<String>,
        codec: Codec,
        builder: DescriptorBuilder,
        desktop: Arc<dyn DesktopManager>,
        engine: Arc<dyn PipelineEngine>,
        parent: &Span,
    ) -> Self {
        let id = id.into();
        let span = info_span!(parent: parent, "stream", id = %id);

        Self {
            id,
            codec,
            builder,
            desktop,
            inner: Mutex::new(StreamInner {
                handle: PipelineHandle::new(engine),
                peers: HashSet::new(),
                forced: false,
                destination: None,
                suspended: false,
                rebuild_pending: false,
                failure: None,
                closed: false,
            }),
            table: Arc::new(SubscriberTable::new()),
            span,
        }
    }

    /// Get the stream identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the codec the stream is encoded with.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Register a peer and start the pipeline if it is not running.
    ///
    /// A construction error is returned, but the peer stays registered and
    /// the next subscription retries.
    pub fn add_subscriber(&self, peer: PeerId, sink: Sender<Sample>) -> CaptureResult<()> {
        let _enter = self.span.enter();
        let mut inner = self.inner.lock();

        if inner.closed {
            return Err(CaptureError::Closed(self.id.clone()));
        }

        debug!(peer = %peer, "Adding subscriber");
        self.table.insert(peer.clone(), sink);
        inner.peers.insert(peer);

        self.ensure_running(&mut inner)
    }

    /// Unregister a peer; the last one out stops the pipeline unless the
    /// stream was force-started.
    pub fn remove_subscriber(&self, peer: &PeerId) {
        let _enter = self.span.enter();
        let mut inner = self.inner.lock();

        self.table.remove(peer);
        if !inner.peers.remove(peer) {
            return;
        }
        debug!(peer = %peer, "Removed subscriber");

        if inner.peers.is_empty() && !inner.forced {
            self.release(&mut inner);
        }
    }

    /// Start the pipeline regardless of subscribers.
    pub fn force_start(&self) -> CaptureResult<()> {
        let _enter = self.span.enter();
        let mut inner = self.inner.lock();

        if inner.closed {
            return Err(CaptureError::Closed(self.id.clone()));
        }

        inner.forced = true;
        let result = self.ensure_running(&mut inner);
        if result.is_err() {
            inner.forced = false;
        }
        result
    }

    /// Force-start towards `destination`, refusing a second start.
    ///
    /// A stream counts as streaming while forced and either running or
    /// waiting for a resize to finish. A forced stream whose last
    /// construction failed may be started again with a new destination.
    pub(crate) fn force_start_with_destination(&self, destination: &str) -> CaptureResult<()> {
        let _enter = self.span.enter();
        let mut inner = self.inner.lock();

        if inner.closed {
            return Err(CaptureError::Closed(self.id.clone()));
        }
        if inner.forced && (inner.handle.started() || inner.suspended) {
            return Err(CaptureError::AlreadyStreaming(self.id.clone()));
        }

        inner.forced = true;
        inner.destination = Some(destination.to_string());
        let result = self.ensure_running(&mut inner);
        if result.is_err() {
            inner.forced = false;
            inner.destination = None;
        }
        result
    }

    /// Drop the explicit start and any destination it was given. The
    /// pipeline keeps running while peers remain.
    ///
    /// Returns [`CaptureError::NotStreaming`] if the stream was neither
    /// force-started nor running.
    pub fn force_stop(&self) -> CaptureResult<()> {
        let _enter = self.span.enter();
        let mut inner = self.inner.lock();

        inner.destination = None;
        if !inner.forced && !inner.handle.started() {
            return Err(CaptureError::NotStreaming(self.id.clone()));
        }

        inner.forced = false;
        if inner.peers.is_empty() {
            inner.rebuild_pending = false;
            inner.failure = None;
            return self.destroy(&mut inner);
        }
        Ok(())
    }

    /// Tear the pipeline down ahead of a geometry change.
    ///
    /// Returns true if the pipeline will be rebuilt by
    /// [`resume`](Self::resume): it was running, or its last construction
    /// failed while subscribers or an explicit start still want it.
    pub fn suspend(&self) -> bool {
        let _enter = self.span.enter();
        let mut inner = self.inner.lock();

        if inner.closed {
            return false;
        }

        inner.suspended = true;
        if inner.handle.started() {
            inner.rebuild_pending = true;
            if let Err(e) = self.destroy(&mut inner) {
                warn!(error = %e, "Pipeline released with error during teardown");
            }
            debug!("Suspended for resize");
        } else if inner.failure.is_some() && (!inner.peers.is_empty() || inner.forced) {
            inner.rebuild_pending = true;
            debug!("Failed pipeline will be retried after resize");
        }
        inner.rebuild_pending
    }

    /// Rebuild the pipeline after a geometry change with the new size.
    ///
    /// Returns `Ok(true)` if a pipeline was rebuilt. On error the stream
    /// stays dark until the next subscription or explicit start.
    pub fn resume(&self) -> CaptureResult<bool> {
        let _enter = self.span.enter();
        let mut inner = self.inner.lock();

        inner.suspended = false;
        if inner.closed || !inner.rebuild_pending {
            return Ok(false);
        }
        inner.rebuild_pending = false;

        if inner.peers.is_empty() && !inner.forced {
            debug!("No demand left after resize, staying idle");
            return Ok(false);
        }

        self.create(&mut inner).map(|()| true)
    }

    /// Destroy the pipeline and clear all subscribers. The stream refuses
    /// new subscribers afterwards.
    pub fn shutdown(&self) -> CaptureResult<()> {
        let _enter = self.span.enter();
        let mut inner = self.inner.lock();

        inner.closed = true;
        inner.forced = false;
        inner.suspended = false;
        inner.rebuild_pending = false;
        inner.failure = None;
        inner.peers.clear();
        self.table.clear();

        debug!("Shutting down stream");
        self.destroy(&mut inner)
    }

    /// Check if the pipeline is running.
    pub fn started(&self) -> bool {
        self.inner.lock().handle.started()
    }

    /// Get the lifecycle state.
    pub fn state(&self) -> StreamState {
        let inner = self.inner.lock();

        if inner.handle.started() {
            StreamState::Running
        } else if inner.suspended {
            StreamState::Suspended {
                rebuild_pending: inner.rebuild_pending,
            }
        } else if let Some(reason) = &inner.failure {
            StreamState::Failed {
                reason: reason.clone(),
            }
        } else {
            StreamState::Idle
        }
    }

    /// Number of registered peers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().peers.len()
    }

    /// Check if a peer is registered.
    pub fn has_subscriber(&self, peer: &PeerId) -> bool {
        self.inner.lock().peers.contains(peer)
    }

    /// Get a statistics snapshot.
    pub fn stats(&self) -> StreamMetrics {
        let (started, subscribers) = {
            let inner = self.inner.lock();
            (inner.handle.started(), inner.peers.len())
        };
        self.table.stats().snapshot(&self.id, started, subscribers)
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    pub(crate) fn attach_observer(&self, sink: SampleSink) {
        self.table.set_observer(sink);
    }

    pub(crate) fn destination(&self) -> Option<String> {
        self.inner.lock().destination.clone()
    }

    fn ensure_running(&self, inner: &mut StreamInner) -> CaptureResult<()> {
        if inner.suspended {
            debug!("Resize in progress, deferring pipeline start");
            inner.rebuild_pending = true;
            return Ok(());
        }
        if inner.handle.started() {
            return Ok(());
        }
        self.create(inner)
    }

    fn create(&self, inner: &mut StreamInner) -> CaptureResult<()> {
        let screen = self.desktop.screen_size();
        let descriptor = (self.builder)(&DescriptorParams {
            screen,
            destination: inner.destination.as_deref(),
        });

        match inner.handle.create(descriptor, self.table.sink()) {
            Ok(()) => {
                self.table.stats().record_start();
                inner.failure = None;
                info!(%screen, "Pipeline started");
                Ok(())
            }
            Err(source) => {
                self.table.stats().record_failure();
                inner.failure = Some(source.to_string());
                Err(CaptureError::PipelineConstruction {
                    stream: self.id.clone(),
                    source,
                })
            }
        }
    }

    fn destroy(&self, inner: &mut StreamInner) -> CaptureResult<()> {
        if !inner.handle.started() {
            return Ok(());
        }

        let result = inner
            .handle
            .destroy()
            .map_err(|source| CaptureError::PipelineRelease {
                stream: self.id.clone(),
                source,
            });
        info!("Pipeline stopped");
        result
    }

    fn release(&self, inner: &mut StreamInner) {
        inner.rebuild_pending = false;
        inner.failure = None;
        if let Err(e) = self.destroy(inner) {
            warn!(error = %e, "Pipeline released with error");
        }
    }
}

impl fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamManager")
            .field("id", &self.id)
            .field("codec", &self.codec)
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;
    use crate::descriptor::{video_builder, VIDEO_TIERS};
    use bytes::Bytes;
    use deskcast_desktop::VirtualDesktop;
    use deskcast_pipeline::testing::FakeEngine;
    use deskcast_types::{sample_channel, ScreenSize};
    use std::time::Duration;

    fn hd_stream(engine: &FakeEngine, desktop: &Arc<VirtualDesktop>) -> StreamManager {
        StreamManager::new(
            "hd",
            Codec::Vp8,
            video_builder(&CaptureConfig::default(), VIDEO_TIERS[0]),
            desktop.clone(),
            engine.shared(),
            &Span::none(),
        )
    }

    fn setup() -> (FakeEngine, Arc<VirtualDesktop>, StreamManager) {
        let engine = FakeEngine::new();
        let desktop = Arc::new(VirtualDesktop::new(ScreenSize::new(1280, 720, 30)));
        let stream = hd_stream(&engine, &desktop);
        (engine, desktop, stream)
    }

    fn sample() -> Sample {
        Sample::new(Bytes::from_static(b"frame"), Duration::from_millis(40), Duration::ZERO)
    }

    #[test]
    fn test_subscriber_driven_lifecycle() {
        let (engine, _desktop, stream) = setup();
        let (a, b) = (PeerId::from("a"), PeerId::from("b"));

        stream.add_subscriber(a.clone(), sample_channel().0).unwrap();
        assert!(stream.started());
        stream.add_subscriber(b.clone(), sample_channel().0).unwrap();
        assert_eq!(engine.launched().len(), 1);

        stream.remove_subscriber(&a);
        assert!(stream.started());
        stream.remove_subscriber(&b);
        assert!(!stream.started());
        assert_eq!(engine.live_count(), 0);
        assert_eq!(stream.state(), StreamState::Idle);
    }

    #[test]
    fn test_remove_unknown_peer_is_harmless() {
        let (engine, _desktop, stream) = setup();
        stream.force_start().unwrap();

        stream.remove_subscriber(&PeerId::from("ghost"));

        assert!(stream.started());
        assert_eq!(engine.live_count(), 1);
    }

    #[test]
    fn test_construction_error_keeps_subscriber() {
        let (engine, _desktop, stream) = setup();
        engine.fail_launch_when_contains("vp8enc");
        let peer = PeerId::from("a");

        let result = stream.add_subscriber(peer.clone(), sample_channel().0);

        assert!(matches!(result, Err(CaptureError::PipelineConstruction { .. })));
        assert!(stream.has_subscriber(&peer));
        assert!(!stream.started());
        assert!(stream.state().is_failed());

        engine.clear_failures();
        stream
            .add_subscriber(PeerId::from("b"), sample_channel().0)
            .unwrap();
        assert!(stream.started());
        assert_eq!(stream.stats().pipeline_failures, 1);
        assert_eq!(stream.stats().pipeline_starts, 1);
    }

    #[test]
    fn test_forced_stream_survives_last_unsubscribe() {
        let (engine, _desktop, stream) = setup();
        let peer = PeerId::from("a");

        stream.force_start().unwrap();
        stream.add_subscriber(peer.clone(), sample_channel().0).unwrap();
        stream.remove_subscriber(&peer);
        assert!(stream.started());

        stream.force_stop().unwrap();
        assert!(!stream.started());
        assert_eq!(engine.live_count(), 0);
        assert!(matches!(stream.force_stop(), Err(CaptureError::NotStreaming(_))));
    }

    #[test]
    fn test_force_stop_keeps_pipeline_for_subscribers() {
        let (_engine, _desktop, stream) = setup();

        stream.force_start().unwrap();
        stream
            .add_subscriber(PeerId::from("a"), sample_channel().0)
            .unwrap();
        stream.force_stop().unwrap();

        assert!(stream.started());
    }

    #[test]
    fn test_suspend_resume_rebuilds_with_new_size() {
        let (engine, desktop, stream) = setup();
        stream
            .add_subscriber(PeerId::from("a"), sample_channel().0)
            .unwrap();

        assert!(stream.suspend());
        assert!(!stream.started());
        assert_eq!(
            stream.state(),
            StreamState::Suspended {
                rebuild_pending: true
            }
        );

        desktop
            .set_screen_size(ScreenSize::new(1920, 1080, 30))
            .unwrap();
        assert!(stream.resume().unwrap());

        assert!(stream.started());
        assert_eq!(engine.live_count(), 1);
        assert!(engine
            .last_launched_containing("vp8enc")
            .unwrap()
            .as_str()
            .contains("target-bitrate=3110400"));
    }

    #[test]
    fn test_idle_stream_not_rebuilt() {
        let (engine, _desktop, stream) = setup();

        assert!(!stream.suspend());
        assert!(!stream.resume().unwrap());

        assert!(!stream.started());
        assert!(engine.launched().is_empty());
    }

    #[test]
    fn test_subscribe_during_suspension_is_deferred() {
        let (engine, _desktop, stream) = setup();

        stream.suspend();
        stream
            .add_subscriber(PeerId::from("a"), sample_channel().0)
            .unwrap();
        assert!(!stream.started());
        assert!(engine.launched().is_empty());

        assert!(stream.resume().unwrap());
        assert!(stream.started());
    }

    #[test]
    fn test_failed_rebuild_stays_dark_until_resubscribe() {
        let (engine, _desktop, stream) = setup();
        stream
            .add_subscriber(PeerId::from("a"), sample_channel().0)
            .unwrap();

        stream.suspend();
        engine.fail_launch_when_contains("vp8enc");
        assert!(stream.resume().is_err());
        assert!(!stream.started());
        assert!(stream.state().is_failed());
        assert_eq!(stream.subscriber_count(), 1);

        engine.clear_failures();
        stream
            .add_subscriber(PeerId::from("b"), sample_channel().0)
            .unwrap();
        assert!(stream.started());
        assert_eq!(stream.state(), StreamState::Running);
    }

    #[test]
    fn test_failed_subscription_retried_by_resize() {
        let (engine, desktop, stream) = setup();
        engine.fail_launch_when_contains("vp8enc");
        assert!(stream
            .add_subscriber(PeerId::from("a"), sample_channel().0)
            .is_err());
        engine.clear_failures();

        assert!(stream.suspend());
        desktop
            .set_screen_size(ScreenSize::new(1920, 1080, 30))
            .unwrap();
        assert!(stream.resume().unwrap());

        assert!(stream.started());
        assert_eq!(stream.state(), StreamState::Running);
        assert!(engine
            .last_launched_containing("vp8enc")
            .unwrap()
            .as_str()
            .contains("target-bitrate=3110400"));
    }

    #[test]
    fn test_failed_forced_start_without_demand_not_retried() {
        let (engine, _desktop, stream) = setup();
        engine.fail_launch_when_contains("vp8enc");
        assert!(stream.force_start().is_err());
        engine.clear_failures();

        assert!(!stream.suspend());
        assert!(!stream.resume().unwrap());
        assert!(!stream.started());
    }

    #[test]
    fn test_destination_start_refused_while_suspended() {
        let (engine, _desktop, stream) = setup();
        stream.force_start_with_destination("first").unwrap();

        stream.suspend();
        assert!(matches!(
            stream.force_start_with_destination("second"),
            Err(CaptureError::AlreadyStreaming(_))
        ));
        assert_eq!(stream.destination().as_deref(), Some("first"));

        assert!(stream.resume().unwrap());
        assert_eq!(engine.live_count(), 1);
        assert_eq!(stream.destination().as_deref(), Some("first"));
    }

    #[test]
    fn test_force_stop_clears_destination() {
        let (_engine, _desktop, stream) = setup();
        stream.force_start_with_destination("first").unwrap();

        stream.force_stop().unwrap();

        assert!(stream.destination().is_none());
        assert!(!stream.started());
    }

    #[test]
    fn test_shutdown_refuses_new_subscribers() {
        let (engine, _desktop, stream) = setup();
        stream
            .add_subscriber(PeerId::from("a"), sample_channel().0)
            .unwrap();

        stream.shutdown().unwrap();

        assert!(!stream.started());
        assert_eq!(stream.subscriber_count(), 0);
        assert_eq!(engine.live_count(), 0);
        assert!(matches!(
            stream.add_subscriber(PeerId::from("b"), sample_channel().0),
            Err(CaptureError::Closed(_))
        ));
    }

    #[test]
    fn test_samples_reach_subscribers() {
        let (engine, _desktop, stream) = setup();
        let (tx, rx) = sample_channel();
        stream.add_subscriber(PeerId::from("a"), tx).unwrap();

        assert_eq!(engine.emit("vp8enc", sample()), 1);

        assert_eq!(rx.try_recv().unwrap(), sample());
        assert_eq!(stream.stats().samples_delivered, 1);
    }
}
