//! On-demand still-frame screencast.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use deskcast_desktop::DesktopManager;
use deskcast_pipeline::PipelineEngine;
use deskcast_types::{Codec, Sample, StreamMetrics, StreamState};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn, Span};

use crate::descriptor::DescriptorBuilder;
use crate::error::CaptureError;
use crate::stream::StreamManager;
use crate::CaptureResult;

/// Identifier of the screencast stream.
pub const SCREENCAST_ID: &str = "screencast";

/// How long [`ScreencastManager::image`] waits for a first frame.
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle time after the last image request before the pipeline stops.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Most recent frame, written from the pipeline thread.
#[derive(Default)]
struct FrameSlot {
    image: Mutex<Option<Bytes>>,
    ready: Condvar,
}

impl FrameSlot {
    fn store(&self, sample: Sample) {
        *self.image.lock() = Some(sample.data);
        self.ready.notify_all();
    }

    fn clear(&self) {
        *self.image.lock() = None;
    }

    fn wait(&self, deadline: Instant) -> Option<Bytes> {
        let mut image = self.image.lock();
        while image.is_none() {
            if self.ready.wait_until(&mut image, deadline).timed_out() {
                break;
            }
        }
        image.clone()
    }
}

/// Produces JPEG stills of the screen on request.
///
/// When disabled by configuration every control operation is a no-op and
/// [`started`](Self::started) is always false.
pub struct ScreencastManager {
    enabled: bool,
    stream: StreamManager,
    frame: Arc<FrameSlot>,
    last_request: Mutex<Option<Instant>>,
    image_timeout: Duration,
    idle_timeout: Duration,
}

impl ScreencastManager {
    pub(crate) fn new(
        enabled: bool,
        builder: DescriptorBuilder,
        desktop: Arc<dyn DesktopManager>,
        engine: Arc<dyn PipelineEngine>,
        parent: &Span,
    ) -> Self {
        let stream = StreamManager::new(SCREENCAST_ID, Codec::Jpeg, builder, desktop, engine, parent);
        let frame = Arc::new(FrameSlot::default());

        let slot = Arc::clone(&frame);
        stream.attach_observer(Arc::new(move |sample: Sample| slot.store(sample)));

        Self {
            enabled,
            stream,
            frame,
            last_request: Mutex::new(None),
            image_timeout: IMAGE_TIMEOUT,
            idle_timeout: IDLE_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_timeouts(mut self, image_timeout: Duration, idle_timeout: Duration) -> Self {
        self.image_timeout = image_timeout;
        self.idle_timeout = idle_timeout;
        self
    }

    /// Check if the screencast is enabled by configuration.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Check if the pipeline is running.
    pub fn started(&self) -> bool {
        self.enabled && self.stream.started()
    }

    /// Start producing frames.
    pub fn start(&self) -> CaptureResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.stream.force_start()
    }

    /// Stop producing frames.
    pub fn stop(&self) -> CaptureResult<()> {
        if !self.enabled {
            return Ok(());
        }
        match self.stream.force_stop() {
            Err(CaptureError::NotStreaming(_)) => Ok(()),
            other => {
                self.frame.clear();
                other
            }
        }
    }

    /// Get the most recent frame, starting the pipeline on demand.
    ///
    /// Blocks until the first frame arrives, up to the image timeout.
    pub fn image(&self) -> CaptureResult<Bytes> {
        if !self.enabled {
            return Err(CaptureError::SubsystemUnavailable(SCREENCAST_ID.into()));
        }
        let _enter = self.stream.span().enter();

        let now = Instant::now();
        *self.last_request.lock() = Some(now);

        if !self.stream.started() {
            debug!("Starting screencast on demand");
            self.stream.force_start()?;
        }

        self.frame
            .wait(now + self.image_timeout)
            .ok_or_else(|| CaptureError::ImageTimeout {
                stream: SCREENCAST_ID.into(),
                timeout: self.image_timeout,
            })
    }

    /// Stop the pipeline if no image was requested for the idle timeout.
    /// Returns true if it was stopped.
    pub fn stop_if_idle(&self, now: Instant) -> bool {
        if !self.enabled {
            return false;
        }

        let mut last_request = self.last_request.lock();
        let Some(requested) = *last_request else {
            return false;
        };
        if now.saturating_duration_since(requested) < self.idle_timeout {
            return false;
        }

        *last_request = None;
        let _enter = self.stream.span().enter();
        match self.stream.force_stop() {
            Ok(()) => info!("Screencast idle, pipeline stopped"),
            Err(CaptureError::NotStreaming(_)) => {}
            Err(e) => warn!(error = %e, "Screencast idle stop failed"),
        }
        self.frame.clear();
        true
    }

    /// Forget the last frame so no image of the old geometry is served.
    pub(crate) fn discard_frame(&self) {
        self.frame.clear();
    }

    #[cfg(test)]
    pub(crate) fn latest_frame(&self) -> Option<Bytes> {
        self.frame.image.lock().clone()
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
