//! Capture manager: owns every feed and coordinates screen resizes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use deskcast_desktop::DesktopManager;
use deskcast_pipeline::PipelineEngine;
use deskcast_types::{
    event_channel, CaptureEvent, PeerId, Sample, ScreenSize, StreamMetrics,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, info_span, instrument, warn, Span};

use crate::broadcast::BroadcastManager;
use crate::config::CaptureConfig;
use crate::descriptor::{
    audio_builder, broadcast_builder, screencast_builder, video_builder, VIDEO_TIERS,
};
use crate::error::CaptureError;
use crate::screencast::ScreencastManager;
use crate::stream::StreamManager;
use crate::CaptureResult;

/// Identifier of the audio stream.
pub const AUDIO_ID: &str = "audio";

/// How often the screencast reaper checks for idleness.
const REAPER_INTERVAL: Duration = Duration::from_millis(500);

/// State shared with the desktop listeners and the reaper thread.
struct CaptureInner {
    desktop: Arc<dyn DesktopManager>,
    broadcast: BroadcastManager,
    screencast: ScreencastManager,
    audio: StreamManager,
    videos: Vec<StreamManager>,
    autostart_url: Option<String>,
    events: RwLock<Option<Sender<CaptureEvent>>>,
    shut_down: AtomicBool,
    span: Span,
}

struct Reaper {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the audio, broadcast, screencast and video-tier feeds.
///
/// Registers itself with the desktop on [`start`](Self::start); the
/// listeners hold only a weak reference, so dropping the manager is enough
/// to detach it.
pub struct CaptureManager {
    inner: Arc<CaptureInner>,
    started: AtomicBool,
    reaper: Mutex<Option<Reaper>>,
}

impl CaptureManager {
    /// Build every stream manager. No pipeline is started.
    pub fn new(
        desktop: Arc<dyn DesktopManager>,
        engine: Arc<dyn PipelineEngine>,
        config: &CaptureConfig,
    ) -> CaptureResult<Self> {
        config.validate()?;

        let span = info_span!("capture");
        let stream = |id: &str, codec, builder| {
            StreamManager::new(
                id,
                codec,
                builder,
                Arc::clone(&desktop),
                Arc::clone(&engine),
                &span,
            )
        };

        let audio = stream(AUDIO_ID, config.audio_codec, audio_builder(config));
        let videos = VIDEO_TIERS
            .iter()
            .map(|tier| stream(tier.id, config.video_codec, video_builder(config, *tier)))
            .collect();

        let broadcast = BroadcastManager::new(
            broadcast_builder(config),
            Arc::clone(&desktop),
            Arc::clone(&engine),
            &span,
        );
        let screencast = ScreencastManager::new(
            config.screencast_enabled,
            screencast_builder(config),
            Arc::clone(&desktop),
            Arc::clone(&engine),
            &span,
        );

        span.in_scope(|| {
            info!(
                engine = engine.name(),
                display = %config.display,
                video_codec = %config.video_codec,
                audio_codec = %config.audio_codec,
                screencast = config.screencast_enabled,
                "Capture manager created"
            )
        });

        Ok(Self {
            inner: Arc::new(CaptureInner {
                desktop,
                broadcast,
                screencast,
                audio,
                videos,
                autostart_url: config.broadcast_autostart_url.clone(),
                events: RwLock::new(None),
                shut_down: AtomicBool::new(false),
                span,
            }),
            started: AtomicBool::new(false),
            reaper: Mutex::new(None),
        })
    }

    /// Register the resize listeners, start the configured broadcast and
    /// the screencast reaper.
    ///
    /// A broadcast that cannot be constructed here is returned as an error
    /// and is meant to abort the process.
    #[instrument(name = "capture_start", skip(self))]
    pub fn start(&self) -> CaptureResult<()> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(CaptureError::Closed("capture".into()));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Capture manager already started");
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        self.inner
            .desktop
            .on_before_screen_size_change(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.before_resize();
                }
            }));

        let weak = Arc::downgrade(&self.inner);
        self.inner
            .desktop
            .on_after_screen_size_change(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.after_resize();
                }
            }));

        if let Some(url) = &self.inner.autostart_url {
            if let Err(e) = self.inner.broadcast.start(url) {
                error!(error = %e, "Unable to create broadcast pipeline");
                return Err(e);
            }
        }

        if self.inner.screencast.enabled() {
            *self.reaper.lock() = Some(spawn_reaper(Arc::downgrade(&self.inner)));
        }

        info!(screen = %self.screen_size(), "Capture manager started");
        Ok(())
    }

    /// Shut down every stream exactly once.
    ///
    /// Every stream is attempted; the first error is returned. Afterwards
    /// every stream reports `started() == false`.
    #[instrument(name = "capture_shutdown", skip(self))]
    pub fn shutdown(&self) -> CaptureResult<()> {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Capture shutting down");

        if let Some(reaper) = self.reaper.lock().take() {
            drop(reaper.stop_tx);
            if reaper.handle.join().is_err() {
                warn!("Screencast reaper panicked");
            }
        }

        let inner = &self.inner;
        let mut first_error = None;
        let streams = [inner.broadcast.stream(), inner.screencast.stream(), &inner.audio]
            .into_iter()
            .chain(inner.videos.iter());

        for stream in streams {
            if let Err(e) = stream.shutdown() {
                warn!(stream = stream.id(), error = %e, "Stream shutdown failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        inner.emit(CaptureEvent::ShutdownCompleted);
        info!("Capture shut down");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Get the broadcast manager.
    pub fn broadcast(&self) -> &BroadcastManager {
        &self.inner.broadcast
    }

    /// Get the screencast manager.
    pub fn screencast(&self) -> &ScreencastManager {
        &self.inner.screencast
    }

    /// Get the audio stream.
    pub fn audio(&self) -> &StreamManager {
        &self.inner.audio
    }

    /// Get a video tier by id.
    pub fn video(&self, id: &str) -> Option<&StreamManager> {
        self.inner.videos.iter().find(|video| video.id() == id)
    }

    /// Video tier ids, best quality first.
    pub fn video_ids(&self) -> Vec<&'static str> {
        VIDEO_TIERS.iter().map(|tier| tier.id).collect()
    }

    /// Move a peer between video tiers.
    ///
    /// The peer is subscribed to `to` before it leaves `from`, so it never
    /// goes without a running feed. On error it stays on `from`.
    pub fn switch_video(
        &self,
        peer: &PeerId,
        from: &str,
        to: &str,
        sink: Sender<Sample>,
    ) -> CaptureResult<()> {
        let source = self
            .video(from)
            .ok_or_else(|| CaptureError::UnknownTier(from.into()))?;
        let target = self
            .video(to)
            .ok_or_else(|| CaptureError::UnknownTier(to.into()))?;

        if from == to {
            return target.add_subscriber(peer.clone(), sink);
        }

        debug!(peer = %peer, from, to, "Switching video tier");
        if let Err(e) = target.add_subscriber(peer.clone(), sink) {
            target.remove_subscriber(peer);
            return Err(e);
        }
        source.remove_subscriber(peer);
        Ok(())
    }

    /// Statistics of every stream: audio, broadcast, screencast, then the
    /// video tiers.
    pub fn stats(&self) -> Vec<StreamMetrics> {
        let inner = &self.inner;
        let mut stats = vec![
            inner.audio.stats(),
            inner.broadcast.stats(),
            inner.screencast.stats(),
        ];
        stats.extend(inner.videos.iter().map(StreamManager::stats));
        stats
    }

    /// Subscribe to capture events. Replaces any previous subscription.
    pub fn events(&self) -> Receiver<CaptureEvent> {
        let (tx, rx) = event_channel();
        *self.inner.events.write() = Some(tx);
        rx
    }

    /// Current screen size as reported by the desktop.
    pub fn screen_size(&self) -> ScreenSize {
        self.inner.desktop.screen_size()
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Capture shutdown on drop failed");
        }
    }
}

impl CaptureInner {
    /// Streams whose pipelines depend on the screen geometry, in rebuild
    /// order.
    fn geometry_bound(&self) -> impl Iterator<Item = &StreamManager> {
        self.videos
            .iter()
            .chain([self.broadcast.stream(), self.screencast.stream()])
    }

    fn before_resize(&self) {
        let _enter = self.span.enter();
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }

        let previous = self.desktop.screen_size();
        info!(%previous, "Screen size changing, tearing down pipelines");

        let suspended = self.geometry_bound().filter(|stream| stream.suspend()).count();
        self.screencast.discard_frame();
        debug!(suspended, "Teardown complete");

        self.emit(CaptureEvent::ResizeStarted { previous });
    }

    fn after_resize(&self) {
        let _enter = self.span.enter();
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }

        let current = self.desktop.screen_size();
        let mut rebuilt = Vec::new();
        let mut failed = Vec::new();

        for stream in self.geometry_bound() {
            match stream.resume() {
                Ok(true) => rebuilt.push(stream.id().to_string()),
                Ok(false) => {}
                Err(e) => {
                    error!(
                        fatal = true,
                        stream = stream.id(),
                        error = %e,
                        "Unable to recreate pipeline"
                    );
                    failed.push(stream.id().to_string());
                    self.emit(CaptureEvent::StreamFailed {
                        stream: stream.id().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            %current,
            rebuilt = rebuilt.len(),
            failed = failed.len(),
            "Resize complete"
        );
        self.emit(CaptureEvent::ResizeCompleted {
            current,
            rebuilt,
            failed,
        });
    }

    fn emit(&self, event: CaptureEvent) {
        if let Some(tx) = self.events.read().as_ref() {
            if let Err(e) = tx.try_send(event) {
                warn!("Failed to send capture event: {}", e);
            }
        }
    }
}

fn spawn_reaper(inner: Weak<CaptureInner>) -> Reaper {
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

    let handle = thread::spawn(move || loop {
        match stop_rx.recv_timeout(REAPER_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.screencast.stop_if_idle(Instant::now());
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    });

    Reaper { stop_tx, handle }
}
