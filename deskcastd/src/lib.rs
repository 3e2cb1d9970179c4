//! Desktop capture daemon.
//!
//! Runs the capture manager against a virtual desktop and drives it with
//! line commands read from stdin.

mod commands;

pub use commands::{ParseCommandError, ServiceCommand};

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deskcast_capture::{CaptureConfig, CaptureManager};
use deskcast_desktop::{DesktopManager, VirtualDesktop};
use deskcast_pipeline::PipelineEngine;
use deskcast_types::{CaptureEvent, ScreenSize, StreamMetrics};

/// Initialize logging.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "deskcastd=debug,deskcast_capture=debug,deskcast_pipeline=debug,deskcast_desktop=debug"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load the capture configuration, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<CaptureConfig> {
    let Some(path) = path else {
        info!("No configuration file given, using defaults");
        return Ok(CaptureConfig::default());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Unable to read configuration {}", path.display()))?;
    let config = serde_json::from_str(&text)
        .with_context(|| format!("Invalid configuration {}", path.display()))?;

    info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

/// Status line printed by the `status` command.
#[derive(Debug, Serialize)]
pub struct Status {
    pub screen: ScreenSize,
    pub broadcast_url: Option<String>,
    pub streams: Vec<StreamMetrics>,
}

/// Capture manager plus the desktop it watches.
pub struct Daemon {
    desktop: Arc<VirtualDesktop>,
    capture: CaptureManager,
    events: Receiver<CaptureEvent>,
}

impl Daemon {
    /// Build and start the capture manager.
    ///
    /// Fails if the configured broadcast cannot be started.
    pub fn start(
        desktop: Arc<VirtualDesktop>,
        engine: Arc<dyn PipelineEngine>,
        config: &CaptureConfig,
    ) -> anyhow::Result<Self> {
        let capture = CaptureManager::new(desktop.clone(), engine, config)
            .context("Invalid capture configuration")?;
        let events = capture.events();
        capture.start().context("Unable to start capture")?;

        Ok(Self {
            desktop,
            capture,
            events,
        })
    }

    /// Get the capture manager.
    pub fn capture(&self) -> &CaptureManager {
        &self.capture
    }

    /// Execute one command. Returns false once the daemon should exit.
    ///
    /// Command failures are logged; they never stop the daemon.
    pub fn handle(&self, command: ServiceCommand) -> bool {
        debug!(?command, "Handling command");

        let result = match command {
            ServiceCommand::Resize(size) => self
                .desktop
                .set_screen_size(size)
                .context("Resize failed"),
            ServiceCommand::BroadcastStart(url) => self
                .capture
                .broadcast()
                .start(&url)
                .context("Broadcast start failed"),
            ServiceCommand::BroadcastStop => self
                .capture
                .broadcast()
                .stop()
                .context("Broadcast stop failed"),
            ServiceCommand::Screencast => self
                .capture
                .screencast()
                .image()
                .map(|image| info!(bytes = image.len(), "Screencast image captured"))
                .context("Screencast failed"),
            ServiceCommand::Status => self.print_status(),
            ServiceCommand::Quit => return false,
        };

        if let Err(e) = result {
            warn!("{:#}", e);
        }
        self.drain_events();
        true
    }

    /// Current status of the desktop and every stream.
    pub fn status(&self) -> Status {
        Status {
            screen: self.desktop.screen_size(),
            broadcast_url: self.capture.broadcast().url(),
            streams: self.capture.stats(),
        }
    }

    /// Shut every stream down.
    pub fn shutdown(self) -> anyhow::Result<()> {
        let result = self.capture.shutdown().context("Capture shutdown failed");
        self.drain_events();
        result
    }

    fn print_status(&self) -> anyhow::Result<()> {
        let line = serde_json::to_string(&self.status())?;
        println!("{line}");
        Ok(())
    }

    fn drain_events(&self) {
        for event in self.events.try_iter() {
            match &event {
                CaptureEvent::StreamFailed { stream, message } => {
                    error!(stream = %stream, "Stream failed: {}", message)
                }
                _ => info!(?event, "Capture event"),
            }
        }
    }
}

/// Read commands from stdin on a background thread.
fn spawn_stdin_reader() -> Receiver<String> {
    let (line_tx, line_rx) = crossbeam_channel::bounded(16);

    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line_tx.send(line).is_err() {
                break;
            }
        }
        debug!("Stdin closed");
    });

    line_rx
}

/// Run the daemon until `quit` or end of input.
pub fn run() -> anyhow::Result<()> {
    init_logging();
    info!("deskcastd starting");

    let config_path = std::env::args_os().nth(1).map(std::path::PathBuf::from);
    let config = load_config(config_path.as_deref())?;

    let engine = deskcast_pipeline::default_engine().context("No pipeline engine available")?;
    let desktop = Arc::new(VirtualDesktop::new(ScreenSize::default()));
    let daemon = Daemon::start(desktop, engine, &config)?;

    let lines = spawn_stdin_reader();
    loop {
        match lines.recv_timeout(Duration::from_millis(100)) {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => match line.parse::<ServiceCommand>() {
                Ok(command) => {
                    if !daemon.handle(command) {
                        break;
                    }
                }
                Err(e) => warn!("{}", e),
            },
            Err(RecvTimeoutError::Timeout) => daemon.drain_events(),
            Err(RecvTimeoutError::Disconnected) => {
                info!("Input closed, shutting down");
                break;
            }
        }
    }

    daemon.shutdown()?;
    info!("deskcastd stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskcast_pipeline::testing::FakeEngine;

    fn daemon(config: CaptureConfig) -> (FakeEngine, Daemon) {
        let engine = FakeEngine::new();
        let desktop = Arc::new(VirtualDesktop::new(ScreenSize::new(1280, 720, 30)));
        let daemon = Daemon::start(desktop, engine.shared(), &config).unwrap();
        (engine, daemon)
    }

    #[test]
    fn test_broadcast_commands() {
        let (engine, daemon) = daemon(CaptureConfig::default());

        assert!(daemon.handle(ServiceCommand::BroadcastStart(
            "rtmp://ingest.example.com/live".into()
        )));
        assert!(daemon.capture().broadcast().started());
        assert_eq!(
            daemon.status().broadcast_url.as_deref(),
            Some("rtmp://ingest.example.com/live")
        );

        assert!(daemon.handle(ServiceCommand::BroadcastStop));
        assert!(!daemon.capture().broadcast().started());
        assert_eq!(engine.live_count(), 0);
    }

    #[test]
    fn test_resize_command_rebuilds_broadcast() {
        let (engine, daemon) = daemon(CaptureConfig::default());
        daemon.handle(ServiceCommand::BroadcastStart(
            "rtmp://ingest.example.com/live".into(),
        ));

        daemon.handle(ServiceCommand::Resize(ScreenSize::new(1920, 1080, 30)));

        assert_eq!(daemon.status().screen, ScreenSize::new(1920, 1080, 30));
        assert!(daemon.capture().broadcast().started());
        assert_eq!(engine.launched().len(), 2);
    }

    #[test]
    fn test_failing_commands_keep_running() {
        let (_engine, daemon) = daemon(CaptureConfig::default());

        assert!(daemon.handle(ServiceCommand::Screencast));
        assert!(daemon.handle(ServiceCommand::BroadcastStart("bad url".into())));
        assert!(daemon.handle(ServiceCommand::Resize(ScreenSize::new(0, 0, 30))));
        assert!(!daemon.handle(ServiceCommand::Quit));
    }

    #[test]
    fn test_autostart_failure_is_fatal() {
        let engine = FakeEngine::new();
        engine.fail_launch_when_contains("rtmpsink");
        let config = CaptureConfig {
            broadcast_autostart_url: Some("rtmp://ingest.example.com/live".into()),
            ..Default::default()
        };

        let result = Daemon::start(Arc::new(VirtualDesktop::default()), engine.shared(), &config);

        assert!(result.is_err());
    }

    #[test]
    fn test_status_lists_every_stream() {
        let (_engine, daemon) = daemon(CaptureConfig::default());

        let status = daemon.status();

        assert_eq!(status.streams.len(), 7);
        assert!(serde_json::to_string(&status).unwrap().contains("\"stream\":\"hd\""));
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        assert_eq!(load_config(None).unwrap(), CaptureConfig::default());
    }
}
