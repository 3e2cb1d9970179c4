#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use deskcast_capture::{CaptureConfig, CaptureManager};
use deskcast_desktop::VirtualDesktop;
use deskcast_pipeline::testing::FakeEngine;
use deskcast_types::{Sample, ScreenSize};

pub const SMALL: ScreenSize = ScreenSize::new(1280, 720, 30);
pub const LARGE: ScreenSize = ScreenSize::new(1920, 1080, 30);

pub struct Harness {
    pub engine: FakeEngine,
    pub desktop: Arc<VirtualDesktop>,
    pub capture: CaptureManager,
}

pub fn harness(config: CaptureConfig) -> Harness {
    let engine = FakeEngine::new();
    let desktop = Arc::new(VirtualDesktop::new(SMALL));
    let capture = CaptureManager::new(desktop.clone(), engine.shared(), &config).unwrap();
    capture.start().unwrap();

    Harness {
        engine,
        desktop,
        capture,
    }
}

pub fn frame(tag: &'static [u8]) -> Sample {
    Sample::new(Bytes::from_static(tag), Duration::from_millis(40), Duration::ZERO)
}

/// Pattern matching only the descriptor of one video tier.
pub fn tier_pattern(framerate: u32) -> String {
    format!("framerate={framerate}/1 ! videoconvert ! queue ! vp8enc")
}
