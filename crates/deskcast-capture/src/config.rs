//! Capture configuration, read once at construction.

use deskcast_types::Codec;
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::CaptureResult;

/// Configuration of every capture feed.
///
/// Explicit pipeline templates take precedence over the templates derived
/// from the display, audio device and codec settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// X display captured by every video feed (e.g., ":99.0").
    pub display: String,

    /// PulseAudio source captured by the audio and broadcast feeds.
    pub audio_device: String,

    /// Codec of the audio feed.
    pub audio_codec: Codec,

    /// Codec of the video tiers.
    pub video_codec: Codec,

    /// Explicit audio pipeline template.
    pub audio_pipeline: Option<String>,

    /// Explicit video pipeline template, shared by every tier.
    pub video_pipeline: Option<String>,

    /// Explicit broadcast pipeline template. Must contain `{url}`.
    pub broadcast_pipeline: Option<String>,

    /// Broadcast audio bitrate in kbps.
    pub broadcast_audio_bitrate: u32,

    /// Broadcast video bitrate in kbps.
    pub broadcast_video_bitrate: u32,

    /// x264 speed preset of the broadcast encoder.
    pub broadcast_preset: String,

    /// Destination started together with the capture manager.
    pub broadcast_autostart_url: Option<String>,

    /// Whether the screencast feed is available.
    pub screencast_enabled: bool,

    /// Screencast frame rate as a GStreamer fraction (e.g., "10/1").
    pub screencast_rate: String,

    /// JPEG quality of screencast frames (0-100).
    pub screencast_quality: String,

    /// Explicit screencast pipeline template.
    pub screencast_pipeline: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            display: ":99.0".into(),
            audio_device: "audio_output.monitor".into(),
            audio_codec: Codec::Opus,
            video_codec: Codec::Vp8,
            audio_pipeline: None,
            video_pipeline: None,
            broadcast_pipeline: None,
            broadcast_audio_bitrate: 128,
            broadcast_video_bitrate: 4096,
            broadcast_preset: "veryfast".into(),
            broadcast_autostart_url: None,
            screencast_enabled: false,
            screencast_rate: "10/1".into(),
            screencast_quality: "60".into(),
            screencast_pipeline: None,
        }
    }
}

impl CaptureConfig {
    /// Check the configuration for values no pipeline could be built from.
    pub fn validate(&self) -> CaptureResult<()> {
        if self.display.trim().is_empty() {
            return Err(invalid("display", "must not be empty"));
        }
        if self.audio_device.trim().is_empty() {
            return Err(invalid("audio_device", "must not be empty"));
        }
        if !self.audio_codec.is_audio() {
            return Err(invalid(
                "audio_codec",
                format!("{} is not an audio codec", self.audio_codec.name()),
            ));
        }
        if !self.video_codec.is_video() {
            return Err(invalid(
                "video_codec",
                format!("{} is not a video codec", self.video_codec.name()),
            ));
        }
        if self.broadcast_audio_bitrate == 0 {
            return Err(invalid("broadcast_audio_bitrate", "must be positive"));
        }
        if self.broadcast_video_bitrate == 0 {
            return Err(invalid("broadcast_video_bitrate", "must be positive"));
        }
        if self.broadcast_preset.trim().is_empty() {
            return Err(invalid("broadcast_preset", "must not be empty"));
        }

        parse_fraction(&self.screencast_rate)
            .ok_or_else(|| invalid("screencast_rate", "expected a fraction such as 10/1"))?;

        match self.screencast_quality.parse::<u8>() {
            Ok(q) if q <= 100 => {}
            _ => return Err(invalid("screencast_quality", "expected an integer 0-100")),
        }

        for (field, template) in [
            ("audio_pipeline", &self.audio_pipeline),
            ("video_pipeline", &self.video_pipeline),
            ("screencast_pipeline", &self.screencast_pipeline),
        ] {
            if let Some(template) = template {
                if !template.contains("appsink name=appsink") {
                    return Err(invalid(field, "must end in `appsink name=appsink`"));
                }
            }
        }

        if let Some(template) = &self.broadcast_pipeline {
            if !template.contains("{url}") {
                return Err(invalid("broadcast_pipeline", "must contain {url}"));
            }
        }

        Ok(())
    }
}

/// Parse a positive "N/D" fraction.
pub(crate) fn parse_fraction(s: &str) -> Option<(u32, u32)> {
    let (num, den) = s.split_once('/')?;
    let num = num.trim().parse::<u32>().ok()?;
    let den = den.trim().parse::<u32>().ok()?;
    (num > 0 && den > 0).then_some((num, den))
}

fn invalid(field: &str, message: impl Into<String>) -> CaptureError {
    CaptureError::InvalidConfig {
        field: field.into(),
        message: message.into(),
    }
}
