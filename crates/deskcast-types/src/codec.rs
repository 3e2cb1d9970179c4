//! Codec selection for audio and video feeds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Media kind handled by a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecKind {
    Audio,
    Video,
    Image,
}

/// Codecs a stream can be encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Vp8,
    Vp9,
    H264,
    Opus,
    G722,
    Pcmu,
    Pcma,
    Jpeg,
}

impl Codec {
    /// Returns the codec name as negotiated with peers.
    pub fn name(self) -> &'static str {
        match self {
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
            Self::H264 => "h264",
            Self::Opus => "opus",
            Self::G722 => "g722",
            Self::Pcmu => "pcmu",
            Self::Pcma => "pcma",
            Self::Jpeg => "jpeg",
        }
    }

    /// Returns the media kind.
    pub fn kind(self) -> CodecKind {
        match self {
            Self::Vp8 | Self::Vp9 | Self::H264 => CodecKind::Video,
            Self::Opus | Self::G722 | Self::Pcmu | Self::Pcma => CodecKind::Audio,
            Self::Jpeg => CodecKind::Image,
        }
    }

    /// Returns the fixed encoder fragment for audio codecs.
    ///
    /// Video encoders are parameterised per quality tier and are built by
    /// the capture crate instead.
    pub fn audio_encoder(self) -> Option<&'static str> {
        match self {
            Self::Opus => Some("opusenc bitrate=128000"),
            Self::G722 => Some("avenc_g722"),
            Self::Pcmu => Some("audio/x-raw, rate=8000 ! mulawenc"),
            Self::Pcma => Some("audio/x-raw, rate=8000 ! alawenc"),
            Self::Vp8 | Self::Vp9 | Self::H264 | Self::Jpeg => None,
        }
    }

    /// Returns true for video codecs.
    pub fn is_video(self) -> bool {
        self.kind() == CodecKind::Video
    }

    /// Returns true for audio codecs.
    pub fn is_audio(self) -> bool {
        self.kind() == CodecKind::Audio
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
