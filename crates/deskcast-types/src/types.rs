//! Common types shared across the capture core.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Geometry and refresh rate of the virtual screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScreenSize {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Refresh rate in Hz.
    pub rate: i16,
}

impl ScreenSize {
    /// Create a new screen size.
    pub const fn new(width: u32, height: u32, rate: i16) -> Self {
        Self {
            width,
            height,
            rate,
        }
    }

    /// Total number of pixels.
    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self::new(1280, 720, 30)
    }
}

impl fmt::Display for ScreenSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.rate)
    }
}

/// Error returned when parsing a `WIDTHxHEIGHT[@RATE]` string fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseScreenSizeError {
    /// The `x` separator is missing.
    #[error("expected WIDTHxHEIGHT[@RATE], got {0:?}")]
    Format(String),

    /// A component is not a valid number.
    #[error("invalid {component} in {input:?}")]
    Number {
        component: &'static str,
        input: String,
    },
}

impl FromStr for ScreenSize {
    type Err = ParseScreenSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (geometry, rate) = match s.split_once('@') {
            Some((geometry, rate)) => (geometry, Some(rate)),
            None => (s, None),
        };

        let (width, height) = geometry
            .split_once(['x', 'X'])
            .ok_or_else(|| ParseScreenSizeError::Format(s.to_string()))?;

        let number = |component: &'static str| ParseScreenSizeError::Number {
            component,
            input: s.to_string(),
        };

        let width = width.trim().parse().map_err(|_| number("width"))?;
        let height = height.trim().parse().map_err(|_| number("height"))?;
        let rate = match rate {
            Some(rate) => rate.trim().parse().map_err(|_| number("rate"))?,
            None => ScreenSize::default().rate,
        };

        Ok(Self::new(width, height, rate))
    }
}

/// An encoded media sample emitted by a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Encoded payload.
    pub data: Bytes,

    /// Duration covered by this sample.
    pub duration: Duration,

    /// Presentation timestamp relative to pipeline start.
    pub timestamp: Duration,
}

impl Sample {
    /// Create a new sample.
    pub fn new(data: Bytes, duration: Duration, timestamp: Duration) -> Self {
        Self {
            data,
            duration,
            timestamp,
        }
    }
}

/// Identifier of a viewer session subscribed to a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time statistics of one stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetrics {
    /// Stream identifier (`hd`, `audio`, `broadcast`, ...).
    pub stream: String,

    /// Whether the native pipeline is currently live.
    pub started: bool,

    /// Number of registered subscribers.
    pub subscribers: usize,

    /// Samples emitted by the pipeline.
    pub samples_produced: u64,

    /// Bytes emitted by the pipeline.
    pub bytes_produced: u64,

    /// Sample copies handed to subscribers.
    pub samples_delivered: u64,

    /// Sample copies dropped because a subscriber queue was full.
    pub samples_dropped: u64,

    /// Successful pipeline constructions.
    pub pipeline_starts: u64,

    /// Failed pipeline constructions.
    pub pipeline_failures: u64,
}
