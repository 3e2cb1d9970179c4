//! Capture and streaming core.
//!
//! A [`CaptureManager`] owns one audio feed, one broadcast push feed, one
//! screencast feed and the `hd`, `hq`, `mq`, `lq` video tiers. Each feed is
//! a [`StreamManager`] whose native pipeline runs while it is wanted, and
//! is torn down and rebuilt with fresh encoder parameters whenever the
//! desktop changes its screen size.

mod broadcast;
mod config;
mod descriptor;
mod error;
mod manager;
mod metrics;
mod screencast;
mod stream;
mod subscribers;

pub use broadcast::{validate_destination, BroadcastManager, BROADCAST_ID};
pub use config::CaptureConfig;
pub use descriptor::{
    audio_builder, base_bitrate, broadcast_builder, render, screencast_builder, video_builder,
    DescriptorBuilder, DescriptorParams, VideoTier, KEYFRAME_INTERVAL, VIDEO_TIERS,
};
pub use error::CaptureError;
pub use manager::{CaptureManager, AUDIO_ID};
pub use metrics::StreamStats;
pub use screencast::{ScreencastManager, IDLE_TIMEOUT, IMAGE_TIMEOUT, SCREENCAST_ID};
pub use stream::StreamManager;
pub use subscribers::SubscriberTable;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
