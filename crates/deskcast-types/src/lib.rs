//! Shared value types for the deskcast capture core.
//!
//! This crate defines the types exchanged between the pipeline engine,
//! the capture orchestrator, the desktop and the session layer.

mod codec;
mod events;
mod state;
mod types;

pub use codec::{Codec, CodecKind};
pub use events::CaptureEvent;
pub use state::StreamState;
pub use types::{ParseScreenSizeError, PeerId, Sample, ScreenSize, StreamMetrics};

use crossbeam_channel::{Receiver, Sender};

/// Queue depth of a single subscriber (pipeline → peer).
pub const SAMPLE_CHANNEL_CAPACITY: usize = 32;

/// Channel capacity for capture events (capture → observer).
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Creates a bounded per-subscriber sample channel.
pub fn sample_channel() -> (Sender<Sample>, Receiver<Sample>) {
    crossbeam_channel::bounded(SAMPLE_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<CaptureEvent>, Receiver<CaptureEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
