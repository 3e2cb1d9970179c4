//! Read-mostly subscriber table used for sample fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use deskcast_pipeline::SampleSink;
use deskcast_types::{PeerId, Sample};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::metrics::StreamStats;

/// Delivery side of a stream: subscriber queues plus counters.
///
/// Pipeline threads only take the read lock. A full queue drops the newest
/// sample for that subscriber; a disconnected one is detached.
#[derive(Default)]
pub struct SubscriberTable {
    sinks: RwLock<HashMap<PeerId, Sender<Sample>>>,
    observer: RwLock<Option<SampleSink>>,
    stats: StreamStats,
}

impl SubscriberTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the sink of a peer.
    pub fn insert(&self, peer: PeerId, sink: Sender<Sample>) {
        self.sinks.write().insert(peer, sink);
    }

    /// Detach a peer. Returns true if it was attached.
    pub fn remove(&self, peer: &PeerId) -> bool {
        self.sinks.write().remove(peer).is_some()
    }

    /// Detach every peer.
    pub fn clear(&self) {
        self.sinks.write().clear();
        *self.observer.write() = None;
    }

    /// Check if no sink is attached.
    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }

    /// Check if a peer's sink is attached.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.sinks.read().contains_key(peer)
    }

    /// Set the internal observer, which sees every sample but is not
    /// counted as a subscriber. It must not block.
    pub fn set_observer(&self, sink: SampleSink) {
        *self.observer.write() = Some(sink);
    }

    /// Get the counters.
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Fan a sample out to every attached sink without blocking.
    pub fn deliver(&self, sample: Sample) {
        self.stats.record_sample(sample.data.len());

        let mut disconnected = Vec::new();
        {
            let sinks = self.sinks.read();
            for (peer, sink) in sinks.iter() {
                match sink.try_send(sample.clone()) {
                    Ok(()) => self.stats.record_delivered(),
                    Err(TrySendError::Full(_)) => {
                        trace!(peer = %peer, "Subscriber queue full, dropping sample");
                        self.stats.record_dropped();
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        disconnected.push((peer.clone(), sink.clone()));
                    }
                }
            }
        }

        if let Some(observer) = self.observer.read().as_ref() {
            observer(sample);
        }

        if !disconnected.is_empty() {
            let mut sinks = self.sinks.write();
            for (peer, dead) in disconnected {
                // The peer may have re-subscribed with a fresh sink meanwhile.
                if sinks.get(&peer).is_some_and(|current| current.same_channel(&dead)) {
                    debug!(peer = %peer, "Subscriber disconnected, detaching");
                    sinks.remove(&peer);
                }
            }
        }
    }

    /// Build the pipeline callback feeding this table.
    pub fn sink(self: &Arc<Self>) -> SampleSink {
        let table = Arc::clone(self);
        Arc::new(move |sample| table.deliver(sample))
    }
}
