//! In-memory pipeline engine for tests.
//!
//! `FakeEngine` records every launched descriptor, tracks which graphs are
//! live, can be told to fail construction or stopping for descriptors that
//! contain a given pattern, and can push samples into live graphs.

use std::collections::BTreeMap;
use std::sync::Arc;

use deskcast_types::Sample;
use parking_lot::Mutex;

use crate::error::PipelineError;
use crate::{NativePipeline, PipelineDescriptor, PipelineEngine, PipelineResult, SampleSink};

#[derive(Default)]
struct FakeState {
    next_id: u64,
    launched: Vec<PipelineDescriptor>,
    live: BTreeMap<u64, (PipelineDescriptor, SampleSink)>,
    stops: usize,
    fail_launch: Vec<String>,
    fail_stop: Vec<String>,
}

/// Scriptable engine that never touches native resources.
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    /// Create an engine with no failures configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// The same engine as a trait object.
    pub fn shared(&self) -> Arc<dyn PipelineEngine> {
        Arc::new(self.clone())
    }

    /// Fail construction of descriptors containing `pattern`.
    pub fn fail_launch_when_contains(&self, pattern: &str) {
        self.state.lock().fail_launch.push(pattern.to_string());
    }

    /// Report an error when stopping graphs whose descriptor contains `pattern`.
    pub fn fail_stop_when_contains(&self, pattern: &str) {
        self.state.lock().fail_stop.push(pattern.to_string());
    }

    /// Remove every configured failure.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_launch.clear();
        state.fail_stop.clear();
    }

    /// Every descriptor passed to a successful launch, in order.
    pub fn launched(&self) -> Vec<PipelineDescriptor> {
        self.state.lock().launched.clone()
    }

    /// Most recent successful launch whose descriptor contains `pattern`.
    pub fn last_launched_containing(&self, pattern: &str) -> Option<PipelineDescriptor> {
        self.state
            .lock()
            .launched
            .iter()
            .rev()
            .find(|d| d.as_str().contains(pattern))
            .cloned()
    }

    /// Descriptors of the graphs currently live.
    pub fn live(&self) -> Vec<PipelineDescriptor> {
        self.state
            .lock()
            .live
            .values()
            .map(|(descriptor, _)| descriptor.clone())
            .collect()
    }

    /// Number of graphs currently live.
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Number of graphs stopped through [`NativePipeline::stop`].
    pub fn stop_count(&self) -> usize {
        self.state.lock().stops
    }

    /// Push `sample` into every live graph whose descriptor contains
    /// `pattern`. Returns the number of graphs that received it.
    pub fn emit(&self, pattern: &str, sample: Sample) -> usize {
        let sinks: Vec<SampleSink> = self
            .state
            .lock()
            .live
            .values()
            .filter(|(descriptor, _)| descriptor.as_str().contains(pattern))
            .map(|(_, sink)| Arc::clone(sink))
            .collect();

        for sink in &sinks {
            sink(sample.clone());
        }
        sinks.len()
    }
}

impl PipelineEngine for FakeEngine {
    fn launch(
        &self,
        descriptor: &PipelineDescriptor,
        sink: SampleSink,
    ) -> PipelineResult<Box<dyn NativePipeline>> {
        let mut state = self.state.lock();

        if let Some(pattern) = state
            .fail_launch
            .iter()
            .find(|p| descriptor.as_str().contains(p.as_str()))
        {
            return Err(PipelineError::Construction(format!(
                "fake engine refused descriptor matching {pattern:?}"
            )));
        }

        let id = state.next_id;
        state.next_id += 1;
        state.launched.push(descriptor.clone());
        state.live.insert(id, (descriptor.clone(), sink));

        Ok(Box::new(FakePipeline {
            id,
            descriptor: descriptor.clone(),
            state: Arc::clone(&self.state),
            released: false,
        }))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

struct FakePipeline {
    id: u64,
    descriptor: PipelineDescriptor,
    state: Arc<Mutex<FakeState>>,
    released: bool,
}

impl NativePipeline for FakePipeline {
    fn stop(&mut self) -> PipelineResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut state = self.state.lock();
        state.live.remove(&self.id);
        state.stops += 1;

        if state
            .fail_stop
            .iter()
            .any(|p| self.descriptor.as_str().contains(p.as_str()))
        {
            return Err(PipelineError::Stop(format!(
                "fake engine failed to stop {}",
                self.descriptor
            )));
        }
        Ok(())
    }
}

impl Drop for FakePipeline {
    fn drop(&mut self) {
        if !self.released {
            self.state.lock().live.remove(&self.id);
        }
    }
}
