//! Ownership of a single native pipeline.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::{NativePipeline, PipelineDescriptor, PipelineEngine, PipelineResult, SampleSink};

/// Owns at most one running native graph.
///
/// The native graph is present if and only if the handle is started.
pub struct PipelineHandle {
    engine: Arc<dyn PipelineEngine>,
    native: Option<Box<dyn NativePipeline>>,
    descriptor: Option<PipelineDescriptor>,
}

impl PipelineHandle {
    /// Create a stopped handle bound to an engine.
    pub fn new(engine: Arc<dyn PipelineEngine>) -> Self {
        Self {
            engine,
            native: None,
            descriptor: None,
        }
    }

    /// Build and start the graph described by `descriptor`.
    ///
    /// Rejected with [`PipelineError::AlreadyRunning`] while started.
    pub fn create(
        &mut self,
        descriptor: PipelineDescriptor,
        sink: SampleSink,
    ) -> PipelineResult<()> {
        if self.native.is_some() {
            return Err(PipelineError::AlreadyRunning);
        }

        debug!(engine = self.engine.name(), %descriptor, "Creating pipeline");
        let native = self.engine.launch(&descriptor, sink)?;

        self.native = Some(native);
        self.descriptor = Some(descriptor);
        Ok(())
    }

    /// Stop and release the graph. No-op when already stopped.
    pub fn destroy(&mut self) -> PipelineResult<()> {
        let Some(mut native) = self.native.take() else {
            return Ok(());
        };

        debug!("Destroying pipeline");
        let result = native.stop();
        drop(native);

        if let Err(ref e) = result {
            warn!("Pipeline stopped with error: {}", e);
        }
        result
    }

    /// Check if the graph is running.
    pub fn started(&self) -> bool {
        self.native.is_some()
    }

    /// Descriptor of the most recently created graph.
    pub fn descriptor(&self) -> Option<&PipelineDescriptor> {
        self.descriptor.as_ref()
    }
}

impl fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("engine", &self.engine.name())
            .field("started", &self.started())
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        let _ = self.destroy();
    }
}
