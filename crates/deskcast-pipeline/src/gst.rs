//! GStreamer pipeline engine.

use std::time::Duration;

use bytes::Bytes;
use deskcast_types::Sample;
use gstreamer::prelude::*;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::{
    NativePipeline, PipelineDescriptor, PipelineEngine, PipelineResult, SampleSink, APPSINK_NAME,
};

/// Engine that builds graphs with `gst_parse_launch`.
#[derive(Debug)]
pub struct GstEngine;

impl GstEngine {
    /// Initialize GStreamer (safe to call multiple times).
    pub fn new() -> PipelineResult<Self> {
        gstreamer::init().map_err(|e| {
            PipelineError::NotSupported(format!("Failed to initialize GStreamer: {}", e))
        })?;
        Ok(Self)
    }
}

impl PipelineEngine for GstEngine {
    fn launch(
        &self,
        descriptor: &PipelineDescriptor,
        sink: SampleSink,
    ) -> PipelineResult<Box<dyn NativePipeline>> {
        let pipeline = gstreamer::parse::launch(descriptor.as_str()).map_err(|e| {
            PipelineError::Construction(format!("Failed to create pipeline: {}", e))
        })?;

        let pipeline = pipeline.downcast::<gstreamer::Pipeline>().map_err(|_| {
            PipelineError::Construction("Failed to downcast to Pipeline".to_string())
        })?;

        if let Some(element) = pipeline.by_name(APPSINK_NAME) {
            let appsink = element
                .downcast::<gstreamer_app::AppSink>()
                .map_err(|_| {
                    PipelineError::Construction(format!(
                        "Element {APPSINK_NAME:?} is not an appsink"
                    ))
                })?;

            appsink.set_callbacks(
                gstreamer_app::AppSinkCallbacks::builder()
                    .new_sample(move |appsink| {
                        let sample = appsink
                            .pull_sample()
                            .map_err(|_| gstreamer::FlowError::Eos)?;
                        let buffer = sample.buffer().ok_or(gstreamer::FlowError::Error)?;
                        let map = buffer
                            .map_readable()
                            .map_err(|_| gstreamer::FlowError::Error)?;

                        let duration = buffer
                            .duration()
                            .map(|d| Duration::from_nanos(d.nseconds()))
                            .unwrap_or_default();
                        let timestamp = buffer
                            .pts()
                            .map(|t| Duration::from_nanos(t.nseconds()))
                            .unwrap_or_default();

                        sink(Sample::new(
                            Bytes::copy_from_slice(map.as_slice()),
                            duration,
                            timestamp,
                        ));
                        Ok(gstreamer::FlowSuccess::Ok)
                    })
                    .build(),
            );
        } else {
            debug!("Pipeline has no appsink, samples are not delivered");
        }

        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            log_bus_errors(&pipeline);
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(PipelineError::Construction(format!(
                "Failed to start pipeline: {}",
                e
            )));
        }

        info!("GStreamer pipeline playing");
        Ok(Box::new(GstPipeline {
            pipeline,
            stopped: false,
        }))
    }

    fn name(&self) -> &'static str {
        "gstreamer"
    }
}

/// A playing GStreamer pipeline.
struct GstPipeline {
    pipeline: gstreamer::Pipeline,
    stopped: bool,
}

impl NativePipeline for GstPipeline {
    fn stop(&mut self) -> PipelineResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        // Errors posted asynchronously while playing are only reported here.
        log_bus_errors(&self.pipeline);

        self.pipeline
            .set_state(gstreamer::State::Null)
            .map(|_| ())
            .map_err(|e| PipelineError::Stop(format!("Failed to set pipeline to NULL: {}", e)))
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        if !self.stopped {
            warn!("GStreamer pipeline dropped while playing, forcing NULL state");
            let _ = self.pipeline.set_state(gstreamer::State::Null);
        }
    }
}

fn log_bus_errors(pipeline: &gstreamer::Pipeline) {
    let Some(bus) = pipeline.bus() else {
        return;
    };

    while let Some(msg) = bus.pop() {
        if let gstreamer::MessageView::Error(err) = msg.view() {
            let debug_info = err
                .debug()
                .map(|d| format!(" ({:?})", d))
                .unwrap_or_default();
            error!("GStreamer error: {}{}", err.error(), debug_info);
        }
    }
}
