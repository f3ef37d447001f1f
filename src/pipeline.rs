//! The tick loop.
//!
//! Each tick captures a frame, resolves the region against it, applies one
//! operator event, runs inference through the scheduler, stores the occupancy
//! decision and renders the overlay. The loop owns every collaborator and
//! releases them in a fixed order when it stops, whatever the reason:
//! publisher, inference, capture, display, transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{NotifierError, Result};
use crate::frame::{prepare_input, Frame, PreprocessOptions};
use crate::ingest::FrameSource;
use crate::interaction::InteractionController;
use crate::occupancy::{classify, decide, OccupancyCell};
use crate::publisher::{PublisherConfig, PublisherHandle};
use crate::region::Region;
use crate::render::{render_overlay, FrameDisplay, OverlayStatus};
use crate::scheduler::{InferenceScheduler, SchedulingMode};
use crate::transport::MessageBus;

/// State owned by the tick loop.
///
/// Only `occupancy` is shared with another thread.
#[derive(Debug)]
pub struct PipelineContext {
    pub region: Region,
    pub mode: SchedulingMode,
    /// Mode requested by the operator, applied at the next tick boundary.
    pub pending_mode: Option<SchedulingMode>,
    pub threshold: f32,
    pub occupancy: OccupancyCell,
    pub quit_requested: bool,
}

impl PipelineContext {
    pub fn new(
        region: Region,
        mode: SchedulingMode,
        threshold: f32,
        occupancy: OccupancyCell,
    ) -> Self {
        Self {
            region,
            mode,
            pending_mode: None,
            threshold,
            occupancy,
            quit_requested: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Quit,
    /// External shutdown request (Ctrl-C).
    Signal,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::EndOfStream => "end of stream",
            Self::Quit => "operator quit",
            Self::Signal => "shutdown signal",
        };
        f.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub stop_reason: StopReason,
    /// Messages sent by the publisher during the run.
    pub published: u64,
}

pub struct FramePipeline {
    source: Box<dyn FrameSource>,
    scheduler: InferenceScheduler,
    display: Box<dyn FrameDisplay>,
    controller: InteractionController,
    bus: Arc<dyn MessageBus>,
    publisher_config: PublisherConfig,
    preprocess: PreprocessOptions,
    stop: Arc<AtomicBool>,
}

impl FramePipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        scheduler: InferenceScheduler,
        display: Box<dyn FrameDisplay>,
        bus: Arc<dyn MessageBus>,
        publisher_config: PublisherConfig,
    ) -> Self {
        Self {
            source,
            scheduler,
            display,
            controller: InteractionController::disabled(),
            bus,
            publisher_config,
            preprocess: PreprocessOptions::default(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_controller(mut self, controller: InteractionController) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_preprocess(mut self, preprocess: PreprocessOptions) -> Self {
        self.preprocess = preprocess;
        self
    }

    /// Use an externally owned stop flag (set from a signal handler).
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run until end of stream, quit or a stop signal, then tear down.
    pub fn run(mut self, ctx: &mut PipelineContext) -> Result<RunSummary> {
        let publisher = match PublisherHandle::spawn(
            ctx.occupancy.clone(),
            self.bus.clone(),
            self.publisher_config.clone(),
        ) {
            Ok(handle) => handle,
            Err(err) => {
                log::error!("{}", err);
                if let (_, Err(teardown_err)) = self.teardown(None) {
                    log::warn!("teardown after publisher failure: {}", teardown_err);
                }
                return Err(err);
            }
        };
        log::info!(
            "publishing occupancy to '{}' every {:?}",
            self.publisher_config.topic,
            self.publisher_config.interval
        );

        let outcome = self.run_loop(ctx);
        if let Err(err) = &outcome {
            log::error!("pipeline stopped: {}", err);
        }
        let (published, teardown) = self.teardown(Some(publisher));

        let (ticks, stop_reason) = outcome?;
        teardown?;
        log::info!("pipeline finished after {} ticks ({})", ticks, stop_reason);
        Ok(RunSummary {
            ticks,
            stop_reason,
            published,
        })
    }

    fn run_loop(&mut self, ctx: &mut PipelineContext) -> Result<(u64, StopReason)> {
        self.scheduler.set_mode(ctx.mode)?;
        let mut retained: Option<Frame> = None;
        let mut ticks = 0u64;
        let mut render_time = Duration::ZERO;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok((ticks, StopReason::Signal));
            }
            if ctx.quit_requested {
                return Ok((ticks, StopReason::Quit));
            }
            if let Some(mode) = ctx.pending_mode.take() {
                self.scheduler.set_mode(mode)?;
                ctx.mode = mode;
            }

            let frame = match self.source.next_frame()? {
                Some(frame) => frame,
                None if retained.is_none() => {
                    return Err(NotifierError::Source(
                        "input produced no frames".to_string(),
                    ))
                }
                None => return Ok((ticks, StopReason::EndOfStream)),
            };
            ctx.region.apply_defaults(frame.size());
            self.controller
                .poll(ctx, retained.as_ref().unwrap_or(&frame))?;

            let input = prepare_input(&frame, self.scheduler.input_shape(), self.preprocess)?;
            let output = self.scheduler.run_tick(input)?;

            // Async results belong to the frame captured on the previous tick.
            let shown = match (&retained, self.scheduler.mode()) {
                (Some(previous), SchedulingMode::Async) => previous,
                _ => &frame,
            };
            let boxes = classify(&output.detections, ctx.threshold, &ctx.region, shown.size());
            let occupied = decide(&boxes);
            ctx.occupancy.store(occupied);
            for classified in &boxes {
                log::trace!(
                    "frame {}: box {:?} conf {:.2} {:?}",
                    shown.index,
                    classified.bbox,
                    classified.confidence,
                    classified.overlap
                );
            }

            let render_started = Instant::now();
            let status = OverlayStatus {
                mode: self.scheduler.mode(),
                inference_time: output.inference_time,
                render_time,
                occupied,
            };
            let overlay = render_overlay(shown, &ctx.region, &status);
            self.display.show(&overlay)?;
            render_time = render_started.elapsed();

            log::debug!(
                "tick {}: frame {} slot {} detections {} occupied {} inference {:?}",
                ticks + 1,
                frame.index,
                output.slot,
                output.detections.len(),
                occupied,
                output.inference_time
            );
            retained = Some(frame);
            ticks += 1;
        }
    }

    /// Release everything in order. Every step runs; the first error wins.
    fn teardown(&mut self, publisher: Option<PublisherHandle>) -> (u64, Result<()>) {
        let mut first_error: Option<NotifierError> = None;
        let mut note = |step: &str, result: Result<()>| match result {
            Ok(()) => log::info!("teardown: {} done", step),
            Err(err) => {
                log::warn!("teardown: {} failed: {}", step, err);
                first_error.get_or_insert(err);
            }
        };

        let mut published = 0;
        if let Some(publisher) = publisher {
            let stopped = publisher.stop().map(|count| published = count);
            note("publisher", stopped);
        }
        note("inference", self.scheduler.shutdown());
        note("capture", self.source.close());
        note("display", self.display.close());
        note("transport", self.bus.disconnect());

        (published, first_error.map_or(Ok(()), Err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Device, InputShape, RawDetection, ScriptedBackend, ScriptedCall};
    use crate::ingest::SyntheticSource;
    use crate::interaction::{InputEvent, ScriptedInput, ScriptedSelector};
    use crate::render::RecordingDisplay;
    use crate::transport::RecordingBus;
    use std::path::Path;

    const SHAPE: InputShape = InputShape {
        batch: 1,
        channels: 3,
        height: 8,
        width: 8,
    };

    fn inside() -> RawDetection {
        RawDetection::new(0.9, 0.05, 0.05, 0.25, 0.25)
    }

    fn outside() -> RawDetection {
        RawDetection::new(0.9, 0.75, 0.75, 0.95, 0.95)
    }

    struct Harness {
        pipeline: FramePipeline,
        calls: Arc<std::sync::Mutex<Vec<ScriptedCall>>>,
        bus: Arc<RecordingBus>,
        display: RecordingDisplay,
    }

    fn harness(frames: u64, mode: SchedulingMode, script: Vec<Vec<RawDetection>>) -> Harness {
        let backend = ScriptedBackend::new(SHAPE).with_script(script);
        let calls = backend.calls();
        let scheduler = InferenceScheduler::start(
            Box::new(backend),
            Path::new("stub://model"),
            &Device::Single("CPU".to_string()),
            mode,
        )
        .unwrap();
        let bus = Arc::new(RecordingBus::new());
        let display = RecordingDisplay::new();
        let pipeline = FramePipeline::new(
            Box::new(SyntheticSource::new(200, 200, Some(frames))),
            scheduler,
            Box::new(display.clone()),
            bus.clone(),
            PublisherConfig {
                topic: "zone".to_string(),
                interval: Duration::from_millis(10),
            },
        );
        Harness {
            pipeline,
            calls,
            bus,
            display,
        }
    }

    fn context(mode: SchedulingMode) -> PipelineContext {
        PipelineContext::new(Region::new(0, 0, 100, 100), mode, 0.5, OccupancyCell::default())
    }

    #[test]
    fn sync_run_reaches_end_of_stream_and_tears_down() {
        let h = harness(3, SchedulingMode::Sync, vec![vec![inside()], vec![outside()]]);
        let mut ctx = context(SchedulingMode::Sync);
        let summary = h.pipeline.run(&mut ctx).unwrap();

        assert_eq!(summary.ticks, 3);
        assert_eq!(summary.stop_reason, StopReason::EndOfStream);
        assert_eq!(h.display.shown(), vec![(1, true), (2, false), (3, true)]);
        assert!(ctx.occupancy.load());
        assert!(h.display.is_closed());
        assert!(h.bus.is_disconnected());
        assert_eq!(h.calls.lock().unwrap().last(), Some(&ScriptedCall::Shutdown));
    }

    #[test]
    fn async_results_lag_one_frame() {
        let h = harness(3, SchedulingMode::Async, vec![vec![outside()], vec![inside()]]);
        let mut ctx = context(SchedulingMode::Async);
        h.pipeline.run(&mut ctx).unwrap();

        // Tick 1 has nothing to collect; tick 2 shows frame 1's detections.
        assert_eq!(h.display.shown(), vec![(1, true), (1, false), (2, true)]);
    }

    #[test]
    fn empty_input_is_a_source_error() {
        let h = harness(0, SchedulingMode::Sync, vec![]);
        let err = h.pipeline.run(&mut context(SchedulingMode::Sync)).unwrap_err();
        assert!(matches!(err, NotifierError::Source(_)));
        assert!(h.display.is_closed());
        assert!(h.bus.is_disconnected());
    }

    #[test]
    fn inference_fault_tears_down() {
        let backend = ScriptedBackend::new(SHAPE).failing_await(1);
        let calls = backend.calls();
        let scheduler = InferenceScheduler::start(
            Box::new(backend),
            Path::new("stub://model"),
            &Device::Single("CPU".to_string()),
            SchedulingMode::Sync,
        )
        .unwrap();
        let bus = Arc::new(RecordingBus::new());
        let pipeline = FramePipeline::new(
            Box::new(SyntheticSource::new(16, 16, None)),
            scheduler,
            Box::new(RecordingDisplay::new()),
            bus.clone(),
            PublisherConfig::default(),
        );
        let err = pipeline.run(&mut context(SchedulingMode::Sync)).unwrap_err();
        assert!(matches!(err, NotifierError::Inference(_)));
        assert!(calls.lock().unwrap().contains(&ScriptedCall::Shutdown));
        assert!(bus.is_disconnected());
    }

    #[test]
    fn quit_and_toggle_from_operator() {
        let h = harness(10, SchedulingMode::Async, vec![]);
        let controller = InteractionController::new(
            Box::new(ScriptedInput::new([
                None,
                Some(InputEvent::ToggleMode),
                None,
                Some(InputEvent::Quit),
            ])),
            Box::new(ScriptedSelector::default()),
        );
        let mut ctx = context(SchedulingMode::Async);
        let summary = h.pipeline.with_controller(controller).run(&mut ctx).unwrap();

        assert_eq!(summary.stop_reason, StopReason::Quit);
        assert_eq!(summary.ticks, 4);
        assert_eq!(ctx.mode, SchedulingMode::Sync);
        let calls = h.calls.lock().unwrap();
        // Tick 3 runs in sync mode on slot 0 only.
        let tail: Vec<_> = calls.iter().rev().take(5).cloned().collect();
        assert_eq!(
            tail,
            vec![
                ScriptedCall::Shutdown,
                ScriptedCall::Await(0),
                ScriptedCall::Dispatch(0),
                ScriptedCall::Await(0),
                ScriptedCall::Dispatch(0),
            ]
        );
    }

    #[test]
    fn stop_flag_ends_the_loop() {
        let h = harness(1_000, SchedulingMode::Async, vec![]);
        let stop = Arc::new(AtomicBool::new(true));
        let summary = h
            .pipeline
            .with_stop_flag(stop)
            .run(&mut context(SchedulingMode::Async))
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::Signal);
        assert_eq!(summary.ticks, 0);
        assert!(h.bus.is_disconnected());
    }

    #[test]
    fn publisher_spawn_failure_still_tears_down() {
        let backend = ScriptedBackend::new(SHAPE);
        let calls = backend.calls();
        let scheduler = InferenceScheduler::start(
            Box::new(backend),
            Path::new("stub://model"),
            &Device::Single("CPU".to_string()),
            SchedulingMode::Sync,
        )
        .unwrap();
        let bus = Arc::new(RecordingBus::new());
        let display = RecordingDisplay::new();
        let pipeline = FramePipeline::new(
            Box::new(SyntheticSource::new(16, 16, Some(3))),
            scheduler,
            Box::new(display.clone()),
            bus.clone(),
            PublisherConfig {
                topic: "zone".to_string(),
                interval: Duration::ZERO,
            },
        );
        let err = pipeline.run(&mut context(SchedulingMode::Sync)).unwrap_err();
        assert!(matches!(err, NotifierError::Configuration(_)));
        assert_eq!(calls.lock().unwrap().last(), Some(&ScriptedCall::Shutdown));
        assert!(display.is_closed());
        assert!(bus.is_disconnected());
    }

    #[test]
    fn region_defaults_resolve_against_first_frame() {
        let h = harness(1, SchedulingMode::Sync, vec![]);
        let mut ctx = PipelineContext::new(
            Region::new(0, 10, 0, 0),
            SchedulingMode::Sync,
            0.5,
            OccupancyCell::default(),
        );
        h.pipeline.run(&mut ctx).unwrap();
        assert_eq!(ctx.region, Region::new(0, 0, 200, 200));
    }
}
