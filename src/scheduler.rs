//! Double-buffered inference scheduling.
//!
//! The scheduler owns the backend and a pair of logical request slots.
//!
//! - Async: each tick dispatches the new frame into `next`, collects the
//!   result of `current` (dispatched on the previous tick), then swaps the
//!   labels. Submission of frame N overlaps the computation of frame N-1, so
//!   detections lag the captured frame by one tick.
//! - Sync: dispatch and collect the same slot inside one tick.
//!
//! Mode changes are applied between ticks. Pending slots are drained and the
//! rotation restarts from its initial layout.

use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::detect::{Device, InferenceBackend, InputShape, InputTensor, RawDetection, SlotId};
use crate::error::{NotifierError, Result};

/// Request slots allocated on the backend.
pub const NUM_REQUESTS: usize = 2;

/// Default upper bound on a single await.
pub const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchedulingMode {
    Sync,
    #[default]
    Async,
}

impl SchedulingMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Sync => Self::Async,
            Self::Async => Self::Sync,
        }
    }

    pub fn is_async(self) -> bool {
        matches!(self, Self::Async)
    }
}

impl FromStr for SchedulingMode {
    type Err = NotifierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            other => Err(NotifierError::Configuration(format!(
                "unknown scheduling mode '{}': expected 'sync' or 'async'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for SchedulingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
        }
    }
}

/// Labels of the two logical slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotPair {
    pub current: SlotId,
    pub next: SlotId,
}

impl SlotPair {
    /// Initial layout for a mode.
    pub fn initial(mode: SchedulingMode) -> Self {
        match mode {
            SchedulingMode::Async => Self {
                current: 0,
                next: 1,
            },
            SchedulingMode::Sync => Self {
                current: 0,
                next: 0,
            },
        }
    }

    /// Slot the new frame is dispatched into.
    pub fn dispatch_slot(&self) -> SlotId {
        self.next
    }

    /// Slot whose result is collected this tick.
    pub fn await_slot(&self) -> SlotId {
        self.current
    }

    fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.next);
    }
}

/// Result of one scheduled tick.
#[derive(Clone, Debug)]
pub struct TickOutput {
    pub detections: Vec<RawDetection>,
    /// Slot the result was collected from.
    pub slot: SlotId,
    /// Dispatch-to-result time.
    pub inference_time: Duration,
}

pub struct InferenceScheduler {
    backend: Box<dyn InferenceBackend>,
    mode: SchedulingMode,
    slots: SlotPair,
    in_flight: [bool; NUM_REQUESTS],
    input_shape: InputShape,
    await_timeout: Duration,
    shut_down: bool,
}

impl InferenceScheduler {
    /// Load the model and build a scheduler. Failure here is fatal setup error.
    pub fn start(
        mut backend: Box<dyn InferenceBackend>,
        model: &Path,
        device: &Device,
        mode: SchedulingMode,
    ) -> Result<Self> {
        if !backend.supports(device) {
            return Err(NotifierError::Inference(format!(
                "backend {} does not support device {}",
                backend.name(),
                device
            )));
        }
        let input_shape = backend.load_model(model, device, NUM_REQUESTS)?;
        log::info!(
            "model {} loaded on {} via {} (input {}x{}x{}x{})",
            model.display(),
            device,
            backend.name(),
            input_shape.batch,
            input_shape.channels,
            input_shape.height,
            input_shape.width
        );
        Ok(Self {
            backend,
            mode,
            slots: SlotPair::initial(mode),
            in_flight: [false; NUM_REQUESTS],
            input_shape,
            await_timeout: DEFAULT_AWAIT_TIMEOUT,
            shut_down: false,
        })
    }

    pub fn with_await_timeout(mut self, timeout: Duration) -> Self {
        self.await_timeout = timeout;
        self
    }

    pub fn input_shape(&self) -> InputShape {
        self.input_shape
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    pub fn slots(&self) -> SlotPair {
        self.slots
    }

    /// Run one tick: dispatch `input` and collect the result due this tick.
    pub fn run_tick(&mut self, input: InputTensor) -> Result<TickOutput> {
        if self.shut_down {
            return Err(NotifierError::Inference("scheduler already shut down".into()));
        }
        let started = Instant::now();

        let dispatch_slot = self.slots.dispatch_slot();
        self.backend.dispatch(dispatch_slot, input)?;
        self.in_flight[dispatch_slot] = true;

        let await_slot = self.slots.await_slot();
        let detections = self.backend.await_result(await_slot, self.await_timeout)?;
        self.in_flight[await_slot] = false;
        let inference_time = started.elapsed();

        if self.mode.is_async() {
            self.slots.swap();
        }

        Ok(TickOutput {
            detections,
            slot: await_slot,
            inference_time,
        })
    }

    /// Switch mode at a tick boundary.
    ///
    /// Results still in flight are collected and discarded before the slot
    /// rotation restarts.
    pub fn set_mode(&mut self, mode: SchedulingMode) -> Result<()> {
        if mode == self.mode {
            return Ok(());
        }
        self.drain()?;
        self.mode = mode;
        self.slots = SlotPair::initial(mode);
        log::info!("Switched to {} mode", mode);
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        for slot in 0..NUM_REQUESTS {
            if self.in_flight[slot] {
                let discarded = self.backend.await_result(slot, self.await_timeout)?;
                self.in_flight[slot] = false;
                log::debug!(
                    "discarded {} detections from slot {} on mode switch",
                    discarded.len(),
                    slot
                );
            }
        }
        Ok(())
    }

    /// Release inference resources. Idempotent.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.in_flight = [false; NUM_REQUESTS];
        self.backend.shutdown()
    }
}

impl Drop for InferenceScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("inference shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ScriptedBackend, ScriptedCall};

    const SHAPE: InputShape = InputShape {
        batch: 1,
        channels: 3,
        height: 2,
        width: 2,
    };

    fn tensor() -> InputTensor {
        InputTensor {
            shape: SHAPE,
            data: vec![0.0; SHAPE.element_count()],
        }
    }

    fn det(confidence: f32) -> RawDetection {
        RawDetection::new(confidence, 0.1, 0.1, 0.2, 0.2)
    }

    fn start(backend: ScriptedBackend, mode: SchedulingMode) -> InferenceScheduler {
        let device: Device = "CPU".parse().unwrap();
        InferenceScheduler::start(Box::new(backend), Path::new("stub://"), &device, mode)
            .expect("scheduler")
    }

    #[test]
    fn async_slots_alternate_every_tick() {
        let mut sched = start(ScriptedBackend::new(SHAPE), SchedulingMode::Async);
        let mut previous = sched.slots();
        for _ in 0..6 {
            sched.run_tick(tensor()).unwrap();
            let now = sched.slots();
            assert_eq!(now.current, previous.next);
            assert_eq!(now.next, previous.current);
            assert_ne!(now.current, now.next);
            previous = now;
        }
    }

    #[test]
    fn sync_uses_one_slot() {
        let mut sched = start(ScriptedBackend::new(SHAPE), SchedulingMode::Sync);
        for _ in 0..4 {
            let out = sched.run_tick(tensor()).unwrap();
            assert_eq!(out.slot, 0);
            assert_eq!(sched.slots().current, sched.slots().next);
        }
    }

    #[test]
    fn async_results_lag_one_tick() {
        let backend = ScriptedBackend::new(SHAPE).with_script(vec![
            vec![det(0.1)],
            vec![det(0.2)],
            vec![det(0.3)],
        ]);
        let mut sched = start(backend, SchedulingMode::Async);

        assert!(sched.run_tick(tensor()).unwrap().detections.is_empty());
        assert_eq!(sched.run_tick(tensor()).unwrap().detections, vec![det(0.1)]);
        assert_eq!(sched.run_tick(tensor()).unwrap().detections, vec![det(0.2)]);
    }

    #[test]
    fn sync_results_are_immediate() {
        let backend = ScriptedBackend::new(SHAPE).with_script(vec![vec![det(0.7)], vec![]]);
        let mut sched = start(backend, SchedulingMode::Sync);
        assert_eq!(sched.run_tick(tensor()).unwrap().detections, vec![det(0.7)]);
        assert!(sched.run_tick(tensor()).unwrap().detections.is_empty());
    }

    #[test]
    fn mode_switch_drains_and_restarts_rotation() {
        let backend = ScriptedBackend::new(SHAPE).with_script(vec![
            vec![det(0.1)],
            vec![det(0.2)],
            vec![det(0.3)],
        ]);
        let calls = backend.calls();
        let mut sched = start(backend, SchedulingMode::Async);

        // dispatches 0.1 into slot 1, leaves it in flight
        sched.run_tick(tensor()).unwrap();
        sched.set_mode(SchedulingMode::Sync).unwrap();
        assert_eq!(sched.slots(), SlotPair::initial(SchedulingMode::Sync));

        // the drained result never resurfaces
        assert_eq!(sched.run_tick(tensor()).unwrap().detections, vec![det(0.2)]);

        sched.set_mode(SchedulingMode::Async).unwrap();
        assert_eq!(sched.slots(), SlotPair::initial(SchedulingMode::Async));
        assert!(sched.run_tick(tensor()).unwrap().detections.is_empty());

        let calls = calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ScriptedCall::Load { num_requests: 2 },
                ScriptedCall::Dispatch(1),
                ScriptedCall::Await(0),
                ScriptedCall::Await(1),
                ScriptedCall::Dispatch(0),
                ScriptedCall::Await(0),
                ScriptedCall::Dispatch(1),
                ScriptedCall::Await(0),
            ]
        );
    }

    #[test]
    fn await_faults_are_fatal() {
        let backend = ScriptedBackend::new(SHAPE).failing_await(1);
        let mut sched = start(backend, SchedulingMode::Sync);
        sched.run_tick(tensor()).unwrap();
        let err = sched.run_tick(tensor()).unwrap_err();
        assert!(matches!(err, NotifierError::Inference(_)));
    }

    #[test]
    fn load_failure_prevents_start() {
        let device: Device = "CPU".parse().unwrap();
        let backend = ScriptedBackend::new(SHAPE).failing_load();
        let result = InferenceScheduler::start(
            Box::new(backend),
            Path::new("stub://"),
            &device,
            SchedulingMode::Async,
        );
        assert!(matches!(result, Err(NotifierError::Inference(_))));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let backend = ScriptedBackend::new(SHAPE);
        let calls = backend.calls();
        let mut sched = start(backend, SchedulingMode::Sync);
        sched.shutdown().unwrap();
        sched.shutdown().unwrap();
        drop(sched);
        let shutdowns = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == ScriptedCall::Shutdown)
            .count();
        assert_eq!(shutdowns, 1);
    }

    #[test]
    fn parses_modes() {
        assert_eq!("SYNC".parse::<SchedulingMode>().unwrap(), SchedulingMode::Sync);
        assert_eq!("async".parse::<SchedulingMode>().unwrap(), SchedulingMode::Async);
        assert!("fast".parse::<SchedulingMode>().is_err());
        assert_eq!(SchedulingMode::Sync.toggled(), SchedulingMode::Async);
    }
}
