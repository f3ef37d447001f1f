use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::detect::backend::{InferenceBackend, InputTensor, SlotId};
use crate::detect::device::Device;
use crate::detect::result::{InputShape, RawDetection};
use crate::error::{NotifierError, Result};

/// Call observed by a `ScriptedBackend`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptedCall {
    Load { num_requests: usize },
    Dispatch(SlotId),
    Await(SlotId),
    Shutdown,
}

/// Scripted backend for dry runs and tests.
///
/// Each dispatch consumes the next scripted detection list (empty once the
/// script runs out) and parks it in the slot until awaited. Calls are recorded
/// in a shared log so they can be inspected after the backend has been moved
/// into a scheduler.
pub struct ScriptedBackend {
    shape: InputShape,
    script: VecDeque<Vec<RawDetection>>,
    pending: HashMap<SlotId, Vec<RawDetection>>,
    num_requests: Option<usize>,
    calls: Arc<Mutex<Vec<ScriptedCall>>>,
    fail_load: bool,
    fail_on_await: Option<usize>,
    awaits: usize,
    cpu_only: bool,
}

impl ScriptedBackend {
    pub fn new(shape: InputShape) -> Self {
        Self {
            shape,
            script: VecDeque::new(),
            pending: HashMap::new(),
            num_requests: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_load: false,
            fail_on_await: None,
            awaits: 0,
            cpu_only: false,
        }
    }

    /// Detections returned for successive dispatches.
    pub fn with_script(mut self, script: Vec<Vec<RawDetection>>) -> Self {
        self.script = script.into();
        self
    }

    /// Make `load_model` fail.
    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Fail the n-th (0-based) await with an execution fault.
    pub fn failing_await(mut self, nth: usize) -> Self {
        self.fail_on_await = Some(nth);
        self
    }

    /// Only accept devices that include CPU.
    pub fn cpu_only(mut self) -> Self {
        self.cpu_only = true;
        self
    }

    /// Shared call log.
    pub fn calls(&self) -> Arc<Mutex<Vec<ScriptedCall>>> {
        self.calls.clone()
    }

    fn record(&self, call: ScriptedCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn check_slot(&self, slot: SlotId) -> Result<()> {
        match self.num_requests {
            None => Err(NotifierError::Inference("model not loaded".to_string())),
            Some(n) if slot >= n => Err(NotifierError::Inference(format!(
                "slot {} out of range ({} requests)",
                slot, n
            ))),
            Some(_) => Ok(()),
        }
    }
}

impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports(&self, device: &Device) -> bool {
        !self.cpu_only || device.includes("CPU")
    }

    fn load_model(
        &mut self,
        model: &Path,
        device: &Device,
        num_requests: usize,
    ) -> Result<InputShape> {
        if self.fail_load {
            return Err(NotifierError::Inference(format!(
                "failed to load model {}",
                model.display()
            )));
        }
        if !self.supports(device) {
            return Err(NotifierError::Inference(format!(
                "backend {} cannot run on {}",
                self.name(),
                device
            )));
        }
        self.num_requests = Some(num_requests);
        self.record(ScriptedCall::Load { num_requests });
        Ok(self.shape)
    }

    fn dispatch(&mut self, slot: SlotId, input: InputTensor) -> Result<()> {
        self.check_slot(slot)?;
        if input.shape != self.shape || input.data.len() != self.shape.element_count() {
            return Err(NotifierError::Inference(format!(
                "input tensor {:?} does not match model input {:?}",
                input.shape, self.shape
            )));
        }
        let detections = self.script.pop_front().unwrap_or_default();
        self.pending.insert(slot, detections);
        self.record(ScriptedCall::Dispatch(slot));
        Ok(())
    }

    fn await_result(&mut self, slot: SlotId, _timeout: Duration) -> Result<Vec<RawDetection>> {
        self.check_slot(slot)?;
        self.record(ScriptedCall::Await(slot));
        let nth = self.awaits;
        self.awaits += 1;
        if self.fail_on_await == Some(nth) {
            return Err(NotifierError::Inference(format!(
                "execution fault in slot {}",
                slot
            )));
        }
        Ok(self.pending.remove(&slot).unwrap_or_default())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.pending.clear();
        self.num_requests = None;
        self.record(ScriptedCall::Shutdown);
        Ok(())
    }
}
