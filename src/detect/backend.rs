use std::path::Path;
use std::time::Duration;

use crate::detect::device::Device;
use crate::detect::result::{InputShape, RawDetection};
use crate::error::Result;

/// Identifies one inference request slot.
pub type SlotId = usize;

/// Pre-processed frame ready for dispatch: f32, NCHW.
#[derive(Clone, Debug, PartialEq)]
pub struct InputTensor {
    pub shape: InputShape,
    pub data: Vec<f32>,
}

/// Inference engine seam.
///
/// The scheduler only relies on this contract. Backends own their execution
/// resources (threads, device handles); the slots are logical identifiers
/// handed out by the scheduler.
///
/// # Contract
///
/// - `load_model` is called exactly once, before any dispatch.
/// - `dispatch` must not wait for the result.
/// - `await_result` on a slot with nothing in flight returns an empty list.
/// - A fault or timeout is returned as `NotifierError::Inference`; the caller
///   treats it as fatal and never retries.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend can run on `device`.
    fn supports(&self, device: &Device) -> bool;

    /// Load a model and prepare `num_requests` slots. Returns the model input shape.
    fn load_model(&mut self, model: &Path, device: &Device, num_requests: usize)
        -> Result<InputShape>;

    /// Submit a tensor into a slot without waiting for completion.
    fn dispatch(&mut self, slot: SlotId, input: InputTensor) -> Result<()>;

    /// Block until the slot's output is ready, or `timeout` elapses.
    fn await_result(&mut self, slot: SlotId, timeout: Duration) -> Result<Vec<RawDetection>>;

    /// Release inference resources. Further calls are errors.
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}
