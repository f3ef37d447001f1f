#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tract_onnx::prelude::*;

use crate::detect::backend::{InferenceBackend, InputTensor, SlotId};
use crate::detect::device::Device;
use crate::detect::result::{parse_ssd_output, InputShape, RawDetection};
use crate::error::{NotifierError, Result};

type Plan = TypedRunnableModel<TypedModel>;
type SlotOutput = std::result::Result<Vec<RawDetection>, String>;

const DEFAULT_INPUT_WIDTH: usize = 300;
const DEFAULT_INPUT_HEIGHT: usize = 300;

/// Tract-based backend for SSD-style ONNX person detectors.
///
/// Each slot owns a worker thread, so `dispatch` returns as soon as the tensor
/// is queued and the model runs while the caller captures the next frame.
/// Runs on the host CPU only.
///
/// The input shape is taken from the model when it declares a concrete one.
/// The configured size (300x300 unless overridden) only pins symbolic
/// dimensions.
pub struct TractBackend {
    width: usize,
    height: usize,
    shape: Option<InputShape>,
    workers: Vec<SlotWorker>,
}

struct SlotWorker {
    requests: Option<Sender<Vec<f32>>>,
    results: Receiver<SlotOutput>,
    in_flight: bool,
    handle: Option<JoinHandle<()>>,
}

impl TractBackend {
    pub fn new() -> Self {
        Self {
            width: DEFAULT_INPUT_WIDTH,
            height: DEFAULT_INPUT_HEIGHT,
            shape: None,
            workers: Vec::new(),
        }
    }

    /// Input size (pixels) used when the model leaves its input shape symbolic.
    pub fn with_input_size(mut self, width: usize, height: usize) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    fn load_plan(&self, model_path: &Path) -> TractResult<(Plan, InputShape)> {
        let model = tract_onnx::onnx().model_for_path(model_path)?;
        if let Ok(typed) = model.clone().into_optimized() {
            let declared = typed.input_fact(0)?.shape.as_concrete().map(|dims| dims.to_vec());
            if let Some(&[batch, channels, height, width]) = declared.as_deref() {
                let shape = InputShape::new(batch, channels, height, width);
                return Ok((typed.into_runnable()?, shape));
            }
        }
        log::debug!(
            "tract: {} has a symbolic input shape, using {}x{}",
            model_path.display(),
            self.width,
            self.height
        );
        let plan = model
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, self.height, self.width)),
            )?
            .into_optimized()?
            .into_runnable()?;
        Ok((plan, InputShape::new(1, 3, self.height, self.width)))
    }

    fn worker(&mut self, slot: SlotId) -> Result<&mut SlotWorker> {
        let count = self.workers.len();
        self.workers.get_mut(slot).ok_or_else(|| {
            NotifierError::Inference(format!("slot {} out of range ({} requests)", slot, count))
        })
    }
}

impl Default for TractBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn run_slot(plan: &Plan, shape: InputShape, data: Vec<f32>) -> SlotOutput {
    let input = tract_ndarray::Array4::from_shape_vec(
        (shape.batch, shape.channels, shape.height, shape.width),
        data,
    )
    .map_err(|e| format!("input tensor shape: {}", e))?;
    let outputs = plan
        .run(tvec!(input.into_tensor().into()))
        .map_err(|e| format!("ONNX inference failed: {}", e))?;
    let output = outputs
        .first()
        .ok_or_else(|| "model produced no outputs".to_string())?;
    let view = output
        .to_array_view::<f32>()
        .map_err(|e| format!("model output tensor was not f32: {}", e))?;
    let flat: Vec<f32> = view.iter().copied().collect();
    Ok(parse_ssd_output(&flat))
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, device: &Device) -> bool {
        device.includes("CPU")
    }

    fn load_model(
        &mut self,
        model: &Path,
        device: &Device,
        num_requests: usize,
    ) -> Result<InputShape> {
        if !self.supports(device) {
            return Err(NotifierError::Inference(format!(
                "tract backend cannot run on {}",
                device
            )));
        }
        let (plan, shape) = self.load_plan(model).map_err(|e| {
            NotifierError::Inference(format!(
                "failed to load ONNX model from {}: {}",
                model.display(),
                e
            ))
        })?;
        let plan = Arc::new(plan);

        for slot in 0..num_requests {
            let (req_tx, req_rx) = mpsc::channel::<Vec<f32>>();
            let (res_tx, res_rx) = mpsc::channel::<SlotOutput>();
            let plan = plan.clone();
            let handle = std::thread::Builder::new()
                .name(format!("infer-slot-{}", slot))
                .spawn(move || {
                    for data in req_rx {
                        if res_tx.send(run_slot(&plan, shape, data)).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|e| {
                    NotifierError::Inference(format!("cannot spawn inference worker: {}", e))
                })?;
            self.workers.push(SlotWorker {
                requests: Some(req_tx),
                results: res_rx,
                in_flight: false,
                handle: Some(handle),
            });
        }

        self.shape = Some(shape);
        log::info!(
            "tract: loaded {} ({} slots, input {}x{})",
            model.display(),
            num_requests,
            shape.width,
            shape.height
        );
        Ok(shape)
    }

    fn dispatch(&mut self, slot: SlotId, input: InputTensor) -> Result<()> {
        let expected = self
            .shape
            .ok_or_else(|| NotifierError::Inference("model not loaded".to_string()))?;
        if input.shape != expected {
            return Err(NotifierError::Inference(format!(
                "input tensor {:?} does not match model input {:?}",
                input.shape, expected
            )));
        }
        let worker = self.worker(slot)?;
        if worker.in_flight {
            return Err(NotifierError::Inference(format!(
                "slot {} already has a request in flight",
                slot
            )));
        }
        worker
            .requests
            .as_ref()
            .ok_or_else(|| NotifierError::Inference("backend shut down".to_string()))?
            .send(input.data)
            .map_err(|_| NotifierError::Inference(format!("slot {} worker exited", slot)))?;
        worker.in_flight = true;
        Ok(())
    }

    fn await_result(&mut self, slot: SlotId, timeout: Duration) -> Result<Vec<RawDetection>> {
        let worker = self.worker(slot)?;
        if !worker.in_flight {
            return Ok(Vec::new());
        }
        let output = match worker.results.recv_timeout(timeout) {
            Ok(output) => output,
            Err(RecvTimeoutError::Timeout) => {
                return Err(NotifierError::Inference(format!(
                    "slot {} timed out after {:?}",
                    slot, timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(NotifierError::Inference(format!(
                    "slot {} worker exited",
                    slot
                )))
            }
        };
        worker.in_flight = false;
        output.map_err(NotifierError::Inference)
    }

    fn shutdown(&mut self) -> Result<()> {
        for worker in &mut self.workers {
            worker.requests.take();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                handle
                    .join()
                    .map_err(|_| NotifierError::Inference("inference worker panicked".into()))?;
            }
        }
        self.workers.clear();
        self.shape = None;
        Ok(())
    }
}
