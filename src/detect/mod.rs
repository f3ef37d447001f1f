mod backend;
pub mod backends;
mod device;
mod result;

pub use backend::{InferenceBackend, InputTensor, SlotId};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::{ScriptedBackend, ScriptedCall};
pub use device::{Device, ACCEPTED_DEVICES};
pub use result::{parse_ssd_output, InputShape, RawDetection, SSD_ROW_LEN};

use crate::error::{NotifierError, Result};

/// Input size assumed when neither the model nor the config gives one.
pub const DEFAULT_INPUT_SIZE: (usize, usize) = (300, 300);

/// Pick a backend for a model path.
///
/// `stub://` paths select the scripted backend with no canned detections;
/// `.onnx` files select tract when it is compiled in. `input_size` is
/// `(width, height)`; tract only uses it for models with a symbolic input.
pub fn backend_for_model(
    model: &str,
    input_size: Option<(usize, usize)>,
) -> Result<Box<dyn InferenceBackend>> {
    let (width, height) = input_size.unwrap_or(DEFAULT_INPUT_SIZE);
    if model.starts_with("stub://") {
        return Ok(Box::new(ScriptedBackend::new(InputShape::new(1, 3, height, width))));
    }
    if model.ends_with(".onnx") {
        #[cfg(feature = "backend-tract")]
        {
            return Ok(Box::new(TractBackend::new().with_input_size(width, height)));
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            return Err(NotifierError::Inference(
                "ONNX models require the backend-tract feature".to_string(),
            ));
        }
    }
    Err(NotifierError::Inference(format!(
        "no inference backend for model '{}'",
        model
    )))
}
