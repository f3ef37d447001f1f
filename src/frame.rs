//! Captured frames and model-input preparation.
//!
//! - `Frame`: immutable RGB8 image produced by a frame source.
//! - `prepare_input`: resize to the model input size and lay the pixels out
//!   channel-first as an `InputTensor`.

use image::imageops::{self, FilterType};
use image::RgbImage;
use std::str::FromStr;

use crate::detect::{InputShape, InputTensor};
use crate::error::{NotifierError, Result};
use crate::region::FrameSize;

/// Captured frame. Pixels are RGB8, row-major.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Sequence number assigned by the source, starting at 1.
    pub index: u64,
}

impl Frame {
    /// Wrap raw RGB bytes, rejecting empty or truncated buffers.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>, index: u64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(NotifierError::Source(format!(
                "blank frame grabbed ({}x{})",
                width, height
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| NotifierError::Source("frame dimensions overflow".to_string()))?;
        if pixels.len() != expected {
            return Err(NotifierError::Source(format!(
                "malformed frame: expected {} RGB bytes, received {}",
                expected,
                pixels.len()
            )));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| NotifierError::Source("malformed frame buffer".to_string()))?;
        Ok(Self::from_image(image, index))
    }

    pub fn from_image(image: RgbImage, index: u64) -> Self {
        Self { image, index }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width(), self.height())
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Channel order expected by the model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelOrder {
    /// OpenCV-trained detectors.
    #[default]
    Bgr,
    Rgb,
}

/// How pixels are turned into model input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreprocessOptions {
    pub channel_order: ChannelOrder,
    /// Multiplier applied to each 0..255 channel value.
    pub scale: f32,
}

impl FromStr for ChannelOrder {
    type Err = NotifierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bgr" => Ok(Self::Bgr),
            "rgb" => Ok(Self::Rgb),
            other => Err(NotifierError::Configuration(format!(
                "unknown channel order '{}': expected 'bgr' or 'rgb'",
                other
            ))),
        }
    }
}

/// Parse a model input size given as `WIDTHxHEIGHT`, e.g. `544x320`.
pub fn parse_input_size(text: &str) -> Result<(usize, usize)> {
    let invalid = || {
        NotifierError::Configuration(format!(
            "invalid model input size '{}': expected WIDTHxHEIGHT",
            text
        ))
    };
    let (width, height) = text
        .trim()
        .split_once(|c: char| c == 'x' || c == 'X')
        .ok_or_else(invalid)?;
    let width: usize = width.trim().parse().map_err(|_| invalid())?;
    let height: usize = height.trim().parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            channel_order: ChannelOrder::Bgr,
            scale: 1.0,
        }
    }
}

/// Resize a frame to the model input and convert HWC to CHW.
pub fn prepare_input(
    frame: &Frame,
    shape: InputShape,
    options: PreprocessOptions,
) -> Result<InputTensor> {
    if shape.channels != 3 || shape.batch != 1 {
        return Err(NotifierError::Inference(format!(
            "unsupported model input layout {:?} (expected 1x3xHxW)",
            shape
        )));
    }
    let resized = imageops::resize(
        frame.image(),
        shape.width as u32,
        shape.height as u32,
        FilterType::Triangle,
    );

    let plane = shape.width * shape.height;
    let mut data = vec![0.0f32; shape.element_count()];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let offset = y as usize * shape.width + x as usize;
        let [r, g, b] = pixel.0;
        let ordered = match options.channel_order {
            ChannelOrder::Bgr => [b, g, r],
            ChannelOrder::Rgb => [r, g, b],
        };
        for (channel, value) in ordered.iter().enumerate() {
            data[channel * plane + offset] = *value as f32 * options.scale;
        }
    }

    Ok(InputTensor { shape, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect();
        Frame::from_rgb(width, height, pixels, 1).expect("frame")
    }

    #[test]
    fn rejects_blank_and_truncated_frames() {
        assert!(matches!(
            Frame::from_rgb(0, 10, vec![], 1),
            Err(NotifierError::Source(_))
        ));
        assert!(matches!(
            Frame::from_rgb(2, 2, vec![0; 11], 1),
            Err(NotifierError::Source(_))
        ));
    }

    #[test]
    fn prepare_input_is_channel_first_bgr() {
        let frame = solid_frame(8, 6, [10, 20, 30]);
        let shape = InputShape::new(1, 3, 3, 4);
        let tensor = prepare_input(&frame, shape, PreprocessOptions::default()).unwrap();

        assert_eq!(tensor.shape, shape);
        assert_eq!(tensor.data.len(), 3 * 3 * 4);
        let plane = 12;
        assert!(tensor.data[..plane].iter().all(|v| *v == 30.0));
        assert!(tensor.data[plane..2 * plane].iter().all(|v| *v == 20.0));
        assert!(tensor.data[2 * plane..].iter().all(|v| *v == 10.0));
    }

    #[test]
    fn prepare_input_applies_rgb_order_and_scale() {
        let frame = solid_frame(4, 4, [255, 0, 51]);
        let shape = InputShape::new(1, 3, 2, 2);
        let options = PreprocessOptions {
            channel_order: ChannelOrder::Rgb,
            scale: 1.0 / 255.0,
        };
        let tensor = prepare_input(&frame, shape, options).unwrap();
        assert!((tensor.data[0] - 1.0).abs() < 1e-6);
        assert_eq!(tensor.data[4], 0.0);
        assert!((tensor.data[8] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn channel_order_and_input_size_parse() {
        assert_eq!("RGB".parse::<ChannelOrder>().unwrap(), ChannelOrder::Rgb);
        assert_eq!(" bgr".parse::<ChannelOrder>().unwrap(), ChannelOrder::Bgr);
        assert!(matches!(
            "yuv".parse::<ChannelOrder>(),
            Err(NotifierError::Configuration(_))
        ));
        assert_eq!(parse_input_size("544x320").unwrap(), (544, 320));
        assert_eq!(parse_input_size("300X300").unwrap(), (300, 300));
        assert!(parse_input_size("0x300").is_err());
        assert!(parse_input_size("544").is_err());
    }

    #[test]
    fn prepare_input_rejects_non_rgb_models() {
        let frame = solid_frame(4, 4, [0, 0, 0]);
        assert!(prepare_input(&frame, InputShape::new(1, 1, 2, 2), PreprocessOptions::default())
            .is_err());
    }
}
