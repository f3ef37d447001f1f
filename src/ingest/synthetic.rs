use crate::error::{NotifierError, Result};
use crate::frame::Frame;

use super::FrameSource;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

/// Generated frames for `stub://` inputs.
///
/// Query parameters: `frames` (budget, unlimited when absent), `width`,
/// `height`. Example: `stub://camera?frames=30&width=320&height=240`.
#[derive(Debug)]
pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    budget: Option<u64>,
    frame_count: u64,
    scene_state: u8,
    closed: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, budget: Option<u64>) -> Self {
        Self {
            name: "stub://synthetic".to_string(),
            width,
            height,
            budget,
            frame_count: 0,
            scene_state: 0,
            closed: false,
        }
    }

    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("stub://")
            .ok_or_else(|| NotifierError::Source(format!("not a stub input: {}", uri)))?;
        let (_, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut source = Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT, None);
        source.name = uri.to_string();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let parsed: u64 = value.parse().map_err(|_| {
                NotifierError::Source(format!("invalid stub parameter '{}' in {}", pair, uri))
            })?;
            match key {
                "frames" => source.budget = Some(parsed),
                "width" => source.width = to_dimension(parsed, pair, uri)?,
                "height" => source.height = to_dimension(parsed, pair, uri)?,
                other => {
                    return Err(NotifierError::Source(format!(
                        "unknown stub parameter '{}' in {}",
                        other, uri
                    )))
                }
            }
        }
        Ok(source)
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let len = self.width as usize * self.height as usize * 3;
        (0..len)
            .map(|i| ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8)
            .collect()
    }
}

fn to_dimension(value: u64, pair: &str, uri: &str) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| NotifierError::Source(format!("invalid stub dimension '{}' in {}", pair, uri)))
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed {
            return Err(NotifierError::Source(format!("{} is closed", self.name)));
        }
        if self.budget.is_some_and(|budget| self.frame_count >= budget) {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::from_rgb(self.width, self.height, pixels, self.frame_count).map(Some)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            log::info!("{} released after {} frames", self.name, self.frame_count);
            self.closed = true;
        }
        Ok(())
    }
}
