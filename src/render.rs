//! Overlay rendering and display sinks.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::error::{NotifierError, Result};
use crate::frame::Frame;
use crate::region::Region;
use crate::scheduler::SchedulingMode;

const ROI_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BANNER_COLOR: Rgb<u8> = Rgb([200, 0, 0]);
pub const OCCUPIED_BANNER: &str = "PERSON IN";

/// Per-tick values shown next to the image.
#[derive(Clone, Copy, Debug)]
pub struct OverlayStatus {
    pub mode: SchedulingMode,
    pub inference_time: Duration,
    pub render_time: Duration,
    pub occupied: bool,
}

impl OverlayStatus {
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(4);
        if self.occupied {
            lines.push(OCCUPIED_BANNER.to_string());
        }
        lines.push(if self.mode.is_async() {
            "Inference time: N/A for async mode".to_string()
        } else {
            format!("Inference time: {:.3} ms", as_ms(self.inference_time))
        });
        lines.push(format!(
            "Async mode is {}.",
            if self.mode.is_async() { "on" } else { "off" }
        ));
        lines.push(format!("Rendering time: {:.3} ms", as_ms(self.render_time)));
        lines.push(format!(
            "Zone status: {}",
            if self.occupied { "occupied" } else { "clear" }
        ));
        lines
    }
}

fn as_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Annotated frame ready for display.
#[derive(Clone, Debug)]
pub struct Overlay {
    pub frame_index: u64,
    pub image: RgbImage,
    pub lines: Vec<String>,
    pub occupied: bool,
}

/// Draw the region outline and, when occupied, the warning banner.
pub fn render_overlay(frame: &Frame, region: &Region, status: &OverlayStatus) -> Overlay {
    let mut image = frame.image().clone();
    if let Some(rect) = clip_region(region, image.width(), image.height()) {
        draw_hollow_rect_mut(&mut image, rect, ROI_COLOR);
    }
    if status.occupied {
        let banner_width = image.width();
        let banner_height = (image.height() / 12).max(8).min(image.height());
        draw_filled_rect_mut(
            &mut image,
            Rect::at(0, 0).of_size(banner_width, banner_height),
            BANNER_COLOR,
        );
    }
    Overlay {
        frame_index: frame.index,
        image,
        lines: status.lines(),
        occupied: status.occupied,
    }
}

fn clip_region(region: &Region, width: u32, height: u32) -> Option<Rect> {
    let x0 = region.x.clamp(0, width as i32);
    let y0 = region.y.clamp(0, height as i32);
    let x1 = region.right().clamp(0, width as i64) as i32;
    let y1 = region.bottom().clamp(0, height as i64) as i32;
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(Rect::at(x0, y0).of_size((x1 - x0) as u32, (y1 - y0) as u32))
}

/// Destination for rendered overlays.
pub trait FrameDisplay: Send {
    fn show(&mut self, overlay: &Overlay) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Discards every overlay.
#[derive(Debug, Default)]
pub struct NullDisplay;

impl FrameDisplay for NullDisplay {
    fn show(&mut self, _overlay: &Overlay) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Logs status changes and optionally writes PNG snapshots.
#[derive(Debug, Default)]
pub struct LogDisplay {
    snapshot_dir: Option<PathBuf>,
    snapshot_every: u64,
    last_occupied: Option<bool>,
    shown: u64,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write every `every`-th overlay to `dir` as `frame_NNNNNN.png`.
    pub fn with_snapshots(mut self, dir: impl Into<PathBuf>, every: u64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            NotifierError::Configuration(format!(
                "cannot create snapshot dir {}: {}",
                dir.display(),
                e
            ))
        })?;
        self.snapshot_dir = Some(dir);
        self.snapshot_every = every.max(1);
        Ok(self)
    }
}

impl FrameDisplay for LogDisplay {
    fn show(&mut self, overlay: &Overlay) -> Result<()> {
        self.shown += 1;
        if self.last_occupied != Some(overlay.occupied) {
            log::info!(
                "frame {}: zone {}",
                overlay.frame_index,
                if overlay.occupied { "OCCUPIED" } else { "clear" }
            );
            self.last_occupied = Some(overlay.occupied);
        }
        log::debug!("frame {}: {}", overlay.frame_index, overlay.lines.join(" | "));

        if let Some(dir) = &self.snapshot_dir {
            if self.shown % self.snapshot_every == 0 {
                let path = dir.join(format!("frame_{:06}.png", overlay.frame_index));
                if let Err(e) = overlay.image.save(&path) {
                    log::warn!("snapshot {} failed: {}", path.display(), e);
                }
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        log::info!("display closed after {} frames", self.shown);
        Ok(())
    }
}

/// Keeps a summary of every overlay; used by tests.
#[derive(Clone, Debug, Default)]
pub struct RecordingDisplay {
    shown: Arc<Mutex<Vec<(u64, bool)>>>,
    closed: Arc<Mutex<bool>>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(frame_index, occupied)` per overlay shown.
    pub fn shown(&self) -> Vec<(u64, bool)> {
        self.shown.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.lock().map(|c| *c).unwrap_or(false)
    }
}

impl FrameDisplay for RecordingDisplay {
    fn show(&mut self, overlay: &Overlay) -> Result<()> {
        if let Ok(mut shown) = self.shown.lock() {
            shown.push((overlay.frame_index, overlay.occupied));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Ok(mut closed) = self.closed.lock() {
            *closed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black_frame() -> Frame {
        Frame::from_rgb(48, 36, vec![0; 48 * 36 * 3], 3).unwrap()
    }

    fn status(mode: SchedulingMode, occupied: bool) -> OverlayStatus {
        OverlayStatus {
            mode,
            inference_time: Duration::from_micros(12_500),
            render_time: Duration::from_millis(2),
            occupied,
        }
    }

    #[test]
    fn draws_region_outline_and_banner() {
        let frame = black_frame();
        let overlay = render_overlay(
            &frame,
            &Region::new(10, 10, 20, 20),
            &status(SchedulingMode::Sync, true),
        );
        assert_eq!(overlay.frame_index, 3);
        assert_eq!(*overlay.image.get_pixel(10, 20), ROI_COLOR);
        assert_eq!(*overlay.image.get_pixel(20, 20), Rgb([0, 0, 0]));
        assert_eq!(*overlay.image.get_pixel(0, 0), BANNER_COLOR);
        assert_eq!(overlay.lines[0], OCCUPIED_BANNER);
        assert!(overlay.lines.contains(&"Inference time: 12.500 ms".to_string()));
        assert!(overlay.lines.contains(&"Async mode is off.".to_string()));
    }

    #[test]
    fn clear_zone_has_no_banner() {
        let overlay = render_overlay(
            &black_frame(),
            &Region::new(10, 10, 20, 20),
            &status(SchedulingMode::Async, false),
        );
        assert_eq!(*overlay.image.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert!(!overlay.lines.iter().any(|l| l == OCCUPIED_BANNER));
        assert!(overlay
            .lines
            .contains(&"Inference time: N/A for async mode".to_string()));
    }

    #[test]
    fn region_is_clipped_to_frame() {
        assert!(clip_region(&Region::new(100, 100, 10, 10), 48, 36).is_none());
        let edge = clip_region(&Region::new(40, 30, i32::MAX, i32::MAX), 48, 36).unwrap();
        assert_eq!((edge.width(), edge.height()), (8, 6));
        let rect = clip_region(&Region::new(40, 30, 100, 100), 48, 36).unwrap();
        assert_eq!((rect.width(), rect.height()), (8, 6));
    }

    #[test]
    fn log_display_writes_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let mut display = LogDisplay::new().with_snapshots(dir.path(), 2).unwrap();
        let overlay = render_overlay(
            &black_frame(),
            &Region::new(0, 0, 48, 36),
            &status(SchedulingMode::Async, false),
        );
        display.show(&overlay).unwrap();
        display.show(&overlay).unwrap();
        display.close().unwrap();
        assert!(dir.path().join("frame_000003.png").exists());
    }
}
