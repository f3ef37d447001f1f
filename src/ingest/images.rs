use std::path::{Path, PathBuf};

use crate::error::{NotifierError, Result};
use crate::frame::Frame;

use super::FrameSource;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

pub(crate) fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Still images played back as a stream: one file, or every image in a
/// directory sorted by file name.
#[derive(Debug)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSequenceSource {
    pub fn open(path: &Path) -> Result<Self> {
        let paths = if path.is_dir() {
            let entries = std::fs::read_dir(path).map_err(|e| {
                NotifierError::Source(format!("cannot open {}: {}", path.display(), e))
            })?;
            let mut paths: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image_path(p))
                .collect();
            paths.sort();
            paths
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(NotifierError::Source(format!(
                "input {} does not exist",
                path.display()
            )));
        };
        if paths.is_empty() {
            return Err(NotifierError::Source(format!(
                "no images found in {}",
                path.display()
            )));
        }
        log::info!("image input {}: {} frames", path.display(), paths.len());
        Ok(Self { paths, cursor: 0 })
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        let image = image::open(path)
            .map_err(|e| NotifierError::Source(format!("decode {}: {}", path.display(), e)))?
            .to_rgb8();
        self.cursor += 1;
        let (width, height) = image.dimensions();
        Frame::from_rgb(width, height, image.into_raw(), self.cursor as u64).map(Some)
    }

    fn frames_captured(&self) -> u64 {
        self.cursor as u64
    }
}
