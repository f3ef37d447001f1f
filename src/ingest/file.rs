//! Input selection.
//!
//! The input string picks the source:
//! - `stub://...` generates frames
//! - a directory or an image file plays still images
//! - `cam` or a camera number opens `/dev/videoN` (ffmpeg builds only)
//! - anything else is decoded as a local video file (ffmpeg builds only)
//!
//! Only local paths are accepted; URL schemes other than `stub://` are rejected.

use std::path::Path;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::images::{is_image_path, ImageSequenceSource};
use super::synthetic::SyntheticSource;
use super::FrameSource;
use crate::error::{NotifierError, Result};

pub const CAMERA_INPUT: &str = "cam";
#[cfg(feature = "ingest-file-ffmpeg")]
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";

/// Input settings.
#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    /// Path, `cam`, or `stub://` URI.
    pub path: String,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Open the source named by `config.path`.
pub fn open_source(config: &FileConfig) -> Result<Box<dyn FrameSource>> {
    let path = config.path.trim();
    if !is_local_input(path) {
        return Err(NotifierError::Source(format!(
            "input '{}' is not a local path (URL schemes are not supported)",
            path
        )));
    }
    if path.starts_with("stub://") {
        log::info!("input {}: synthetic frames", path);
        return Ok(Box::new(SyntheticSource::parse(path)?));
    }
    let fs_path = Path::new(path);
    if fs_path.is_dir() || is_image_path(fs_path) {
        return Ok(Box::new(ImageSequenceSource::open(fs_path)?));
    }
    open_video(path)
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_video(path: &str) -> Result<Box<dyn FrameSource>> {
    let camera;
    let target = if path == CAMERA_INPUT {
        DEFAULT_CAMERA_DEVICE
    } else if !path.is_empty() && path.chars().all(|c| c.is_ascii_digit()) {
        camera = format!("/dev/video{}", path);
        camera.as_str()
    } else {
        if !Path::new(path).is_file() {
            return Err(NotifierError::Source(format!(
                "input file {} does not exist",
                path
            )));
        }
        path
    };
    let source = FfmpegFileSource::open(target)
        .map_err(|e| NotifierError::Source(format!("{:#}", e)))?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_video(path: &str) -> Result<Box<dyn FrameSource>> {
    Err(NotifierError::Source(format!(
        "cannot open '{}': video and camera inputs require the ingest-file-ffmpeg feature",
        path
    )))
}

fn is_local_input(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
