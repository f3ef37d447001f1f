//! Frame sources.
//!
//! - `stub://` synthetic frames (tests and dry runs)
//! - local still images: a single file or a directory, read in name order
//! - local video files (feature: ingest-file-ffmpeg)
//!
//! Every source yields `Ok(None)` at end of stream. A source that cannot be
//! opened, or yields a malformed frame, reports `NotifierError::Source`.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
mod images;
mod synthetic;

pub use file::{open_source, FileConfig};
pub use images::ImageSequenceSource;
pub use synthetic::SyntheticSource;

use crate::error::Result;
use crate::frame::Frame;

/// Sources are driven from the tick loop thread only.
pub trait FrameSource {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Frames produced so far.
    fn frames_captured(&self) -> u64;

    /// Release the capture device or file.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
