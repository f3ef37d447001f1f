//! Video file and camera decoding through FFmpeg.

use anyhow::{Context, Result as AnyResult};
use ffmpeg_next as ffmpeg;

use super::FrameSource;
use crate::error::{NotifierError, Result};
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: String,
    input: Option<ffmpeg::format::context::Input>,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    flushed: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &str) -> AnyResult<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        ffmpeg::device::register_all();
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open input '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("'{}' has no video track", path))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "input {}: {}x{} video (ffmpeg)",
            path,
            decoder.width(),
            decoder.height()
        );
        Ok(Self {
            path: path.to_string(),
            input: Some(input),
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            flushed: false,
        })
    }

    fn receive(&mut self) -> AnyResult<Option<Frame>> {
        receive_frame(&mut self.decoder, &mut self.scaler, &mut self.frame_count)
    }

    fn decode_next(&mut self) -> AnyResult<Option<Frame>> {
        if let Some(frame) = self.receive()? {
            return Ok(Some(frame));
        }
        if self.flushed {
            return Ok(None);
        }
        let Some(input) = self.input.as_mut() else {
            anyhow::bail!("input '{}' is closed", self.path);
        };
        for (stream, packet) in input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if let Some(frame) =
                receive_frame(&mut self.decoder, &mut self.scaler, &mut self.frame_count)?
            {
                return Ok(Some(frame));
            }
        }
        // End of container: drain frames still buffered in the decoder.
        self.flushed = true;
        self.decoder.send_eof().context("flush ffmpeg decoder")?;
        self.receive()
    }
}

impl FrameSource for FfmpegFileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.decode_next()
            .map_err(|e| NotifierError::Source(format!("{}: {:#}", self.path, e)))
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn close(&mut self) -> Result<()> {
        if self.input.take().is_some() {
            log::info!("input {} released after {} frames", self.path, self.frame_count);
        }
        Ok(())
    }
}

fn receive_frame(
    decoder: &mut ffmpeg::codec::decoder::Video,
    scaler: &mut ffmpeg::software::scaling::Context,
    frame_count: &mut u64,
) -> AnyResult<Option<Frame>> {
    let mut decoded = ffmpeg::frame::Video::empty();
    if decoder.receive_frame(&mut decoded).is_err() {
        return Ok(None);
    }
    let mut rgb_frame = ffmpeg::frame::Video::empty();
    scaler
        .run(&decoded, &mut rgb_frame)
        .context("scale frame to RGB")?;
    let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
    *frame_count += 1;
    Ok(Some(Frame::from_rgb(width, height, pixels, *frame_count)?))
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> AnyResult<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame buffer is truncated")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}
