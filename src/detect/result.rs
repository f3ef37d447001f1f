use crate::region::{DetectionBox, FrameSize};

/// Model input tensor shape, NCHW.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputShape {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl InputShape {
    pub fn new(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            batch,
            channels,
            height,
            width,
        }
    }

    pub fn element_count(&self) -> usize {
        self.batch * self.channels * self.height * self.width
    }
}

/// One row of SSD detection output.
///
/// Layout: `[image_id, label, confidence, xmin, ymin, xmax, ymax]` with
/// corners normalized to 0..1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub image_id: f32,
    pub label: f32,
    pub confidence: f32,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

/// Values per SSD output row.
pub const SSD_ROW_LEN: usize = 7;

impl RawDetection {
    /// Convenience constructor for a single-image, single-class detection.
    pub fn new(confidence: f32, xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            image_id: 0.0,
            label: 1.0,
            confidence,
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn from_row(row: &[f32]) -> Option<Self> {
        if row.len() < SSD_ROW_LEN {
            return None;
        }
        Some(Self {
            image_id: row[0],
            label: row[1],
            confidence: row[2],
            xmin: row[3],
            ymin: row[4],
            xmax: row[5],
            ymax: row[6],
        })
    }

    pub fn to_box(&self, size: FrameSize) -> DetectionBox {
        DetectionBox::from_normalized(self.xmin, self.ymin, self.xmax, self.ymax, size)
    }
}

/// Parse a flat SSD output blob (`[1, 1, N, 7]`).
///
/// Parsing stops at the first row whose image id is negative, which SSD heads
/// use to terminate the valid detection list.
pub fn parse_ssd_output(flat: &[f32]) -> Vec<RawDetection> {
    flat.chunks_exact(SSD_ROW_LEN)
        .filter_map(RawDetection::from_row)
        .take_while(|det| det.image_id >= 0.0)
        .collect()
}
