//! Occupancy decision and the cell that carries it across threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::detect::RawDetection;
use crate::region::{DetectionBox, FrameSize, OverlapClass, Region};

/// Confidence threshold used when none is configured.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// A detection that passed the confidence threshold, in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassifiedBox {
    pub bbox: DetectionBox,
    pub confidence: f32,
    pub overlap: OverlapClass,
}

/// Scale and classify every detection whose confidence exceeds `threshold`.
///
/// Order follows the detection output.
pub fn classify(
    detections: &[RawDetection],
    threshold: f32,
    region: &Region,
    frame: FrameSize,
) -> Vec<ClassifiedBox> {
    detections
        .iter()
        .filter(|det| det.confidence > threshold)
        .map(|det| {
            let bbox = det.to_box(frame);
            ClassifiedBox {
                bbox,
                confidence: det.confidence,
                overlap: bbox.overlap_with(region),
            }
        })
        .collect()
}

/// Decide whether the zone is occupied this tick.
///
/// Starts at `true`. Every qualifying box overwrites the decision: a box that
/// overlaps the zone sets `true`, a disjoint box sets `false`. The last box in
/// output order wins; this is not an OR over all boxes.
pub fn evaluate(
    detections: &[RawDetection],
    threshold: f32,
    region: &Region,
    frame: FrameSize,
) -> bool {
    decide(&classify(detections, threshold, region, frame))
}

/// Fold already-classified boxes into the tick's decision.
pub fn decide(boxes: &[ClassifiedBox]) -> bool {
    boxes
        .iter()
        .fold(true, |_, classified| classified.overlap.is_inside())
}

/// Latest occupancy decision, shared between the tick loop and the publisher.
///
/// Single value, last write wins. Writes use release ordering and reads use
/// acquire ordering, so the publisher sees the most recent completed tick.
#[derive(Clone, Debug)]
pub struct OccupancyCell {
    inner: Arc<AtomicBool>,
}

impl OccupancyCell {
    pub fn new(initial: bool) -> Self {
        Self {
            inner: Arc::new(AtomicBool::new(initial)),
        }
    }

    pub fn store(&self, occupied: bool) {
        self.inner.store(occupied, Ordering::Release);
    }

    pub fn load(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }
}

impl Default for OccupancyCell {
    fn default() -> Self {
        Self::new(true)
    }
}
