//! Restricted-zone geometry.
//!
//! - `Region`: the operator-defined zone, in integer pixels.
//! - `DetectionBox`: a detection scaled to pixels.
//! - `OverlapClass`: how a box relates to the region.

use serde::{Deserialize, Serialize};

/// Width and height of a frame in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Restricted zone rectangle.
///
/// Non-positive fields are placeholders resolved by `apply_defaults` against the
/// current frame. After defaulting, the region only changes when the operator
/// commits a new selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Resolve placeholder fields against the frame size.
    ///
    /// A non-positive x or y snaps the origin to (0, 0); a non-positive width or
    /// height extends to the frame edge. Applying this twice is a no-op.
    pub fn apply_defaults(&mut self, size: FrameSize) {
        if self.x <= 0 || self.y <= 0 {
            self.x = 0;
            self.y = 0;
        }
        if self.width <= 0 {
            self.width = size.width as i32;
        }
        if self.height <= 0 {
            self.height = size.height as i32;
        }
    }

    /// Right edge. Widened so an extent near `i32::MAX` cannot overflow.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Reject a region whose far edges do not fit in pixel coordinates.
    pub fn check_extent(&self) -> Result<(), String> {
        if self.x.checked_add(self.width).is_none() || self.y.checked_add(self.height).is_none() {
            return Err(format!("region {} extends past the pixel coordinate range", self));
        }
        Ok(())
    }

    /// Replace every field at once.
    pub fn replace_with(&mut self, other: Region) {
        *self = other;
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "-x = {}, -y = {}, -w = {}, -h = {}",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Detection box in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DetectionBox {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl DetectionBox {
    pub fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Scale normalized corners to pixels, truncating toward zero.
    pub fn from_normalized(xmin: f32, ymin: f32, xmax: f32, ymax: f32, size: FrameSize) -> Self {
        let w = size.width as f32;
        let h = size.height as f32;
        Self {
            xmin: (xmin * w) as i32,
            ymin: (ymin * h) as i32,
            xmax: (xmax * w) as i32,
            ymax: (ymax * h) as i32,
        }
    }

    /// Box area. Computed in `i128` since saturated corners span the full `i32` range.
    pub fn area(&self) -> i128 {
        let w = self.xmax as i64 - self.xmin as i64;
        let h = self.ymax as i64 - self.ymin as i64;
        w as i128 * h as i128
    }

    /// Classify this box against a region.
    pub fn overlap_with(&self, region: &Region) -> OverlapClass {
        let x_low = (self.xmin as i64).max(region.x as i64);
        let x_high = (self.xmax as i64).min(region.right());
        let y_low = (self.ymin as i64).max(region.y as i64);
        let y_high = (self.ymax as i64).min(region.bottom());
        let overlap_w = x_high - x_low;
        let overlap_h = y_high - y_low;
        if overlap_w < 0 || overlap_h < 0 {
            return OverlapClass::Disjoint;
        }
        let intersection = overlap_w as i128 * overlap_h as i128;
        if self.area() > intersection {
            OverlapClass::Partial
        } else {
            OverlapClass::Contained
        }
    }
}

/// Relation between a detection box and the restricted zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapClass {
    /// No coordinate overlap.
    Disjoint,
    /// Overlaps, but part of the box lies outside the zone.
    Partial,
    /// Box lies entirely within the zone.
    Contained,
}

impl OverlapClass {
    pub fn is_inside(self) -> bool {
        !matches!(self, Self::Disjoint)
    }
}
