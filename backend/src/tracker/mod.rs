use nalgebra::Vector4;

use crate::{detect::DetectionClass, tracks::BBox};

mod bytetracker;
mod kalman_filter;
mod strack;

pub use bytetracker::ByteTracker;
pub use strack::STrack;

/// A detection handed to the tracker.
#[derive(Clone, Debug)]
pub struct Detection {
    bbox: BBox,
    class: DetectionClass,
    score: f32,
}

impl Detection {
    pub fn new(bbox: BBox, class: DetectionClass, score: f32) -> Self {
        Self { bbox, class, score }
    }
}

fn bbox_to_tlwh(bbox: BBox) -> [f32; 4] {
    [bbox.x1, bbox.y1, bbox.width(), bbox.height()]
}

fn tlwh_to_xyah(tlwh: [f32; 4]) -> Vector4<f32> {
    let cx = tlwh[0] + tlwh[2] / 2.0;
    let cy = tlwh[1] + tlwh[3] / 2.0;
    let a = tlwh[2] / tlwh[3];
    let h = tlwh[3];
    Vector4::new(cx, cy, a, h)
}
