use super::{Detection, bbox_to_tlwh, kalman_filter::KalmanXYAH, tlwh_to_xyah};
use crate::{
    detect::DetectionClass,
    tracks::{BBox, TrackId},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackState {
    Tracked,
    Lost,
}

/// A single [STrack] with its Kalman motion state.
///
/// [STrack]: https://github.com/ultralytics/ultralytics/blob/004d9730060e560c86ad79aaa1ab97167443be25/ultralytics/trackers/byte_tracker.py#L16
#[derive(Debug, Clone)]
pub struct STrack {
    pub(super) track_id: TrackId,
    pub(super) frame_id: u64,
    pub(super) state: TrackState,
    pub(super) kalman: KalmanXYAH,
    pub(super) tlwh: [f32; 4],
    pub(super) class: DetectionClass,
    pub(super) score: f32,
}

impl STrack {
    pub fn new(detection: &Detection) -> Self {
        Self {
            track_id: 0,
            frame_id: 0,
            state: TrackState::Lost,
            kalman: KalmanXYAH::new(),
            tlwh: bbox_to_tlwh(detection.bbox),
            class: detection.class,
            score: detection.score,
        }
    }

    pub fn track_id(&self) -> TrackId {
        self.track_id
    }

    pub fn class(&self) -> DetectionClass {
        self.class
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    /// The box of the last detection matched to this track.
    pub fn bbox(&self) -> BBox {
        BBox::new(
            self.tlwh[0],
            self.tlwh[1],
            self.tlwh[0] + self.tlwh[2],
            self.tlwh[1] + self.tlwh[3],
        )
    }

    pub(super) fn activate(&mut self, track_id: TrackId, frame_id: u64) {
        self.track_id = track_id;
        self.frame_id = frame_id;
        self.state = TrackState::Tracked;

        let meas = tlwh_to_xyah(self.tlwh);
        self.kalman.initiate(meas);
    }

    pub(super) fn predict(&mut self) {
        if self.state != TrackState::Tracked {
            self.kalman.mean[7] = 0.0;
        }
        self.kalman.predict();
    }

    /// Updates with a matched detection, reviving the track if it was lost.
    pub(super) fn update(&mut self, detection: &STrack, frame_id: u64) {
        self.frame_id = frame_id;
        self.tlwh = detection.tlwh;
        self.class = detection.class;
        self.score = detection.score;
        self.state = TrackState::Tracked;

        let meas = tlwh_to_xyah(self.tlwh);
        self.kalman.update(meas);
    }

    pub(super) fn mark_lost(&mut self) {
        self.state = TrackState::Lost;
    }

    pub(super) fn kalman_tlwh(&self) -> [f32; 4] {
        self.kalman.tlwh()
    }
}
