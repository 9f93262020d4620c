use anyhow::{Result, bail};
use log::debug;
use opencv::{
    core::{
        CV_8UC1, Mat, MatExprTraitConst, MatTraitConst, Point2f, Rect, Scalar, Size, TermCriteria,
        TermCriteria_Type, Vector,
    },
    imgproc::{self, COLOR_BGR2GRAY, FILLED, LINE_8, cvt_color_def},
    video::calc_optical_flow_pyr_lk,
};
use serde::{Deserialize, Serialize};

use crate::{models::CameraSettings, tracks::Tracks};

/// Movement of the camera between the previous frame and the current one, in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraMovement {
    pub dx: f32,
    pub dy: f32,
}

/// Estimates the camera pan from sparse optical flow on background features.
///
/// Features are only searched inside the configured column strips of the frame, which are
/// expected to show static background such as the stands.
#[derive(Debug)]
pub struct CameraMovementEstimator {
    mask: Mat,
    settings: CameraSettings,
}

impl CameraMovementEstimator {
    /// Creates the estimator and its feature mask from the size of `first_frame`.
    pub fn new(first_frame: &Mat, settings: &CameraSettings) -> Result<Self> {
        let size = first_frame.size()?;
        if size.width <= 0 || size.height <= 0 {
            bail!("cannot estimate camera movement on an empty frame");
        }

        let mut mask = Mat::zeros(size.height, size.width, CV_8UC1)?.to_mat()?;
        for &(start, end) in &settings.mask_columns {
            let start = start.clamp(0, size.width);
            let end = end.clamp(0, size.width);
            if end <= start {
                continue;
            }
            imgproc::rectangle(
                &mut mask,
                Rect::new(start, 0, end - start, size.height),
                Scalar::all(255.0),
                FILLED,
                LINE_8,
                0,
            )?;
        }

        Ok(Self {
            mask,
            settings: settings.clone(),
        })
    }

    /// Computes one [`CameraMovement`] per frame of `frames`.
    ///
    /// The first frame never moves.
    pub fn camera_movement(&self, frames: &[Mat]) -> Result<Vec<CameraMovement>> {
        let mut movements = vec![CameraMovement::default(); frames.len()];
        let Some(first) = frames.first() else {
            return Ok(movements);
        };

        let mut old_gray = to_grayscale(first)?;
        let mut old_features = self.features(&old_gray)?;

        for (i, frame) in frames.iter().enumerate().skip(1) {
            let frame_gray = to_grayscale(frame)?;
            if old_features.is_empty() {
                old_features = self.features(&frame_gray)?;
                old_gray = frame_gray;
                continue;
            }

            let mut new_features = Vector::<Point2f>::new();
            let mut status = Vector::<u8>::new();
            let mut error = Vector::<f32>::new();
            calc_optical_flow_pyr_lk(
                &old_gray,
                &frame_gray,
                &old_features,
                &mut new_features,
                &mut status,
                &mut error,
                Size::new(self.settings.window_size, self.settings.window_size),
                self.settings.max_level,
                self.criteria()?,
                0,
                1e-4,
            )?;

            match largest_displacement(&old_features, &new_features, &status) {
                Some((distance, movement)) if distance > self.settings.minimum_distance => {
                    debug!(target: "camera", "frame {i} moved by {movement:?}");
                    movements[i] = movement;
                    old_features = self.features(&frame_gray)?;
                }
                _ => (),
            }
            old_gray = frame_gray;
        }

        Ok(movements)
    }

    fn features(&self, gray: &Mat) -> Result<Vector<Point2f>> {
        let mut corners = Vector::<Point2f>::new();
        imgproc::good_features_to_track(
            gray,
            &mut corners,
            self.settings.max_corners,
            self.settings.quality_level,
            self.settings.feature_min_distance,
            &self.mask,
            self.settings.block_size,
            false,
            0.04,
        )?;
        Ok(corners)
    }

    fn criteria(&self) -> Result<TermCriteria> {
        Ok(TermCriteria::new(
            TermCriteria_Type::COUNT as i32 | TermCriteria_Type::EPS as i32,
            self.settings.max_iterations,
            self.settings.epsilon,
        )?)
    }
}

/// Finds the tracked feature that moved the most.
///
/// Returns its displacement length and the movement `old - new`, or `None` when no feature was
/// tracked successfully.
fn largest_displacement(
    old: &Vector<Point2f>,
    new: &Vector<Point2f>,
    status: &Vector<u8>,
) -> Option<(f32, CameraMovement)> {
    old.iter()
        .zip(new.iter())
        .zip(status.iter())
        .filter(|(_, status)| *status != 0)
        .map(|((old, new), _)| {
            let dx = old.x - new.x;
            let dy = old.y - new.y;
            (dx.hypot(dy), CameraMovement { dx, dy })
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))
}

/// Sets `position_adjusted` of every entity to its `position` minus the movement of its frame.
///
/// Reads `position`, writes `position_adjusted`.
pub fn adjust_positions(tracks: &mut Tracks, movements: &[CameraMovement]) {
    for (_, frame, track) in tracks.entities_mut() {
        let movement = movements.get(frame).copied().unwrap_or_default();
        track.position_adjusted = track
            .position
            .map(|position| Point2f::new(position.x - movement.dx, position.y - movement.dy));
    }
}

fn to_grayscale(frame: &Mat) -> Result<Mat> {
    let mut gray = Mat::default();
    cvt_color_def(frame, &mut gray, COLOR_BGR2GRAY)?;
    Ok(gray)
}
