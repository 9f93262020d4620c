use anyhow::{Result, bail};
use log::info;
use opencv::core::Mat;

use crate::{
    adapter::DetectorAdapter,
    cache::{DetectionCache, VideoIdentity},
    camera::{CameraMovement, CameraMovementEstimator, adjust_positions},
    detect::Detector,
    interpolate::interpolate_ball_positions,
    models::Settings,
    possession::PlayerBallAssigner,
    speed::SpeedDistanceEstimator,
    team::TeamAssigner,
    tracks::{Team, Tracks},
    view::ViewTransformer,
};

/// Everything known about a match once all stages ran.
#[derive(Debug)]
pub struct Analysis {
    pub tracks: Tracks,
    pub camera_movement: Vec<CameraMovement>,
    /// Team in control of the ball per frame.
    pub team_control: Vec<Option<Team>>,
}

/// Optional store of the expensive per-video results.
#[derive(Debug, Clone, Copy)]
pub struct CacheContext<'a> {
    pub cache: &'a DetectionCache,
    pub video: &'a VideoIdentity,
}

/// Runs every stage over `frames` in order.
///
/// Each stage reads fields written by the ones before it:
/// 1. detection and tracking write `bbox`
/// 2. ball interpolation fills missing ball `bbox`
/// 3. positions from `bbox` write `position`
/// 4. camera compensation writes `position_adjusted`
/// 5. view transform writes `position_transformed`
/// 6. speed estimation writes `speed` and `distance`
/// 7. team assignment writes `team` and `team_color`
/// 8. ball possession writes `has_ball`
pub fn analyze(
    frames: &[Mat],
    detector: Box<dyn Detector>,
    settings: &Settings,
    cache: Option<CacheContext<'_>>,
) -> Result<Analysis> {
    let Some(first_frame) = frames.first() else {
        bail!("no frame to analyze");
    };

    let mut adapter = DetectorAdapter::new(detector, &settings.detection, &settings.tracker);
    let detections = match cache.map(|ctx| ctx.cache.detections(ctx.video)).transpose()? {
        Some(Some(detections)) if detections.len() == frames.len() => {
            info!(target: "pipeline", "using cached detections");
            detections
        }
        _ => {
            info!(target: "pipeline", "detecting objects in {} frames", frames.len());
            let detections = adapter.detect_frames(frames)?;
            if let Some(ctx) = cache {
                ctx.cache.upsert_detections(ctx.video, &detections)?;
            }
            detections
        }
    };

    info!(target: "pipeline", "tracking objects");
    let mut tracks = adapter.track(&detections)?;
    tracks.ball = interpolate_ball_positions(&tracks.ball);
    tracks.add_positions();

    let camera_movement = match cache
        .map(|ctx| ctx.cache.camera_movements(ctx.video))
        .transpose()?
    {
        Some(Some(movements)) if movements.len() == frames.len() => {
            info!(target: "pipeline", "using cached camera movement");
            movements
        }
        _ => {
            info!(target: "pipeline", "estimating camera movement");
            let movements = CameraMovementEstimator::new(first_frame, &settings.camera)?
                .camera_movement(frames)?;
            if let Some(ctx) = cache {
                ctx.cache.upsert_camera_movements(ctx.video, &movements)?;
            }
            movements
        }
    };
    adjust_positions(&mut tracks, &camera_movement);

    info!(target: "pipeline", "transforming positions to the pitch");
    ViewTransformer::new(&settings.view)?.add_transformed_positions(&mut tracks)?;
    SpeedDistanceEstimator::new(&settings.speed).add_speed_and_distance(&mut tracks);

    info!(target: "pipeline", "assigning teams");
    TeamAssigner::new(&settings.team).assign_teams(frames, &mut tracks)?;

    info!(target: "pipeline", "assigning ball possession");
    let team_control = PlayerBallAssigner::new(&settings.possession).assign_possession(&mut tracks);

    Ok(Analysis {
        tracks,
        camera_movement,
        team_control,
    })
}
