mod adapter;
mod cache;
mod camera;
mod detect;
mod interpolate;
mod models;
mod pipeline;
mod possession;
mod render;
mod speed;
mod team;
mod tracker;
mod tracks;
mod view;

pub use {
    adapter::DetectorAdapter,
    cache::{DetectionCache, VideoIdentity},
    camera::{CameraMovement, CameraMovementEstimator, adjust_positions},
    detect::{DetectionClass, Detector, OnnxDetector, RawDetection},
    interpolate::interpolate_ball_positions,
    models::*,
    pipeline::{Analysis, CacheContext, analyze},
    possession::{PlayerBallAssigner, control_percentages},
    render::draw_annotations,
    speed::SpeedDistanceEstimator,
    strum::{IntoEnumIterator, ParseError},
    team::TeamAssigner,
    tracker::{ByteTracker, Detection, STrack},
    tracks::*,
    view::ViewTransformer,
};
