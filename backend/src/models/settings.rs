use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::deserialize_with_ok_or_default;
use crate::tracks::{Team, TrackId};

/// All tunable constants of a run.
///
/// Every field falls back to its default when missing from the configuration file, so a partial
/// file only needs to name what it changes.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub detection: DetectionSettings,
    #[serde(default)]
    pub tracker: TrackerSettings,
    #[serde(default)]
    pub camera: CameraSettings,
    #[serde(default)]
    pub view: ViewSettings,
    #[serde(default)]
    pub speed: SpeedSettings,
    #[serde(default)]
    pub team: TeamSettings,
    #[serde(default)]
    pub possession: PossessionSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionSettings {
    #[serde(default = "batch_size_default")]
    pub batch_size: usize,
    #[serde(default = "confidence_threshold_default")]
    pub confidence_threshold: f32,
    /// Class names indexed by the model's class id.
    #[serde(default = "class_names_default")]
    pub class_names: Vec<String>,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            batch_size: batch_size_default(),
            confidence_threshold: confidence_threshold_default(),
            class_names: class_names_default(),
        }
    }
}

fn batch_size_default() -> usize {
    20
}

fn confidence_threshold_default() -> f32 {
    0.1
}

fn class_names_default() -> Vec<String> {
    ["ball", "goalkeeper", "player", "referee"]
        .into_iter()
        .map(ToString::to_string)
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerSettings {
    /// Frames a lost track is kept before being dropped.
    #[serde(default = "lost_track_buffer_default")]
    pub lost_track_buffer: u64,
    /// Detections at or above this score take part in the first association and may start
    /// new tracks.
    #[serde(default = "activation_threshold_default")]
    pub activation_threshold: f32,
    /// Maximum `1 - IoU` cost accepted in the first association.
    #[serde(default = "matching_threshold_default")]
    pub matching_threshold: f32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            lost_track_buffer: lost_track_buffer_default(),
            activation_threshold: activation_threshold_default(),
            matching_threshold: matching_threshold_default(),
        }
    }
}

fn lost_track_buffer_default() -> u64 {
    30
}

fn activation_threshold_default() -> f32 {
    0.25
}

fn matching_threshold_default() -> f32 {
    0.8
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Displacement in pixels above which a camera movement is recorded.
    #[serde(default = "minimum_distance_default")]
    pub minimum_distance: f32,
    /// Half-open pixel column ranges searched for background features.
    #[serde(default = "mask_columns_default")]
    pub mask_columns: Vec<(i32, i32)>,
    #[serde(default = "max_corners_default")]
    pub max_corners: i32,
    #[serde(default = "quality_level_default")]
    pub quality_level: f64,
    #[serde(default = "feature_min_distance_default")]
    pub feature_min_distance: f64,
    #[serde(default = "block_size_default")]
    pub block_size: i32,
    #[serde(default = "window_size_default")]
    pub window_size: i32,
    #[serde(default = "max_level_default")]
    pub max_level: i32,
    #[serde(default = "max_iterations_default")]
    pub max_iterations: i32,
    #[serde(default = "epsilon_default")]
    pub epsilon: f64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            minimum_distance: minimum_distance_default(),
            mask_columns: mask_columns_default(),
            max_corners: max_corners_default(),
            quality_level: quality_level_default(),
            feature_min_distance: feature_min_distance_default(),
            block_size: block_size_default(),
            window_size: window_size_default(),
            max_level: max_level_default(),
            max_iterations: max_iterations_default(),
            epsilon: epsilon_default(),
        }
    }
}

fn minimum_distance_default() -> f32 {
    5.0
}

fn mask_columns_default() -> Vec<(i32, i32)> {
    vec![(0, 20), (900, 1050)]
}

fn max_corners_default() -> i32 {
    100
}

fn quality_level_default() -> f64 {
    0.3
}

fn feature_min_distance_default() -> f64 {
    3.0
}

fn block_size_default() -> i32 {
    7
}

fn window_size_default() -> i32 {
    15
}

fn max_level_default() -> i32 {
    2
}

fn max_iterations_default() -> i32 {
    10
}

fn epsilon_default() -> f64 {
    0.03
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewSettings {
    /// Pixel corners of the visible pitch region, in the same order as the pitch corners
    /// `(0, width)`, `(0, 0)`, `(length, 0)`, `(length, width)`.
    #[serde(default = "pixel_vertices_default")]
    pub pixel_vertices: [[f32; 2]; 4],
    #[serde(default = "pitch_width_default")]
    pub pitch_width: f32,
    #[serde(default = "pitch_length_default")]
    pub pitch_length: f32,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            pixel_vertices: pixel_vertices_default(),
            pitch_width: pitch_width_default(),
            pitch_length: pitch_length_default(),
        }
    }
}

fn pixel_vertices_default() -> [[f32; 2]; 4] {
    [
        [110.0, 1035.0],
        [265.0, 275.0],
        [910.0, 260.0],
        [1640.0, 915.0],
    ]
}

fn pitch_width_default() -> f32 {
    68.0
}

fn pitch_length_default() -> f32 {
    23.32
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeedSettings {
    #[serde(default = "frame_window_default")]
    pub frame_window: usize,
    #[serde(default = "frame_rate_default")]
    pub frame_rate: f32,
}

impl Default for SpeedSettings {
    fn default() -> Self {
        Self {
            frame_window: frame_window_default(),
            frame_rate: frame_rate_default(),
        }
    }
}

fn frame_window_default() -> usize {
    5
}

fn frame_rate_default() -> f32 {
    24.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeamSettings {
    /// Number of k-means restarts for each clustering.
    #[serde(default = "kmeans_attempts_default")]
    pub kmeans_attempts: i32,
    /// Seed of the clustering random generator.
    #[serde(default)]
    pub seed: i32,
    /// Track ids whose team is forced instead of classified.
    #[serde(default)]
    pub overrides: BTreeMap<TrackId, Team>,
}

impl Default for TeamSettings {
    fn default() -> Self {
        Self {
            kmeans_attempts: kmeans_attempts_default(),
            seed: 0,
            overrides: BTreeMap::default(),
        }
    }
}

fn kmeans_attempts_default() -> i32 {
    10
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PossessionSettings {
    /// Pixel distance under which a player is considered in control of the ball.
    #[serde(default = "max_player_ball_distance_default")]
    pub max_player_ball_distance: f32,
    #[serde(default, deserialize_with = "deserialize_with_ok_or_default")]
    pub contact_point: ContactPoint,
}

impl Default for PossessionSettings {
    fn default() -> Self {
        Self {
            max_player_ball_distance: max_player_ball_distance_default(),
            contact_point: ContactPoint::default(),
        }
    }
}

fn max_player_ball_distance_default() -> f32 {
    70.0
}

/// The point of a player box measured against the ball center.
#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Serialize, Deserialize, EnumIter, Display, EnumString,
)]
pub enum ContactPoint {
    /// The closer of the bottom-left and bottom-right corners.
    #[default]
    Feet,
    BottomCenter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{
            "possession": { "max_player_ball_distance": 50.0, "contact_point": "Sideways" },
            "team": { "overrides": { "118": 1, "262": 2 } }
        }"#;

        let settings = serde_json::from_str::<Settings>(json).unwrap();

        assert_eq!(settings.possession.max_player_ball_distance, 50.0);
        assert_eq!(settings.possession.contact_point, ContactPoint::Feet);
        assert_eq!(settings.team.overrides.get(&118), Some(&Team::One));
        assert_eq!(settings.team.overrides.get(&262), Some(&Team::Two));
        assert_eq!(settings.team.kmeans_attempts, 10);
        assert_eq!(settings.detection, DetectionSettings::default());
        assert_eq!(settings.camera.mask_columns, vec![(0, 20), (900, 1050)]);
    }

    #[test]
    fn sample_config_parses() {
        let settings =
            serde_json::from_str::<Settings>(include_str!("../../../config/sample.json")).unwrap();

        assert_eq!(settings.team.overrides.len(), 2);
        assert_eq!(settings.view, ViewSettings::default());
        assert_eq!(settings.camera, CameraSettings::default());
        assert_eq!(settings.speed, SpeedSettings::default());
    }

    #[test]
    fn empty_json_is_default() {
        let settings = serde_json::from_str::<Settings>("{}").unwrap();

        assert_eq!(settings, Settings::default());
    }
}
