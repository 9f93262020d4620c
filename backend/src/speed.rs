use std::collections::HashMap;

use log::debug;

use crate::{
    models::SpeedSettings,
    tracks::{TrackId, Tracks},
};

const METERS_PER_SECOND_TO_KM_PER_HOUR: f32 = 3.6;

/// Computes player speed and covered distance from pitch positions over fixed frame windows.
#[derive(Debug)]
pub struct SpeedDistanceEstimator {
    frame_window: usize,
    frame_rate: f32,
}

impl SpeedDistanceEstimator {
    pub fn new(settings: &SpeedSettings) -> Self {
        Self {
            frame_window: settings.frame_window.max(1),
            frame_rate: settings.frame_rate,
        }
    }

    /// Sets `speed` and cumulative `distance` of players.
    ///
    /// For each window, a player present with a pitch position at both the first and the last
    /// frame gets the window's average speed written to every frame of the window it appears in.
    /// Windows where either end is missing are skipped and the total carries over.
    ///
    /// Reads `position_transformed`, writes `speed` and `distance`.
    pub fn add_speed_and_distance(&self, tracks: &mut Tracks) {
        let players = &mut tracks.players;
        let frame_count = players.len();
        let mut total_distance = HashMap::<TrackId, f32>::new();

        for start in (0..frame_count).step_by(self.frame_window) {
            let end = (start + self.frame_window).min(frame_count.saturating_sub(1));
            if end <= start {
                continue;
            }
            let elapsed = (end - start) as f32 / self.frame_rate;

            let windows = players[start]
                .iter()
                .filter_map(|(id, track)| {
                    let from = track.position_transformed?;
                    let to = players[end].get(id)?.position_transformed?;
                    Some((*id, (to.x - from.x).hypot(to.y - from.y)))
                })
                .collect::<Vec<_>>();

            for (id, distance) in windows {
                let speed = distance / elapsed * METERS_PER_SECOND_TO_KM_PER_HOUR;
                let total = total_distance.entry(id).or_default();
                *total += distance;
                let total = *total;

                for frame in &mut players[start..end] {
                    if let Some(track) = frame.get_mut(&id) {
                        track.speed = Some(speed);
                        track.distance = Some(total);
                    }
                }
            }
        }
        debug!(target: "speed", "computed distance of {} players", total_distance.len());
    }
}

#[cfg(test)]
mod tests {
    use opencv::core::Point2f;

    use super::*;
    use crate::tracks::{BBox, TrackAttributes};

    fn at(x: f32, y: f32) -> TrackAttributes {
        let mut track = TrackAttributes::new(BBox::default());
        track.position_transformed = Some(Point2f::new(x, y));
        track
    }

    fn estimator() -> SpeedDistanceEstimator {
        SpeedDistanceEstimator::new(&SpeedSettings::default())
    }

    #[test]
    fn add_speed_and_distance_ten_units_over_window() {
        let mut tracks = Tracks::with_frame_count(6);
        for frame in 0..6 {
            tracks.players[frame].insert(7, at(frame as f32 * 2.0, 0.0));
        }

        estimator().add_speed_and_distance(&mut tracks);

        let expected = 10.0 / (5.0 / 24.0) * 3.6;
        for frame in 0..5 {
            let track = &tracks.players[frame][&7];
            assert!((track.speed.unwrap() - expected).abs() < 1e-3);
            assert!((track.distance.unwrap() - 10.0).abs() < 1e-4);
        }
        assert_eq!(tracks.players[5][&7].speed, None);
    }

    #[test]
    fn add_speed_and_distance_accumulates_across_windows() {
        let mut tracks = Tracks::with_frame_count(11);
        for frame in 0..11 {
            tracks.players[frame].insert(7, at(0.0, frame as f32));
        }

        estimator().add_speed_and_distance(&mut tracks);

        assert!((tracks.players[4][&7].distance.unwrap() - 5.0).abs() < 1e-4);
        assert!((tracks.players[9][&7].distance.unwrap() - 10.0).abs() < 1e-4);
    }

    #[test]
    fn add_speed_and_distance_skips_window_with_missing_end() {
        let mut tracks = Tracks::with_frame_count(21);
        for frame in 0..21 {
            let mut track = at(0.0, frame as f32);
            if frame == 10 {
                track.position_transformed = None;
            }
            tracks.players[frame].insert(7, track);
        }

        estimator().add_speed_and_distance(&mut tracks);

        assert!((tracks.players[0][&7].distance.unwrap() - 5.0).abs() < 1e-4);
        assert_eq!(tracks.players[5][&7].speed, None);
        assert_eq!(tracks.players[10][&7].speed, None);
        assert!((tracks.players[15][&7].distance.unwrap() - 10.0).abs() < 1e-4);
    }

    #[test]
    fn add_speed_and_distance_ignores_referees_and_ball() {
        let mut tracks = Tracks::with_frame_count(6);
        for frame in 0..6 {
            tracks.referees[frame].insert(3, at(frame as f32, 0.0));
        }

        estimator().add_speed_and_distance(&mut tracks);

        assert!(tracks.referees.iter().all(|frame| frame[&3].speed.is_none()));
    }
}
