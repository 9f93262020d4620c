use log::debug;
use opencv::core::Point2f;

use crate::{
    models::{ContactPoint, PossessionSettings},
    tracks::{BBox, FrameTracks, Team, TrackId, Tracks},
};

/// Assigns the ball to the closest player within reach.
#[derive(Debug)]
pub struct PlayerBallAssigner {
    max_player_ball_distance: f32,
    contact_point: ContactPoint,
}

impl PlayerBallAssigner {
    pub fn new(settings: &PossessionSettings) -> Self {
        Self {
            max_player_ball_distance: settings.max_player_ball_distance,
            contact_point: settings.contact_point,
        }
    }

    /// Finds the player of `players` closest to the center of `ball`.
    ///
    /// Returns `None` if no player is strictly closer than the configured distance.
    pub fn assign_ball_to_player(&self, players: &FrameTracks, ball: BBox) -> Option<TrackId> {
        let ball = ball.center();
        players
            .iter()
            .map(|(id, track)| (*id, self.distance(track.bbox, ball)))
            .filter(|(_, distance)| *distance < self.max_player_ball_distance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Marks the player with the ball in every frame and returns the team in control per frame.
    ///
    /// A frame without a ball, without a player in reach or with a player without team keeps
    /// the team of the previous frame. Frames before the first possession have no team.
    ///
    /// Reads `bbox` and `team`, writes `has_ball`.
    pub fn assign_possession(&self, tracks: &mut Tracks) -> Vec<Option<Team>> {
        let mut team_control = Vec::with_capacity(tracks.frame_count());
        let mut last_team = None;

        for frame in 0..tracks.frame_count() {
            let assigned = tracks
                .ball_bbox(frame)
                .and_then(|ball| self.assign_ball_to_player(&tracks.players[frame], ball));
            if let Some(track) = assigned.and_then(|id| tracks.players[frame].get_mut(&id)) {
                track.has_ball = true;
                if track.team.is_some() {
                    last_team = track.team;
                }
            }
            team_control.push(last_team);
        }
        debug!(
            target: "possession",
            "ball assigned in {} frames",
            tracks
                .players
                .iter()
                .filter(|players| players.values().any(|track| track.has_ball))
                .count()
        );
        team_control
    }

    fn distance(&self, player: BBox, ball: Point2f) -> f32 {
        let distance = |point: Point2f| (point.x - ball.x).hypot(point.y - ball.y);
        match self.contact_point {
            ContactPoint::Feet => {
                distance(player.bottom_left()).min(distance(player.bottom_right()))
            }
            ContactPoint::BottomCenter => distance(player.foot()),
        }
    }
}

/// Running ball control share of team 1 and team 2 in percent, one entry per frame.
///
/// The share at frame `i` counts frames `0..=i` with a team in control. Both shares are zero
/// while no team had the ball yet.
pub fn control_percentages(team_control: &[Option<Team>]) -> Vec<[f32; 2]> {
    let mut counts = [0u32; 2];
    team_control
        .iter()
        .map(|team| {
            match team {
                Some(Team::One) => counts[0] += 1,
                Some(Team::Two) => counts[1] += 1,
                None => (),
            }
            let total = counts[0] + counts[1];
            if total == 0 {
                [0.0, 0.0]
            } else {
                [
                    counts[0] as f32 * 100.0 / total as f32,
                    counts[1] as f32 * 100.0 / total as f32,
                ]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracks::{BALL_TRACK_ID, TrackAttributes};

    const BALL: BBox = BBox {
        x1: 495.0,
        y1: 495.0,
        x2: 505.0,
        y2: 505.0,
    };

    /// A player whose closer foot is `distance` pixels right of the ball center.
    fn player(distance: f32, team: Team) -> TrackAttributes {
        let mut track = TrackAttributes::new(BBox::new(
            500.0 + distance,
            420.0,
            520.0 + distance,
            500.0,
        ));
        track.team = Some(team);
        track
    }

    fn assigner() -> PlayerBallAssigner {
        PlayerBallAssigner::new(&PossessionSettings::default())
    }

    fn tracks_with(frames: Vec<FrameTracks>, ball: &[bool]) -> Tracks {
        let mut tracks = Tracks::with_frame_count(frames.len());
        tracks.players = frames;
        for (frame, has_ball) in ball.iter().enumerate() {
            if *has_ball {
                tracks.ball[frame].insert(BALL_TRACK_ID, TrackAttributes::new(BALL));
            }
        }
        tracks
    }

    #[test]
    fn assign_ball_to_player_picks_closest_in_reach() {
        let players = FrameTracks::from([
            (1, player(80.0, Team::One)),
            (2, player(65.0, Team::Two)),
            (3, player(90.0, Team::One)),
        ]);

        assert_eq!(assigner().assign_ball_to_player(&players, BALL), Some(2));
    }

    #[test]
    fn assign_ball_to_player_none_out_of_reach() {
        let players = FrameTracks::from([
            (1, player(80.0, Team::One)),
            (2, player(90.0, Team::Two)),
            (3, player(95.0, Team::One)),
            (4, player(70.0, Team::One)),
        ]);

        assert_eq!(assigner().assign_ball_to_player(&players, BALL), None);
    }

    #[test]
    fn assign_ball_to_player_bottom_center() {
        let assigner = PlayerBallAssigner::new(&PossessionSettings {
            contact_point: ContactPoint::BottomCenter,
            ..PossessionSettings::default()
        });
        // Feet at 60 and 80, bottom center at 70
        let players = FrameTracks::from([(1, player(60.0, Team::One))]);

        assert_eq!(assigner.assign_ball_to_player(&players, BALL), None);
    }

    #[test]
    fn assign_possession_repeats_previous_team() {
        let close = FrameTracks::from([
            (1, player(80.0, Team::One)),
            (2, player(65.0, Team::Two)),
        ]);
        let far = FrameTracks::from([
            (1, player(80.0, Team::One)),
            (2, player(90.0, Team::Two)),
        ]);
        let mut tracks = tracks_with(
            vec![far.clone(), close, far.clone(), far],
            &[true, true, true, false],
        );

        let team_control = assigner().assign_possession(&mut tracks);

        assert_eq!(team_control, vec![None, Some(Team::Two), Some(Team::Two), Some(Team::Two)]);
        assert!(tracks.players[1][&2].has_ball);
        assert!(!tracks.players[1][&1].has_ball);
        assert!(tracks.players[2].values().all(|track| !track.has_ball));
    }

    #[test]
    fn control_percentages_counts_known_frames_only() {
        let team_control = [None, Some(Team::One), Some(Team::Two), Some(Team::Two)];

        let shares = control_percentages(&team_control);

        assert_eq!(shares[0], [0.0, 0.0]);
        assert_eq!(shares[1], [100.0, 0.0]);
        assert_eq!(shares[2], [50.0, 50.0]);
        assert!((shares[3][0] - 100.0 / 3.0).abs() < 1e-4);
        assert!((shares[3][1] - 200.0 / 3.0).abs() < 1e-4);
    }
}
