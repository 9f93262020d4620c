use std::collections::{BTreeMap, HashMap};

use anyhow::{Result, bail};
use log::{debug, info};
use opencv::core::{
    KMEANS_PP_CENTERS, Mat, MatTraitConst, Rect, TermCriteria, TermCriteria_Type, Vec3b, kmeans,
    set_rng_seed,
};

use crate::{
    models::TeamSettings,
    tracks::{BBox, Color, FrameTracks, Team, TrackId, Tracks},
};

const KMEANS_MAX_ITERATIONS: i32 = 300;
const KMEANS_EPSILON: f64 = 1e-4;
/// Team colors closer than this are the same jersey.
const MIN_TEAM_COLOR_DISTANCE: f32 = 1.0;

/// Two-team jersey color model with a per-track classification cache.
///
/// A track's team is decided the first time it is asked for and never changes afterwards.
#[derive(Debug)]
pub struct TeamAssigner {
    /// Jersey color of team 1 and team 2.
    team_colors: Option<[Color; 2]>,
    player_teams: HashMap<TrackId, Team>,
    overrides: BTreeMap<TrackId, Team>,
    attempts: i32,
    seed: i32,
}

impl TeamAssigner {
    pub fn new(settings: &TeamSettings) -> Self {
        Self {
            team_colors: None,
            player_teams: HashMap::new(),
            overrides: settings.overrides.clone(),
            attempts: settings.kmeans_attempts.max(1),
            seed: settings.seed,
        }
    }

    /// Builds the team color model from the players of a reference frame.
    pub fn assign(&mut self, frame: &Mat, players: &FrameTracks) -> Result<()> {
        if players.len() < 2 {
            bail!(
                "at least two players are needed to tell teams apart, found {}",
                players.len()
            );
        }
        set_rng_seed(self.seed)?;

        let colors = players
            .values()
            .map(|track| self.player_color(frame, track.bbox))
            .collect::<Result<Vec<_>>>()?;
        let centers = self.cluster(&colors)?.1;
        debug!(target: "team", "team colors {centers:?}");
        if squared_distance(centers[0], centers[1]) < MIN_TEAM_COLOR_DISTANCE.powi(2) {
            bail!("players all wear the same color {:?}", centers[0]);
        }

        self.team_colors = Some(centers);
        Ok(())
    }

    pub fn team_color(&self, team: Team) -> Option<Color> {
        let colors = self.team_colors?;
        Some(match team {
            Team::One => colors[0],
            Team::Two => colors[1],
        })
    }

    /// Gets the team of the player `id` with box `bbox` in `frame`.
    ///
    /// The first answer for a track is cached and returned on every later call.
    pub fn player_team(&mut self, frame: &Mat, bbox: BBox, id: TrackId) -> Result<Team> {
        if let Some(team) = self.player_teams.get(&id) {
            return Ok(*team);
        }
        if let Some(team) = self.overrides.get(&id).copied() {
            debug!(target: "team", "player {id} forced to {team}");
            self.player_teams.insert(id, team);
            return Ok(team);
        }

        let Some([first, second]) = self.team_colors else {
            bail!("team colors are not assigned yet");
        };
        let color = self.player_color(frame, bbox)?;
        let team = if squared_distance(color, first) <= squared_distance(color, second) {
            Team::One
        } else {
            Team::Two
        };
        self.player_teams.insert(id, team);
        Ok(team)
    }

    /// Builds the model from the first frame with players then sets `team` and `team_color` of
    /// every player.
    ///
    /// Reads `bbox`, writes `team` and `team_color`.
    pub fn assign_teams(&mut self, frames: &[Mat], tracks: &mut Tracks) -> Result<()> {
        let Some(reference) = tracks.players.iter().position(|players| !players.is_empty())
        else {
            bail!("no player detected in any frame");
        };
        let Some(frame) = frames.get(reference) else {
            bail!("no frame {reference} for {} frames", frames.len());
        };
        info!(target: "team", "using frame {reference} as team reference");
        self.assign(frame, &tracks.players[reference])?;

        for (frame, players) in frames.iter().zip(tracks.players.iter_mut()) {
            for (id, track) in players.iter_mut() {
                let team = self.player_team(frame, track.bbox, *id)?;
                track.team = Some(team);
                track.team_color = self.team_color(team);
            }
        }
        Ok(())
    }

    /// Extracts the jersey color of the player inside `bbox`.
    ///
    /// The top half of the box is split in two color clusters. The cluster holding most of the
    /// four corners is the background, the other one is the jersey.
    fn player_color(&self, frame: &Mat, bbox: BBox) -> Result<Color> {
        let crop = top_half(frame, bbox)?;
        let (rows, cols) = (crop.rows() as usize, crop.cols() as usize);
        let mut pixels = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                let pixel = crop.at_2d::<Vec3b>(row as i32, col as i32)?;
                pixels.push([pixel[0] as f32, pixel[1] as f32, pixel[2] as f32]);
            }
        }
        if pixels.len() < 2 {
            bail!("player crop {bbox:?} is too small to extract a color");
        }

        let (labels, centers) = self.cluster(&pixels)?;
        let corners = [
            labels[0],
            labels[cols - 1],
            labels[(rows - 1) * cols],
            labels[rows * cols - 1],
        ];
        let background = background_cluster(corners);
        Ok(centers[1 - background])
    }

    /// Splits `samples` in two clusters.
    ///
    /// Returns the cluster of each sample and the two cluster centers.
    fn cluster(&self, samples: &[Color]) -> Result<(Vec<usize>, [Color; 2])> {
        if samples.len() < 2 {
            bail!("cannot split {} colors into two clusters", samples.len());
        }
        let data = Mat::from_slice_2d(samples)?;
        let mut labels = Mat::default();
        let mut centers = Mat::default();
        let criteria = TermCriteria::new(
            TermCriteria_Type::COUNT as i32 | TermCriteria_Type::EPS as i32,
            KMEANS_MAX_ITERATIONS,
            KMEANS_EPSILON,
        )?;
        kmeans(
            &data,
            2,
            &mut labels,
            criteria,
            self.attempts,
            KMEANS_PP_CENTERS,
            &mut centers,
        )?;
        if centers.rows() != 2 || centers.cols() != 3 {
            bail!("clustering produced {}x{} centers", centers.rows(), centers.cols());
        }

        let labels = (0..samples.len())
            .map(|i| Ok(*labels.at::<i32>(i as i32)? as usize))
            .collect::<Result<Vec<_>>>()?;
        let mut colors = [[0.0; 3]; 2];
        for (row, color) in colors.iter_mut().enumerate() {
            for (col, channel) in color.iter_mut().enumerate() {
                *channel = *centers.at_2d::<f32>(row as i32, col as i32)?;
            }
        }
        Ok((labels, colors))
    }
}

/// Picks the cluster of the majority of `corners`.
///
/// A 2-2 split goes to the cluster of the top-left corner, not to a fixed cluster index.
fn background_cluster(corners: [usize; 4]) -> usize {
    let ones = corners.iter().filter(|label| **label == 1).count();
    match ones.cmp(&2) {
        std::cmp::Ordering::Greater => 1,
        std::cmp::Ordering::Less => 0,
        std::cmp::Ordering::Equal => corners[0],
    }
}

fn top_half(frame: &Mat, bbox: BBox) -> Result<Mat> {
    let rect = bbox.to_rect();
    let x1 = rect.x.clamp(0, frame.cols());
    let y1 = rect.y.clamp(0, frame.rows());
    let x2 = (rect.x + rect.width).clamp(0, frame.cols());
    let y2 = (rect.y + rect.height / 2).clamp(0, frame.rows());
    if x2 <= x1 || y2 <= y1 {
        bail!("player box {bbox:?} has no pixel inside the frame");
    }
    Ok(frame.roi(Rect::new(x1, y1, x2 - x1, y2 - y1))?.clone_pointee())
}

fn squared_distance(a: Color, b: Color) -> f32 {
    a.iter().zip(b).map(|(a, b)| (a - b) * (a - b)).sum()
}

#[cfg(test)]
mod tests {
    use opencv::{
        core::{CV_8UC3, Scalar},
        imgproc::{self, FILLED, LINE_8},
    };

    use super::*;
    use crate::tracks::TrackAttributes;

    const RED: [f64; 3] = [0.0, 0.0, 255.0];
    const BLUE: [f64; 3] = [255.0, 0.0, 0.0];
    const GREEN: [f64; 3] = [0.0, 160.0, 0.0];

    fn scalar(color: [f64; 3]) -> Scalar {
        Scalar::new(color[0], color[1], color[2], 0.0)
    }

    fn player_box(x: f32) -> BBox {
        BBox::new(x, 20.0, x + 20.0, 60.0)
    }

    /// Draws one player per `(x, jersey)` on a grass frame.
    fn frame(players: &[(f32, [f64; 3])]) -> Mat {
        let mut frame =
            Mat::new_rows_cols_with_default(100, 300, CV_8UC3, scalar(GREEN)).unwrap();
        for (x, jersey) in players {
            let bbox = player_box(*x);
            imgproc::rectangle(
                &mut frame,
                Rect::new(bbox.x1 as i32 + 5, bbox.y1 as i32 + 5, 10, 30),
                scalar(*jersey),
                FILLED,
                LINE_8,
                0,
            )
            .unwrap();
        }
        frame
    }

    fn players(xs: &[f32]) -> FrameTracks {
        xs.iter()
            .enumerate()
            .map(|(i, x)| (i as TrackId + 1, TrackAttributes::new(player_box(*x))))
            .collect()
    }

    fn color_of(color: [f64; 3]) -> Color {
        [color[0] as f32, color[1] as f32, color[2] as f32]
    }

    fn assigned(xs: &[f32], jerseys: &[[f64; 3]]) -> (TeamAssigner, Mat) {
        let frame = frame(&xs.iter().copied().zip(jerseys.iter().copied()).collect::<Vec<_>>());
        let mut assigner = TeamAssigner::new(&TeamSettings::default());
        assigner.assign(&frame, &players(xs)).unwrap();
        (assigner, frame)
    }

    #[test]
    fn assign_finds_both_jersey_colors() {
        let (assigner, _) = assigned(&[10.0, 60.0, 110.0, 160.0], &[RED, BLUE, RED, BLUE]);

        let mut colors = [
            assigner.team_color(Team::One).unwrap(),
            assigner.team_color(Team::Two).unwrap(),
        ];
        colors.sort_by(|a, b| a[0].total_cmp(&b[0]));

        assert!(squared_distance(colors[0], color_of(RED)) < 1.0);
        assert!(squared_distance(colors[1], color_of(BLUE)) < 1.0);
    }

    #[test]
    fn player_team_groups_same_jersey() {
        let xs = [10.0, 60.0, 110.0, 160.0];
        let (mut assigner, frame) = assigned(&xs, &[RED, BLUE, RED, BLUE]);

        let teams = xs
            .iter()
            .enumerate()
            .map(|(i, x)| assigner.player_team(&frame, player_box(*x), i as TrackId + 1))
            .collect::<Result<Vec<_>>>()
            .unwrap();

        assert_eq!(teams[0], teams[2]);
        assert_eq!(teams[1], teams[3]);
        assert_ne!(teams[0], teams[1]);
    }

    #[test]
    fn player_team_is_cached() {
        let (mut assigner, red_frame) = assigned(&[10.0, 60.0], &[RED, BLUE]);
        let blue_frame = frame(&[(10.0, BLUE)]);

        let first = assigner.player_team(&red_frame, player_box(10.0), 42).unwrap();
        let second = assigner.player_team(&blue_frame, player_box(10.0), 42).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn player_team_prefers_override() {
        let frame = frame(&[(10.0, RED), (60.0, BLUE)]);
        let mut assigner = TeamAssigner::new(&TeamSettings {
            overrides: BTreeMap::from([(7, Team::Two), (8, Team::One)]),
            ..TeamSettings::default()
        });
        assigner.assign(&frame, &players(&[10.0, 60.0])).unwrap();

        let red = assigner.player_team(&frame, player_box(10.0), 1).unwrap();
        let forced = if red == Team::One { Team::Two } else { Team::One };
        let id = if forced == Team::Two { 7 } else { 8 };

        assert_eq!(assigner.player_team(&frame, player_box(10.0), id).unwrap(), forced);
    }

    #[test]
    fn assign_fails_with_single_jersey_color() {
        let frame = frame(&[(10.0, RED), (60.0, RED), (110.0, RED)]);
        let mut assigner = TeamAssigner::new(&TeamSettings::default());

        assert!(assigner.assign(&frame, &players(&[10.0, 60.0, 110.0])).is_err());
        assert_eq!(assigner.team_color(Team::One), None);
    }

    #[test]
    fn assign_fails_with_single_player() {
        let frame = frame(&[(10.0, RED)]);
        let mut assigner = TeamAssigner::new(&TeamSettings::default());

        assert!(assigner.assign(&frame, &players(&[10.0])).is_err());
    }

    #[test]
    fn assign_teams_uses_first_frame_with_players() {
        let xs = [10.0, 60.0];
        let frames = vec![frame(&[]), frame(&[(10.0, RED), (60.0, BLUE)])];
        let mut tracks = Tracks::with_frame_count(2);
        tracks.players[1] = players(&xs);
        let mut assigner = TeamAssigner::new(&TeamSettings::default());

        assigner.assign_teams(&frames, &mut tracks).unwrap();

        let first = &tracks.players[1][&1];
        let second = &tracks.players[1][&2];
        assert!(first.team.is_some() && second.team.is_some());
        assert_ne!(first.team, second.team);
        assert_eq!(first.team_color, assigner.team_color(first.team.unwrap()));
    }

    #[test]
    fn background_cluster_breaks_tie_with_top_left() {
        assert_eq!(background_cluster([1, 1, 1, 0]), 1);
        assert_eq!(background_cluster([0, 1, 0, 0]), 0);
        assert_eq!(background_cluster([1, 0, 0, 1]), 1);
        assert_eq!(background_cluster([0, 1, 1, 0]), 0);
    }
}
