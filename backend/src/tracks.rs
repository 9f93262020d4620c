use std::collections::BTreeMap;

use opencv::core::{Point, Point2f, Rect};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// Stable identifier of one tracked entity across frames.
pub type TrackId = u64;

/// The only key used in the ball timeline.
pub const BALL_TRACK_ID: TrackId = 1;

/// An axis-aligned bounding box in pixel space as `(left, top, right, bottom)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    #[inline]
    pub fn center(&self) -> Point2f {
        Point2f::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Bottom-center of the box, used as the ground contact of a person.
    #[inline]
    pub fn foot(&self) -> Point2f {
        Point2f::new((self.x1 + self.x2) / 2.0, self.y2)
    }

    #[inline]
    pub fn bottom_left(&self) -> Point2f {
        Point2f::new(self.x1, self.y2)
    }

    #[inline]
    pub fn bottom_right(&self) -> Point2f {
        Point2f::new(self.x2, self.y2)
    }

    /// Linearly interpolates every coordinate towards `other` by `t` in `[0, 1]`.
    pub fn lerp(&self, other: &BBox, t: f32) -> BBox {
        let lerp = |a: f32, b: f32| a + (b - a) * t;
        BBox {
            x1: lerp(self.x1, other.x1),
            y1: lerp(self.y1, other.y1),
            x2: lerp(self.x2, other.x2),
            y2: lerp(self.y2, other.y2),
        }
    }

    pub fn to_rect(&self) -> Rect {
        Rect::from_points(
            Point::new(self.x1 as i32, self.y1 as i32),
            Point::new(self.x2 as i32, self.y2 as i32),
        )
    }
}

/// One of the two teams on the pitch.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Team {
    #[strum(to_string = "Team 1")]
    One,
    #[strum(to_string = "Team 2")]
    Two,
}

impl Team {
    pub fn id(self) -> u8 {
        match self {
            Team::One => 1,
            Team::Two => 2,
        }
    }
}

impl TryFrom<u8> for Team {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Team::One),
            2 => Ok(Team::Two),
            _ => Err(format!("invalid team {value}, expected 1 or 2")),
        }
    }
}

impl From<Team> for u8 {
    fn from(value: Team) -> Self {
        value.id()
    }
}

/// A color in BGR channel order.
pub type Color = [f32; 3];

/// Attributes of one entity in one frame.
///
/// Fields are filled progressively by the pipeline stages. Only `bbox` is set at detection
/// time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackAttributes {
    pub bbox: BBox,
    /// Pixel anchor: the box center for the ball, the foot position otherwise.
    pub position: Option<Point2f>,
    /// `position` minus the camera movement of the frame.
    pub position_adjusted: Option<Point2f>,
    /// Pitch coordinates, `None` outside the calibrated region.
    pub position_transformed: Option<Point2f>,
    pub team: Option<Team>,
    pub team_color: Option<Color>,
    pub has_ball: bool,
    /// Speed in km/h.
    pub speed: Option<f32>,
    /// Cumulative distance in pitch units.
    pub distance: Option<f32>,
}

impl TrackAttributes {
    pub fn new(bbox: BBox) -> Self {
        Self {
            bbox,
            ..Self::default()
        }
    }
}

pub type FrameTracks = BTreeMap<TrackId, TrackAttributes>;

/// One entry per frame.
pub type Timeline = Vec<FrameTracks>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Players,
    Referees,
    Ball,
}

/// The three parallel timelines of a match.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tracks {
    pub players: Timeline,
    pub referees: Timeline,
    pub ball: Timeline,
}

impl Tracks {
    /// Creates timelines with `frame_count` empty frames each.
    pub fn with_frame_count(frame_count: usize) -> Self {
        Self {
            players: vec![FrameTracks::new(); frame_count],
            referees: vec![FrameTracks::new(); frame_count],
            ball: vec![FrameTracks::new(); frame_count],
        }
    }

    pub fn frame_count(&self) -> usize {
        self.players.len()
    }

    /// Iterates every entity of every frame mutably, with its kind and frame index.
    pub fn entities_mut(
        &mut self,
    ) -> impl Iterator<Item = (EntityKind, usize, &mut TrackAttributes)> + '_ {
        [
            (EntityKind::Players, &mut self.players),
            (EntityKind::Referees, &mut self.referees),
            (EntityKind::Ball, &mut self.ball),
        ]
        .into_iter()
        .flat_map(|(kind, timeline)| {
            timeline
                .iter_mut()
                .enumerate()
                .flat_map(move |(frame, tracks)| {
                    tracks.values_mut().map(move |track| (kind, frame, track))
                })
        })
    }

    pub fn ball_bbox(&self, frame: usize) -> Option<BBox> {
        self.ball
            .get(frame)
            .and_then(|tracks| tracks.get(&BALL_TRACK_ID))
            .map(|track| track.bbox)
    }

    /// Sets `position` of every entity from its box.
    ///
    /// Reads `bbox`, writes `position`.
    pub fn add_positions(&mut self) {
        for (kind, _, track) in self.entities_mut() {
            track.position = Some(match kind {
                EntityKind::Ball => track.bbox.center(),
                EntityKind::Players | EntityKind::Referees => track.bbox.foot(),
            });
        }
    }

    pub(crate) fn is_consistent(&self) -> bool {
        self.players.len() == self.referees.len()
            && self.players.len() == self.ball.len()
            && self
                .ball
                .iter()
                .all(|tracks| tracks.keys().all(|id| *id == BALL_TRACK_ID))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_anchors() {
        let bbox = BBox::new(10.0, 20.0, 30.0, 60.0);

        assert_eq!(bbox.center(), Point2f::new(20.0, 40.0));
        assert_eq!(bbox.foot(), Point2f::new(20.0, 60.0));
        assert_eq!(bbox.bottom_left(), Point2f::new(10.0, 60.0));
        assert_eq!(bbox.bottom_right(), Point2f::new(30.0, 60.0));
        assert_eq!(bbox.to_rect(), Rect::new(10, 20, 20, 40));
    }

    #[test]
    fn bbox_lerp_halfway() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(10.0, 20.0, 30.0, 40.0);

        assert_eq!(a.lerp(&b, 0.5), BBox::new(5.0, 10.0, 20.0, 25.0));
    }

    #[test]
    fn team_try_from_rejects_unknown() {
        assert_eq!(Team::try_from(1), Ok(Team::One));
        assert_eq!(Team::try_from(2), Ok(Team::Two));
        assert!(Team::try_from(0).is_err());
    }

    #[test]
    fn add_positions_uses_center_for_ball_and_foot_otherwise() {
        let bbox = BBox::new(0.0, 0.0, 10.0, 20.0);
        let mut tracks = Tracks::with_frame_count(1);
        tracks.players[0].insert(4, TrackAttributes::new(bbox));
        tracks.referees[0].insert(9, TrackAttributes::new(bbox));
        tracks.ball[0].insert(BALL_TRACK_ID, TrackAttributes::new(bbox));

        tracks.add_positions();

        assert_eq!(tracks.players[0][&4].position, Some(Point2f::new(5.0, 20.0)));
        assert_eq!(tracks.referees[0][&9].position, Some(Point2f::new(5.0, 20.0)));
        assert_eq!(
            tracks.ball[0][&BALL_TRACK_ID].position,
            Some(Point2f::new(5.0, 10.0))
        );
    }

    #[test]
    fn with_frame_count_keeps_timelines_aligned() {
        let tracks = Tracks::with_frame_count(7);

        assert_eq!(tracks.frame_count(), 7);
        assert!(tracks.is_consistent());
        assert_eq!(tracks.ball_bbox(3), None);
    }
}
