use anyhow::{Result, bail};
use opencv::{
    core::{Mat, MatTraitConst, Point, Rect, Scalar, Size, Vector, add_weighted},
    imgproc::{
        FILLED, FONT_HERSHEY_SIMPLEX, LINE_4, LINE_8, ellipse, fill_poly_def, polylines, put_text,
        rectangle,
    },
};

use crate::{
    camera::CameraMovement,
    possession::control_percentages,
    tracks::{BBox, Color, Team, TrackAttributes, TrackId, Tracks},
};

const BLACK: Color = [0.0, 0.0, 0.0];
const WHITE: Color = [255.0, 255.0, 255.0];
const RED: Color = [0.0, 0.0, 255.0];
const GREEN: Color = [0.0, 255.0, 0.0];
const YELLOW: Color = [0.0, 255.0, 255.0];

const CONTROL_PANEL_ALPHA: f64 = 0.4;
const CAMERA_PANEL_ALPHA: f64 = 0.6;

/// Draws tracks, ball control and camera movement on copies of `frames`.
///
/// `tracks`, `team_control` and `movements` must have one entry per frame.
pub fn draw_annotations(
    frames: &[Mat],
    tracks: &Tracks,
    team_control: &[Option<Team>],
    movements: &[CameraMovement],
) -> Result<Vec<Mat>> {
    if !tracks.is_consistent() || tracks.frame_count() != frames.len() {
        bail!(
            "{} frames to draw but tracks cover {} frames",
            frames.len(),
            tracks.frame_count()
        );
    }
    let shares = control_percentages(team_control);

    frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            let mut frame = frame.try_clone()?;
            for (id, track) in &tracks.players[i] {
                draw_player(&mut frame, *id, track)?;
            }
            for track in tracks.referees[i].values() {
                draw_ellipse(&mut frame, track.bbox, to_scalar(YELLOW), None)?;
            }
            for track in tracks.ball[i].values() {
                draw_triangle(&mut frame, track.bbox, to_scalar(GREEN))?;
            }
            if let Some(share) = shares.get(i) {
                draw_team_ball_control(&mut frame, *share)?;
            }
            if let Some(movement) = movements.get(i) {
                draw_camera_movement(&mut frame, *movement)?;
            }
            Ok(frame)
        })
        .collect()
}

fn draw_player(frame: &mut Mat, id: TrackId, track: &TrackAttributes) -> Result<()> {
    let color = to_scalar(track.team_color.unwrap_or(RED));
    draw_ellipse(frame, track.bbox, color, Some(id))?;
    if track.has_ball {
        draw_triangle(frame, track.bbox, to_scalar(RED))?;
    }

    let (Some(speed), Some(distance)) = (track.speed, track.distance) else {
        return Ok(());
    };
    let foot = track.bbox.foot();
    let origin = Point::new(foot.x as i32, foot.y as i32 + 40);
    put_text(
        frame,
        &format!("{speed:.2} km/h"),
        origin,
        FONT_HERSHEY_SIMPLEX,
        0.5,
        to_scalar(BLACK),
        2,
        LINE_8,
        false,
    )?;
    put_text(
        frame,
        &format!("{distance:.2} m"),
        origin + Point::new(0, 20),
        FONT_HERSHEY_SIMPLEX,
        0.5,
        to_scalar(BLACK),
        2,
        LINE_8,
        false,
    )?;
    Ok(())
}

/// Draws a ground ellipse under `bbox` with an optional id label.
fn draw_ellipse(frame: &mut Mat, bbox: BBox, color: Scalar, id: Option<TrackId>) -> Result<()> {
    let y2 = bbox.y2 as i32;
    let x_center = bbox.center().x as i32;
    let width = bbox.width();

    ellipse(
        frame,
        Point::new(x_center, y2),
        Size::new(width as i32, (0.35 * width) as i32),
        0.0,
        -45.0,
        235.0,
        color,
        2,
        LINE_4,
        0,
    )?;

    let Some(id) = id else {
        return Ok(());
    };
    let label = Rect::new(x_center - 20, y2 + 5, 40, 20);
    rectangle(frame, label, color, FILLED, LINE_8, 0)?;
    let mut text_x = label.x + 12;
    if id > 99 {
        text_x -= 10;
    }
    put_text(
        frame,
        &id.to_string(),
        Point::new(text_x, label.y + 15),
        FONT_HERSHEY_SIMPLEX,
        0.6,
        to_scalar(BLACK),
        2,
        LINE_8,
        false,
    )?;
    Ok(())
}

/// Draws a downward triangle above `bbox`.
fn draw_triangle(frame: &mut Mat, bbox: BBox, color: Scalar) -> Result<()> {
    let y = bbox.y1 as i32;
    let x = bbox.center().x as i32;
    let triangle = Vector::<Vector<Point>>::from_iter([Vector::from_iter([
        Point::new(x, y),
        Point::new(x - 10, y - 20),
        Point::new(x + 10, y - 20),
    ])]);

    fill_poly_def(frame, &triangle, color)?;
    polylines(frame, &triangle, true, to_scalar(BLACK), 2, LINE_8, 0)?;
    Ok(())
}

fn draw_team_ball_control(frame: &mut Mat, share: [f32; 2]) -> Result<()> {
    let (width, height) = (frame.cols(), frame.rows());
    let panel = Rect::new(width - 570, height - 230, 550, 120);
    blend_panel(frame, panel, CONTROL_PANEL_ALPHA)?;

    for (i, (team, share)) in [Team::One, Team::Two].into_iter().zip(share).enumerate() {
        put_text(
            frame,
            &format!("{team} Ball Control: {share:.2}%"),
            Point::new(panel.x + 50, panel.y + 50 + 50 * i as i32),
            FONT_HERSHEY_SIMPLEX,
            1.0,
            to_scalar(BLACK),
            3,
            LINE_8,
            false,
        )?;
    }
    Ok(())
}

fn draw_camera_movement(frame: &mut Mat, movement: CameraMovement) -> Result<()> {
    blend_panel(frame, Rect::new(0, 0, 500, 100), CAMERA_PANEL_ALPHA)?;

    for (i, (axis, value)) in [("X", movement.dx), ("Y", movement.dy)].into_iter().enumerate() {
        put_text(
            frame,
            &format!("Camera Movement {axis}: {value:.2}"),
            Point::new(10, 30 + 30 * i as i32),
            FONT_HERSHEY_SIMPLEX,
            1.0,
            to_scalar(BLACK),
            3,
            LINE_8,
            false,
        )?;
    }
    Ok(())
}

/// Blends a white `panel` over `frame` with opacity `alpha`.
fn blend_panel(frame: &mut Mat, panel: Rect, alpha: f64) -> Result<()> {
    let mut overlay = frame.try_clone()?;
    rectangle(&mut overlay, panel, to_scalar(WHITE), FILLED, LINE_8, 0)?;
    let mut blended = Mat::default();
    add_weighted(&overlay, alpha, &*frame, 1.0 - alpha, 0.0, &mut blended, -1)?;
    *frame = blended;
    Ok(())
}

fn to_scalar(color: Color) -> Scalar {
    Scalar::new(color[0] as f64, color[1] as f64, color[2] as f64, 0.0)
}

#[cfg(test)]
mod tests {
    use opencv::core::{CV_8UC3, Vec3b};

    use super::*;
    use crate::tracks::{BALL_TRACK_ID, TrackAttributes};

    fn frame() -> Mat {
        Mat::new_rows_cols_with_default(720, 1280, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn draw_annotations_keeps_input_frames() {
        let frames = vec![frame(), frame()];
        let mut tracks = Tracks::with_frame_count(2);
        let mut player = TrackAttributes::new(BBox::new(100.0, 100.0, 140.0, 200.0));
        player.has_ball = true;
        player.team = Some(Team::One);
        player.team_color = Some([255.0, 0.0, 0.0]);
        player.speed = Some(12.0);
        player.distance = Some(3.5);
        tracks.players[1].insert(120, player);
        tracks.referees[1].insert(
            4,
            TrackAttributes::new(BBox::new(400.0, 100.0, 440.0, 200.0)),
        );
        tracks.ball[1].insert(
            BALL_TRACK_ID,
            TrackAttributes::new(BBox::new(600.0, 300.0, 610.0, 310.0)),
        );

        let rendered = draw_annotations(
            &frames,
            &tracks,
            &[None, Some(Team::One)],
            &[CameraMovement::default(), CameraMovement { dx: 1.0, dy: 2.0 }],
        )
        .unwrap();

        assert_eq!(rendered.len(), 2);
        assert_eq!(*frames[1].at_2d::<Vec3b>(205, 101).unwrap(), Vec3b::all(0));
        assert_eq!(
            *rendered[1].at_2d::<Vec3b>(205, 101).unwrap(),
            Vec3b::from([255, 0, 0])
        );
    }

    #[test]
    fn draw_annotations_fails_on_short_tracks() {
        let result = draw_annotations(
            &[frame(), frame()],
            &Tracks::with_frame_count(1),
            &[None, None],
            &[CameraMovement::default(); 2],
        );

        assert!(result.is_err());
    }

    #[test]
    fn draw_annotations_blends_panels() {
        let rendered = draw_annotations(
            &[frame()],
            &Tracks::with_frame_count(1),
            &[None],
            &[CameraMovement::default()],
        )
        .unwrap();

        let pixel = *rendered[0].at_2d::<Vec3b>(95, 495).unwrap();
        assert_eq!(pixel, Vec3b::all(153));
    }
}
