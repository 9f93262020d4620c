use crate::tracks::{BALL_TRACK_ID, BBox, FrameTracks, Timeline, TrackAttributes};

/// Fills the gaps of a ball timeline.
///
/// Frames between two detections get a box linearly interpolated per coordinate. Frames before
/// the first detection take the first box and frames after the last detection take the last box.
/// A timeline without any detection is returned unchanged.
///
/// Interpolated entries only carry `bbox`.
pub fn interpolate_ball_positions(ball: &Timeline) -> Timeline {
    let boxes = ball
        .iter()
        .map(|tracks| tracks.get(&BALL_TRACK_ID).map(|track| track.bbox))
        .collect::<Vec<_>>();
    let known = boxes
        .iter()
        .enumerate()
        .filter_map(|(i, bbox)| bbox.map(|bbox| (i, bbox)))
        .collect::<Vec<_>>();
    let (Some(&(first, first_bbox)), Some(&(last, last_bbox))) = (known.first(), known.last())
    else {
        return ball.clone();
    };

    let mut filled = boxes;
    for pair in known.windows(2) {
        let (start, start_bbox) = pair[0];
        let (end, end_bbox) = pair[1];
        let span = (end - start) as f32;
        for (i, bbox) in filled.iter_mut().enumerate().take(end).skip(start + 1) {
            *bbox = Some(start_bbox.lerp(&end_bbox, (i - start) as f32 / span));
        }
    }
    filled[..first].fill(Some(first_bbox));
    filled[last + 1..].fill(Some(last_bbox));

    ball.iter()
        .zip(filled)
        .map(|(tracks, bbox)| match (tracks.get(&BALL_TRACK_ID), bbox) {
            (Some(_), _) => tracks.clone(),
            (None, Some(bbox)) => ball_frame(bbox),
            (None, None) => FrameTracks::new(),
        })
        .collect()
}

fn ball_frame(bbox: BBox) -> FrameTracks {
    FrameTracks::from([(BALL_TRACK_ID, TrackAttributes::new(bbox))])
}
