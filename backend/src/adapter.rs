use anyhow::{Result, bail};
use log::debug;
use opencv::core::Mat;

use crate::{
    detect::{DetectionClass, Detector, RawDetection},
    models::{DetectionSettings, TrackerSettings},
    tracker::{ByteTracker, Detection},
    tracks::{BALL_TRACK_ID, TrackAttributes, Tracks},
};

/// Turns frames into the three [`Tracks`] timelines.
///
/// Detection runs in batches through a [`Detector`], tracking runs frame by frame through a
/// [`ByteTracker`] owned by this adapter.
#[derive(Debug)]
pub struct DetectorAdapter {
    detector: Box<dyn Detector>,
    tracker: ByteTracker,
    batch_size: usize,
    confidence_threshold: f32,
}

impl DetectorAdapter {
    pub fn new(
        detector: Box<dyn Detector>,
        detection: &DetectionSettings,
        tracker: &TrackerSettings,
    ) -> Self {
        Self {
            detector,
            tracker: ByteTracker::new(tracker),
            batch_size: detection.batch_size.max(1),
            confidence_threshold: detection.confidence_threshold,
        }
    }

    /// Runs the detector over `frames` in batches of the configured size.
    ///
    /// Returns one list of detections per frame. A batch answered with a different number of
    /// frames is an error.
    pub fn detect_frames(&mut self, frames: &[Mat]) -> Result<Vec<Vec<RawDetection>>> {
        let mut detections = Vec::with_capacity(frames.len());
        for (i, batch) in frames.chunks(self.batch_size).enumerate() {
            debug!(target: "adapter", "detecting batch {i} with {} frames", batch.len());
            let batch_detections = self.detector.detect_batch(batch)?;
            if batch_detections.len() != batch.len() {
                bail!(
                    "detector answered {} frames for a batch of {}",
                    batch_detections.len(),
                    batch.len()
                );
            }
            detections.extend(batch_detections);
        }
        Ok(detections)
    }

    /// Detects then tracks every frame of `frames`.
    pub fn get_object_tracks(&mut self, frames: &[Mat]) -> Result<Tracks> {
        let detections = self.detect_frames(frames)?;
        self.track(&detections)
    }

    /// Builds the timelines from per-frame detections.
    ///
    /// Detections must be given in frame order since the tracker is stateful.
    pub fn track(&mut self, detections: &[Vec<RawDetection>]) -> Result<Tracks> {
        let mut tracks = Tracks::with_frame_count(detections.len());

        for (frame, frame_detections) in detections.iter().enumerate() {
            let mut tracked = Vec::new();
            let mut ball = None::<RawDetection>;

            for detection in frame_detections {
                if detection.confidence < self.confidence_threshold
                    || detection.bbox.width() <= 0.0
                    || detection.bbox.height() <= 0.0
                {
                    continue;
                }
                match detection.class {
                    DetectionClass::Ball => {
                        if ball.is_none_or(|ball| detection.confidence > ball.confidence) {
                            ball = Some(*detection);
                        }
                    }
                    DetectionClass::Goalkeeper | DetectionClass::Player => tracked.push(
                        Detection::new(
                            detection.bbox,
                            DetectionClass::Player,
                            detection.confidence,
                        ),
                    ),
                    DetectionClass::Referee => tracked.push(Detection::new(
                        detection.bbox,
                        DetectionClass::Referee,
                        detection.confidence,
                    )),
                }
            }

            for track in self.tracker.update(tracked)? {
                let timeline = match track.class() {
                    DetectionClass::Referee => &mut tracks.referees,
                    _ => &mut tracks.players,
                };
                timeline[frame].insert(track.track_id(), TrackAttributes::new(track.bbox()));
            }
            if let Some(ball) = ball {
                tracks.ball[frame].insert(BALL_TRACK_ID, TrackAttributes::new(ball.bbox));
            }
        }

        debug_assert!(tracks.is_consistent());
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use opencv::core::{CV_8UC3, Scalar};

    use super::*;
    use crate::{detect::MockDetector, tracks::BBox};

    fn raw(class: DetectionClass, x: f32, confidence: f32) -> RawDetection {
        RawDetection {
            class,
            bbox: BBox::new(x, 100.0, x + 20.0, 160.0),
            confidence,
        }
    }

    fn frame() -> Mat {
        Mat::new_rows_cols_with_default(4, 4, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    fn adapter(detector: MockDetector, batch_size: usize) -> DetectorAdapter {
        let detection = DetectionSettings {
            batch_size,
            ..DetectionSettings::default()
        };
        DetectorAdapter::new(
            Box::new(detector),
            &detection,
            &TrackerSettings::default(),
        )
    }

    #[test]
    fn detect_frames_batches_by_configured_size() {
        let frames = vec![frame(); 5];
        let mut detector = MockDetector::new();
        detector
            .expect_detect_batch()
            .withf(|frames| frames.len() == 2)
            .times(2)
            .returning(|frames| Ok(vec![vec![]; frames.len()]));
        detector
            .expect_detect_batch()
            .withf(|frames| frames.len() == 1)
            .once()
            .returning(|_| Ok(vec![vec![]]));

        let detections = adapter(detector, 2).detect_frames(&frames).unwrap();

        assert_eq!(detections.len(), 5);
    }

    #[test]
    fn detect_frames_fails_on_short_answer() {
        let frames = vec![frame(); 3];
        let mut detector = MockDetector::new();
        detector
            .expect_detect_batch()
            .once()
            .returning(|_| Ok(vec![]));

        assert!(adapter(detector, 20).detect_frames(&frames).is_err());
    }

    #[test]
    fn get_object_tracks_detects_then_tracks() {
        let frames = vec![frame(); 2];
        let mut detector = MockDetector::new();
        detector.expect_detect_batch().once().returning(|frames| {
            Ok(frames
                .iter()
                .map(|_| {
                    vec![
                        raw(DetectionClass::Player, 100.0, 0.9),
                        raw(DetectionClass::Ball, 300.0, 0.5),
                    ]
                })
                .collect())
        });

        let tracks = adapter(detector, 20).get_object_tracks(&frames).unwrap();

        assert_eq!(tracks.frame_count(), 2);
        assert!(tracks.players.iter().all(|players| players.len() == 1));
        assert!(tracks.ball.iter().all(|ball| ball.contains_key(&BALL_TRACK_ID)));
    }

    #[test]
    fn track_remaps_goalkeeper_to_player() {
        let detections = vec![vec![
            raw(DetectionClass::Goalkeeper, 100.0, 0.9),
            raw(DetectionClass::Referee, 400.0, 0.9),
        ]];

        let tracks = adapter(MockDetector::new(), 20)
            .track(&detections)
            .unwrap();

        assert_eq!(tracks.players[0].len(), 1);
        assert_eq!(tracks.referees[0].len(), 1);
        assert!(tracks.ball[0].is_empty());
    }

    #[test]
    fn track_keeps_most_confident_ball_under_fixed_id() {
        let detections = vec![
            vec![
                raw(DetectionClass::Ball, 10.0, 0.3),
                raw(DetectionClass::Ball, 50.0, 0.6),
            ],
            vec![],
        ];

        let tracks = adapter(MockDetector::new(), 20)
            .track(&detections)
            .unwrap();

        assert_eq!(tracks.ball[0].len(), 1);
        assert_eq!(tracks.ball[0][&BALL_TRACK_ID].bbox.x1, 50.0);
        assert!(tracks.ball[1].is_empty());
        assert_eq!(tracks.frame_count(), 2);
    }

    #[test]
    fn track_drops_detections_below_confidence_threshold() {
        let detections = vec![vec![
            raw(DetectionClass::Player, 100.0, 0.05),
            raw(DetectionClass::Ball, 10.0, 0.05),
        ]];

        let tracks = adapter(MockDetector::new(), 20)
            .track(&detections)
            .unwrap();

        assert!(tracks.players[0].is_empty());
        assert!(tracks.ball[0].is_empty());
    }

    #[test]
    fn track_keeps_player_id_across_frames() {
        let detections = (0..4)
            .map(|i| vec![raw(DetectionClass::Player, 100.0 + i as f32, 0.9)])
            .collect::<Vec<_>>();

        let tracks = adapter(MockDetector::new(), 20)
            .track(&detections)
            .unwrap();

        let ids = tracks
            .players
            .iter()
            .map(|frame| frame.keys().copied().collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert!(ids.iter().all(|frame| frame == &ids[0] && frame.len() == 1));
    }
}
