use std::path::Path;

use log::{debug, info};
use opencv::{
    core::{Mat, MatTraitConst, Size},
    videoio::{
        CAP_ANY, CAP_PROP_FPS, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst,
        VideoWriter, VideoWriterTrait, VideoWriterTraitConst,
    },
};
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("video {0} could not be opened")]
    NotOpened(String),
    #[error("video {0} has no frame")]
    NoFrame(String),
    #[error("frame {index} has size {actual:?} but the video has size {expected:?}")]
    FrameSizeMismatch {
        index: usize,
        expected: Size,
        actual: Size,
    },
    #[error("frame rate {0} is invalid")]
    InvalidFrameRate(f64),

    #[error("opencv error {0}")]
    OpenCv(#[from] opencv::Error),
}

/// A decoded video held in memory.
#[derive(Debug)]
pub struct Video {
    /// BGR frames in display order.
    pub frames: Vec<Mat>,
    pub fps: f64,
}

/// Decodes every frame of the video at `path`.
pub fn read_video(path: impl AsRef<Path>) -> Result<Video> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let mut capture = VideoCapture::from_file(&name, CAP_ANY)?;
    if !capture.is_opened()? {
        return Err(Error::NotOpened(name));
    }

    let fps = capture.get(CAP_PROP_FPS)?;
    let mut frames = Vec::new();
    loop {
        let mut frame = Mat::default();
        if !capture.read(&mut frame)? || frame.empty() {
            break;
        }
        frames.push(frame);
    }
    if frames.is_empty() {
        return Err(Error::NoFrame(name));
    }
    info!(target: "video", "read {} frames at {fps} fps from {name}", frames.len());

    Ok(Video { frames, fps })
}

/// Encodes `frames` to `path` with the `mp4v` codec.
///
/// All frames must have the size of the first one.
pub fn write_video(path: impl AsRef<Path>, frames: &[Mat], fps: f64) -> Result<()> {
    let name = path.as_ref().display().to_string();
    let Some(first) = frames.first() else {
        return Err(Error::NoFrame(name));
    };
    if !fps.is_finite() || fps <= 0.0 {
        return Err(Error::InvalidFrameRate(fps));
    }

    let size = first.size()?;
    for (index, frame) in frames.iter().enumerate() {
        let actual = frame.size()?;
        if actual != size {
            return Err(Error::FrameSizeMismatch {
                index,
                expected: size,
                actual,
            });
        }
    }

    let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
    let mut writer = VideoWriter::new(&name, fourcc, fps, size, true)?;
    if !writer.is_opened()? {
        return Err(Error::NotOpened(name));
    }

    for frame in frames {
        writer.write(frame)?;
    }
    writer.release()?;
    debug!(target: "video", "wrote {} frames to {name}", frames.len());

    Ok(())
}
