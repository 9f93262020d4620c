use std::{fmt, path::Path, str::FromStr};

use anyhow::{Context, Result, bail};
use log::debug;
#[cfg(test)]
use mockall::automock;
use opencv::{
    core::{
        BORDER_CONSTANT, CV_32FC3, Mat, MatTraitConst, MatTraitConstManual, ModifyInplace, Scalar,
        Size, Vec3f,
    },
    imgproc::{COLOR_BGR2RGB, INTER_LINEAR, cvt_color_def, resize},
};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{Session, SessionInputValue, SessionOutputs},
    value::Tensor,
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::tracks::BBox;

/// Side of the square image the detection model expects.
const MODEL_INPUT_SIZE: f32 = 640.0;

/// Number of values per row of the model output: `[x1, y1, x2, y2, score, class]`.
const MODEL_OUTPUT_ROW: usize = 6;

/// The classes the detection model knows about.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DetectionClass {
    Player,
    Goalkeeper,
    Referee,
    Ball,
}

/// An untracked detection as returned by a [`Detector`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class: DetectionClass,
    pub bbox: BBox,
    pub confidence: f32,
}

/// A trait for detecting objects from provided frames.
#[cfg_attr(test, automock)]
pub trait Detector: fmt::Debug {
    /// Detects objects in every frame of `frames`.
    ///
    /// Returns one list of detections per frame in the same order as `frames`.
    fn detect_batch(&mut self, frames: &[Mat]) -> Result<Vec<Vec<RawDetection>>>;
}

/// A [`Detector`] backed by an NMS-exported YOLO ONNX model.
pub struct OnnxDetector {
    session: Session,
    class_names: Vec<String>,
}

impl fmt::Debug for OnnxDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnnxDetector")
            .field("class_names", &self.class_names)
            .finish_non_exhaustive()
    }
}

impl OnnxDetector {
    /// Loads the model at `model`.
    ///
    /// `class_names` maps the model's class ids to names parsed as [`DetectionClass`].
    pub fn new(model: impl AsRef<Path>, class_names: Vec<String>) -> Result<Self> {
        let model = model.as_ref();
        if !model.exists() {
            bail!("model not found at {}", model.display());
        }
        let session = build_session(model)
            .with_context(|| format!("failed to load model {}", model.display()))?;

        Ok(Self {
            session,
            class_names,
        })
    }

    fn detect(&mut self, bgr: &Mat) -> Result<Vec<RawDetection>> {
        let size = bgr.size()?;
        let (mat_in, ratio, left, top) = preprocess_for_yolo(bgr)?;
        let predictions = {
            let result = self.session.run([to_input_value(&mat_in)?])?;
            from_output_value(&result)?.to_vec()
        };

        Ok(predictions
            .chunks_exact(MODEL_OUTPUT_ROW)
            .filter_map(|pred| {
                let class = self.class_of(pred[5])?;
                Some(RawDetection {
                    class,
                    bbox: remap_from_yolo(pred, size, ratio, left, top),
                    confidence: pred[4],
                })
            })
            .collect())
    }

    fn class_of(&self, id: f32) -> Option<DetectionClass> {
        let name = self.class_names.get(id as usize)?;
        match DetectionClass::from_str(name) {
            Ok(class) => Some(class),
            Err(_) => {
                debug!(target: "detect", "ignoring detection of unknown class {name}");
                None
            }
        }
    }
}

impl Detector for OnnxDetector {
    fn detect_batch(&mut self, frames: &[Mat]) -> Result<Vec<Vec<RawDetection>>> {
        frames.iter().map(|frame| self.detect(frame)).collect()
    }
}

#[inline]
fn remap_from_yolo(pred: &[f32], size: Size, ratio: f32, left: i32, top: i32) -> BBox {
    let remap = |value: f32, offset: i32, max: i32| {
        ((value - offset as f32) / ratio).max(0.0).min(max as f32)
    };
    BBox::new(
        remap(pred[0], left, size.width),
        remap(pred[1], top, size.height),
        remap(pred[2], left, size.width),
        remap(pred[3], top, size.height),
    )
}

/// Preprocesses a BGR `Mat` image to a letterboxed, normalized RGB `Mat` image with type `f32`
/// for YOLO detection.
///
/// Returns `(Mat, ratio, left, top)` where `ratio` is the resize ratio and `left`/`top` the
/// padding offsets.
#[inline]
fn preprocess_for_yolo(mat: &impl MatTraitConst) -> Result<(Mat, f32, i32, i32)> {
    // https://github.com/ultralytics/ultralytics/blob/main/ultralytics/data/augment.py
    let mut mat = mat.try_clone()?;

    let size = mat.size()?;
    let (w_ratio, h_ratio) = (
        MODEL_INPUT_SIZE / size.width as f32,
        MODEL_INPUT_SIZE / size.height as f32,
    );
    let min_ratio = w_ratio.min(h_ratio);

    let w = (size.width as f32 * min_ratio).round();
    let h = (size.height as f32 * min_ratio).round();

    let pad_w = (MODEL_INPUT_SIZE - w) / 2.0;
    let pad_h = (MODEL_INPUT_SIZE - h) / 2.0;

    let top = (pad_h - 0.1).round() as i32;
    let bottom = (pad_h + 0.1).round() as i32;
    let left = (pad_w - 0.1).round() as i32;
    let right = (pad_w + 0.1).round() as i32;

    // SAFETY: all of the functions below can be called in place.
    unsafe {
        mat.modify_inplace(|mat, mat_mut| {
            cvt_color_def(mat, mat_mut, COLOR_BGR2RGB)?;
            resize(
                mat,
                mat_mut,
                Size::new(w as i32, h as i32),
                0.0,
                0.0,
                INTER_LINEAR,
            )?;
            opencv::core::copy_make_border(
                mat,
                mat_mut,
                top,
                bottom,
                left,
                right,
                BORDER_CONSTANT,
                Scalar::all(114.0),
            )?;
            mat.convert_to(mat_mut, CV_32FC3, 1.0 / 255.0, 0.0)
        })?;
    }
    Ok((mat, min_ratio, left, top))
}

/// Extracts the prediction rows from `SessionOutputs` as a flat slice.
#[inline]
fn from_output_value<'a>(result: &'a SessionOutputs) -> Result<&'a [f32]> {
    let (dims, outputs) = result["output0"].try_extract_tensor::<f32>()?;
    if dims.last().copied() != Some(MODEL_OUTPUT_ROW as i64) {
        bail!("unexpected model output shape {dims:?}");
    }
    Ok(outputs)
}

/// Converts a continuous, normalized `f32` RGB `Mat` image to a `[1, 3, H, W]`
/// `SessionInputValue`.
#[inline]
fn to_input_value(mat: &impl MatTraitConst) -> Result<SessionInputValue<'static>> {
    let rows = mat.rows() as usize;
    let cols = mat.cols() as usize;
    let plane = rows * cols;
    let pixels = mat.data_typed::<Vec3f>()?;

    let mut data = vec![0.0f32; 3 * plane];
    for (i, pixel) in pixels.iter().enumerate() {
        for channel in 0..3 {
            data[channel * plane + i] = pixel[channel];
        }
    }

    let shape = [1usize, 3, rows, cols];
    let tensor = Tensor::from_array((&shape[..], data))?;
    Ok(SessionInputValue::Owned(tensor.into_dyn()))
}

#[inline]
fn build_session(model: &Path) -> Result<Session> {
    if cfg!(feature = "gpu") {
        Ok(Session::builder()?
            .with_execution_providers([CUDAExecutionProvider::default().build()])?
            .commit_from_file(model)?)
    } else {
        Ok(Session::builder()?.commit_from_file(model)?)
    }
}

#[cfg(test)]
mod tests {
    use opencv::core::{CV_8UC3, MatTraitConst};

    use super::*;

    #[test]
    fn detection_class_parses_model_names() {
        assert_eq!(
            DetectionClass::from_str("goalkeeper").unwrap(),
            DetectionClass::Goalkeeper
        );
        assert_eq!(DetectionClass::Ball.to_string(), "ball");
        assert!(DetectionClass::from_str("coach").is_err());
    }

    #[test]
    fn preprocess_for_yolo_letterboxes_wide_frame() {
        let mat = Mat::new_rows_cols_with_default(360, 640, CV_8UC3, Scalar::all(10.0)).unwrap();

        let (mat_in, ratio, left, top) = preprocess_for_yolo(&mat).unwrap();

        assert_eq!(mat_in.rows(), 640);
        assert_eq!(mat_in.cols(), 640);
        assert_eq!(ratio, 1.0);
        assert_eq!(left, 0);
        assert_eq!(top, 140);
    }

    #[test]
    fn remap_from_yolo_undoes_letterbox() {
        let size = Size::new(1280, 720);
        let pred = [100.0, 160.0 + 140.0, 200.0, 200.0 + 140.0, 0.9, 2.0];

        let bbox = remap_from_yolo(&pred, size, 0.5, 0, 140);

        assert_eq!(bbox, BBox::new(200.0, 320.0, 400.0, 400.0));
    }

    #[test]
    fn to_input_value_accepts_preprocessed_frame() {
        let mat = Mat::new_rows_cols_with_default(64, 64, CV_8UC3, Scalar::all(255.0)).unwrap();
        let (mat_in, _, _, _) = preprocess_for_yolo(&mat).unwrap();

        assert!(to_input_value(&mat_in).is_ok());
    }
}
