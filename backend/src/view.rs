use anyhow::{Result, anyhow};
use nalgebra::{Matrix3, Vector3};
use opencv::{
    core::{MatTraitConst, Point2f, Vector},
    imgproc::{get_perspective_transform_def, point_polygon_test},
};

use crate::{models::ViewSettings, tracks::Tracks};

/// Maps pixel positions inside the calibrated pitch region to pitch coordinates.
#[derive(Debug)]
pub struct ViewTransformer {
    pixel_vertices: Vector<Point2f>,
    homography: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl ViewTransformer {
    pub fn new(settings: &ViewSettings) -> Result<Self> {
        let pixel_vertices = settings
            .pixel_vertices
            .iter()
            .map(|[x, y]| Point2f::new(*x, *y))
            .collect::<Vector<Point2f>>();
        let target_vertices = Vector::<Point2f>::from_iter([
            Point2f::new(0.0, settings.pitch_width),
            Point2f::new(0.0, 0.0),
            Point2f::new(settings.pitch_length, 0.0),
            Point2f::new(settings.pitch_length, settings.pitch_width),
        ]);

        let transform = get_perspective_transform_def(&pixel_vertices, &target_vertices)?;
        let mut homography = Matrix3::<f64>::zeros();
        for row in 0..3 {
            for col in 0..3 {
                homography[(row, col)] = *transform.at_2d::<f64>(row as i32, col as i32)?;
            }
        }
        let inverse = homography
            .try_inverse()
            .ok_or_else(|| anyhow!("pitch calibration is degenerate"))?;

        Ok(Self {
            pixel_vertices,
            homography,
            inverse,
        })
    }

    /// Transforms a pixel `point` to pitch coordinates.
    ///
    /// Returns `None` if the point, rounded to whole pixels, lies outside the calibrated region.
    /// Points on the region boundary are inside.
    pub fn transform_point(&self, point: Point2f) -> Result<Option<Point2f>> {
        let rounded = Point2f::new(point.x.round(), point.y.round());
        let inside = point_polygon_test(&self.pixel_vertices, rounded, false)? >= 0.0;
        if !inside {
            return Ok(None);
        }
        Ok(Some(apply(&self.homography, point)))
    }

    /// Transforms pitch coordinates back to pixels.
    pub fn inverse_transform(&self, point: Point2f) -> Point2f {
        apply(&self.inverse, point)
    }

    /// Sets `position_transformed` of every entity from its `position_adjusted`.
    ///
    /// Reads `position_adjusted`, writes `position_transformed`.
    pub fn add_transformed_positions(&self, tracks: &mut Tracks) -> Result<()> {
        for (_, _, track) in tracks.entities_mut() {
            track.position_transformed = match track.position_adjusted {
                Some(position) => self.transform_point(position)?,
                None => None,
            };
        }
        Ok(())
    }
}

fn apply(matrix: &Matrix3<f64>, point: Point2f) -> Point2f {
    let projected = matrix * Vector3::new(point.x as f64, point.y as f64, 1.0);
    Point2f::new(
        (projected.x / projected.z) as f32,
        (projected.y / projected.z) as f32,
    )
}
