//! 68-point facial landmark regression via ONNX Runtime.
//!
//! The face box is grown slightly, squared about its centre, and resampled
//! to the network input. The network regresses 136 values: `(x, y)` for each
//! landmark, normalised to the crop.

use crate::alignment::sample_bilinear;
use crate::capability::{InferenceError, LandmarkPredictor, ModelLoadError};
use crate::imaging::Image;
use crate::types::{BoundingBox, LandmarkSet, Point, LANDMARK_COUNT};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

pub const LANDMARK_MODEL_FILE: &str = "landmarks_68.onnx";

const LANDMARK_INPUT_SIZE: u32 = 112;
/// Fraction by which the detector box is enlarged on each side.
const LANDMARK_BOX_MARGIN: f32 = 0.1;

/// Square region of the source image fed to the network.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Crop {
    left: f32,
    top: f32,
    side: f32,
}

impl Crop {
    fn around(face: &BoundingBox) -> Option<Self> {
        if face.width() <= 0 || face.height() <= 0 {
            return None;
        }
        let (cx, cy) = face.center();
        let side = face.width().max(face.height()) as f32 * (1.0 + 2.0 * LANDMARK_BOX_MARGIN);
        Some(Self {
            left: cx - side / 2.0,
            top: cy - side / 2.0,
            side,
        })
    }

    fn to_source(&self, nx: f32, ny: f32) -> Point {
        Point::new(
            (self.left + nx * self.side).round() as i64,
            (self.top + ny * self.side).round() as i64,
        )
    }
}

/// 68-point landmark predictor backed by an ONNX regression network.
pub struct OnnxLandmarkPredictor {
    session: Session,
}

impl OnnxLandmarkPredictor {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ModelLoadError> {
        if !model_path.exists() {
            return Err(ModelLoadError::NotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded landmark model"
        );

        Ok(Self { session })
    }

    /// Resample the crop to the network input and scale to `[0, 1]` NCHW.
    fn preprocess(image: &Image, crop: &Crop) -> Array4<f32> {
        let size = LANDMARK_INPUT_SIZE;
        let step = crop.side as f64 / size as f64;
        let patch = RgbImage::from_fn(size, size, |x, y| {
            sample_bilinear(
                image.rgb(),
                crop.left as f64 + (x as f64 + 0.5) * step - 0.5,
                crop.top as f64 + (y as f64 + 0.5) * step - 0.5,
            )
        });

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in patch.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
            }
        }
        tensor
    }
}

/// Turn the flat `[x0, y0, x1, y1, ...]` output into source-image points.
fn decode_landmarks(raw: &[f32], crop: &Crop) -> Result<LandmarkSet, InferenceError> {
    if raw.len() != LANDMARK_COUNT * 2 {
        return Err(InferenceError::Failed(format!(
            "expected {} landmark coordinates, got {}",
            LANDMARK_COUNT * 2,
            raw.len()
        )));
    }
    if let Some(i) = raw.iter().position(|v| !v.is_finite()) {
        return Err(InferenceError::Failed(format!(
            "landmark coordinate {i} is not finite"
        )));
    }
    let points = std::array::from_fn(|i| crop.to_source(raw[2 * i], raw[2 * i + 1]));
    Ok(LandmarkSet::new(points))
}

impl LandmarkPredictor for OnnxLandmarkPredictor {
    fn predict(
        &mut self,
        image: &Image,
        face: &BoundingBox,
    ) -> Result<LandmarkSet, InferenceError> {
        let crop = Crop::around(face).ok_or(InferenceError::EmptyCrop(*face))?;
        let input = Self::preprocess(image, &crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Failed(format!("landmark extraction: {e}")))?;

        decode_landmarks(raw, &crop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_crop_is_square_and_centered() {
        let face = BoundingBox::new(100, 50, 199, 249, 0.9);
        let crop = Crop::around(&face).unwrap();
        assert!((crop.side - 240.0).abs() < 1e-4);
        let (cx, cy) = face.center();
        assert!((crop.left + crop.side / 2.0 - cx).abs() < 1e-4);
        assert!((crop.top + crop.side / 2.0 - cy).abs() < 1e-4);
    }

    #[test]
    fn test_crop_rejects_inverted_box() {
        let face = BoundingBox::new(10, 10, 5, 20, 0.9);
        assert!(Crop::around(&face).is_none());
    }

    #[test]
    fn test_decode_maps_to_source() {
        let crop = Crop { left: 10.0, top: 20.0, side: 100.0 };
        let mut raw = vec![0.0f32; LANDMARK_COUNT * 2];
        raw[36 * 2] = 0.25;
        raw[36 * 2 + 1] = 0.5;
        raw[45 * 2] = 0.75;
        raw[45 * 2 + 1] = 0.5;
        let lm = decode_landmarks(&raw, &crop).unwrap();
        assert_eq!(lm.left_eye(), Point::new(35, 70));
        assert_eq!(lm.right_eye(), Point::new(85, 70));
        assert_eq!(lm[0], Point::new(10, 20));
    }

    #[test]
    fn test_decode_wrong_length() {
        let crop = Crop { left: 0.0, top: 0.0, side: 1.0 };
        assert!(matches!(
            decode_landmarks(&[0.0; 10], &crop),
            Err(InferenceError::Failed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_non_finite() {
        let crop = Crop { left: 0.0, top: 0.0, side: 100.0 };
        let mut raw = vec![0.5f32; LANDMARK_COUNT * 2];
        raw[73] = f32::INFINITY;
        let err = decode_landmarks(&raw, &crop).unwrap_err();
        assert!(err.to_string().contains("73"), "{err}");

        raw[73] = f32::NAN;
        assert!(decode_landmarks(&raw, &crop).is_err());
    }

    #[test]
    fn test_preprocess_range_and_shape() {
        let img = Image::from_rgb(RgbImage::from_pixel(300, 300, Rgb([255, 0, 51])));
        let crop = Crop { left: 50.0, top: 50.0, side: 200.0 };
        let t = OnnxLandmarkPredictor::preprocess(&img, &crop);
        assert_eq!(t.shape(), &[1, 3, 112, 112]);
        assert!((t[[0, 0, 56, 56]] - 1.0).abs() < 1e-6);
        assert_eq!(t[[0, 1, 56, 56]], 0.0);
        assert!((t[[0, 2, 56, 56]] - 0.2).abs() < 1e-6);
    }
}
