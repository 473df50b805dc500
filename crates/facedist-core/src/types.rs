use serde::{Serialize, Serializer};
use std::ops::Index;
use thiserror::Error;

/// Number of points in a landmark set (iBUG 300-W markup).
pub const LANDMARK_COUNT: usize = 68;
/// Outer corner of the left eye region.
pub const LEFT_EYE_OUTER: usize = 36;
/// Outer corner of the right eye region.
pub const RIGHT_EYE_OUTER: usize = 45;
/// Length of a face descriptor.
pub const DESCRIPTOR_DIM: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidDescriptorError {
    #[error("descriptor has {actual} dimensions, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("descriptor value at index {index} is not finite")]
    NonFinite { index: usize },
    #[error("descriptors from different models are not comparable: {left} vs {right}")]
    ModelMismatch { left: String, right: String },
}

/// Axis-aligned face rectangle in image pixels.
///
/// Corners are inclusive: a box covering a single pixel has
/// `left == right` and `top == bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
    /// Detector score for this box.
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(left: i64, top: i64, right: i64, bottom: i64, confidence: f32) -> Self {
        Self { left, top, right, bottom, confidence }
    }

    pub fn width(&self) -> i64 {
        self.right - self.left + 1
    }

    pub fn height(&self) -> i64 {
        self.bottom - self.top + 1
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.left + self.right) as f32 / 2.0,
            (self.top + self.bottom) as f32 / 2.0,
        )
    }

    /// Map a box found in an image enlarged by `factor` back to the
    /// `width`×`height` original, clipped to it.
    ///
    /// Corners are inclusive, so the far edge maps through the exclusive
    /// bound: enlarged column `2W - 1` at factor 2 is column `W - 1`.
    pub fn downscale(&self, factor: u32, width: u32, height: u32) -> Self {
        let f = factor.max(1) as i64;
        let max_x = width.saturating_sub(1) as i64;
        let max_y = height.saturating_sub(1) as i64;
        Self {
            left: self.left.div_euclid(f).clamp(0, max_x),
            top: self.top.div_euclid(f).clamp(0, max_y),
            right: ((self.right + 1).div_euclid(f) - 1).clamp(0, max_x),
            bottom: ((self.bottom + 1).div_euclid(f) - 1).clamp(0, max_y),
            confidence: self.confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// The 68 facial keypoints predicted for one face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandmarkSet {
    points: [Point; LANDMARK_COUNT],
}

impl LandmarkSet {
    pub fn new(points: [Point; LANDMARK_COUNT]) -> Self {
        Self { points }
    }

    /// Always [`LANDMARK_COUNT`]; kept for report symmetry with descriptors.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn left_eye(&self) -> Point {
        self.points[LEFT_EYE_OUTER]
    }

    pub fn right_eye(&self) -> Point {
        self.points[RIGHT_EYE_OUTER]
    }
}

impl Index<usize> for LandmarkSet {
    type Output = Point;

    fn index(&self, index: usize) -> &Point {
        &self.points[index]
    }
}

// serde derives stop at 32-element arrays.
impl Serialize for LandmarkSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.points.iter())
    }
}

/// Face embedding produced by a descriptor network.
///
/// Only meaningful under Euclidean distance against descriptors from the
/// same `model`.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDescriptor {
    values: [f32; DESCRIPTOR_DIM],
    model: String,
}

impl FaceDescriptor {
    pub fn new(values: [f32; DESCRIPTOR_DIM], model: impl Into<String>) -> Self {
        Self { values, model: model.into() }
    }

    /// Build a descriptor from raw network output.
    ///
    /// Rejects outputs of the wrong length and non-finite values.
    pub fn from_vec(
        values: Vec<f32>,
        model: impl Into<String>,
    ) -> Result<Self, InvalidDescriptorError> {
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(InvalidDescriptorError::NonFinite { index });
        }
        let actual = values.len();
        let values: [f32; DESCRIPTOR_DIM] = values
            .try_into()
            .map_err(|_| InvalidDescriptorError::LengthMismatch {
                expected: DESCRIPTOR_DIM,
                actual,
            })?;
        Ok(Self::new(values, model))
    }

    pub fn values(&self) -> &[f32; DESCRIPTOR_DIM] {
        &self.values
    }

    /// Identifier of the network that produced this descriptor.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Euclidean (L2) distance, accumulated in `f64`.
    pub fn euclidean_distance(&self, other: &FaceDescriptor) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(&a, &b)| {
                let d = a as f64 - b as f64;
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }
}

impl Serialize for FaceDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("FaceDescriptor", 2)?;
        s.serialize_field("model", &self.model)?;
        s.serialize_field("values", self.values.as_slice())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_vec_wrong_length() {
        let err = FaceDescriptor::from_vec(vec![0.0; 127], "m").unwrap_err();
        assert_eq!(
            err,
            InvalidDescriptorError::LengthMismatch { expected: 128, actual: 127 }
        );
    }

    #[test]
    fn test_descriptor_from_vec_rejects_nan() {
        let mut v = vec![0.0f32; DESCRIPTOR_DIM];
        v[7] = f32::NAN;
        let err = FaceDescriptor::from_vec(v, "m").unwrap_err();
        assert_eq!(err, InvalidDescriptorError::NonFinite { index: 7 });
    }

    #[test]
    fn test_descriptor_from_vec_ok() {
        let d = FaceDescriptor::from_vec(vec![0.5; DESCRIPTOR_DIM], "m").unwrap();
        assert_eq!(d.len(), 128);
        assert_eq!(d.model(), "m");
    }

    #[test]
    fn test_euclidean_distance_known_value() {
        let mut a = [0.0f32; DESCRIPTOR_DIM];
        let mut b = [0.0f32; DESCRIPTOR_DIM];
        a[0] = 3.0;
        b[1] = 4.0;
        let a = FaceDescriptor::new(a, "m");
        let b = FaceDescriptor::new(b, "m");
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_bbox_dimensions_inclusive() {
        let b = BoundingBox::new(10, 20, 19, 39, 1.0);
        assert_eq!(b.width(), 10);
        assert_eq!(b.height(), 20);
        assert_eq!(b.center(), (14.5, 29.5));
    }

    #[test]
    fn test_bbox_downscale() {
        let b = BoundingBox::new(100, 50, 201, 151, 0.9).downscale(2, 400, 300);
        assert_eq!((b.left, b.top, b.right, b.bottom), (50, 25, 100, 75));
        assert_eq!(b.confidence, 0.9);
    }

    #[test]
    fn test_bbox_downscale_stays_inside_image() {
        // Box touching the right and bottom edges of an 800x200 enlargement
        // of a 400x100 image.
        let b = BoundingBox::new(700, 150, 799, 199, 0.9).downscale(2, 400, 100);
        assert_eq!((b.left, b.top, b.right, b.bottom), (350, 75, 399, 99));

        let b = BoundingBox::new(-3, -1, 1601, 450, 0.9).downscale(4, 400, 100);
        assert_eq!((b.left, b.top, b.right, b.bottom), (0, 0, 399, 99));
    }

    #[test]
    fn test_bbox_downscale_factor_one_only_clips() {
        let b = BoundingBox::new(5, 6, 500, 60, 0.9).downscale(1, 400, 100);
        assert_eq!((b.left, b.top, b.right, b.bottom), (5, 6, 399, 60));
    }

    #[test]
    fn test_landmark_eye_indices() {
        let mut points = [Point::default(); LANDMARK_COUNT];
        points[36] = Point::new(1, 2);
        points[45] = Point::new(3, 4);
        let set = LandmarkSet::new(points);
        assert_eq!(set.left_eye(), Point::new(1, 2));
        assert_eq!(set.right_eye(), Point::new(3, 4));
        assert_eq!(set.len(), 68);
        assert_eq!(set[45], Point::new(3, 4));
    }
}
