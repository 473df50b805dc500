//! Sequencing of detector, landmark predictor, chip alignment, descriptor
//! network and comparator for a single image.

use crate::alignment::{extract_aligned_chip, AlignmentError};
use crate::capability::{DescriptorExtractor, FaceDetector, InferenceError, LandmarkPredictor};
use crate::comparator::FaceComparator;
use crate::imaging::Image;
use crate::report::{ComparisonOutcome, DetectionReport, FaceAnalysis, RecognitionReport};
use crate::types::{BoundingBox, FaceDescriptor};
use thiserror::Error;

/// Largest accepted number of 2× upsampling steps before detection.
pub const MAX_UPSAMPLE: u32 = 3;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("face detection failed: {0}")]
    Detection(#[source] InferenceError),
    #[error("landmark prediction failed for face {face}: {source}")]
    Landmarks {
        face: usize,
        #[source]
        source: InferenceError,
    },
    #[error("chip alignment failed for face {face}: {source}")]
    Alignment {
        face: usize,
        #[source]
        source: AlignmentError,
    },
    #[error("descriptor extraction failed for face {face}: {source}")]
    Descriptor {
        face: usize,
        #[source]
        source: InferenceError,
    },
    #[error("recognition requires a landmark predictor and a descriptor extractor")]
    RecognitionUnavailable,
    #[error("upsample must be at most {MAX_UPSAMPLE}, got {0}")]
    UpsampleTooLarge(u32),
}

struct Recognition {
    landmarks: Box<dyn LandmarkPredictor>,
    extractor: Box<dyn DescriptorExtractor>,
}

/// One-image face pipeline over pluggable model backends.
pub struct Pipeline {
    detector: Box<dyn FaceDetector>,
    recognition: Option<Recognition>,
    comparator: FaceComparator,
    upsample: u32,
}

impl Pipeline {
    /// A detection-only pipeline.
    pub fn new(detector: Box<dyn FaceDetector>) -> Self {
        Self {
            detector,
            recognition: None,
            comparator: FaceComparator::default(),
            upsample: 0,
        }
    }

    pub fn with_recognition(
        mut self,
        landmarks: Box<dyn LandmarkPredictor>,
        extractor: Box<dyn DescriptorExtractor>,
    ) -> Self {
        self.recognition = Some(Recognition { landmarks, extractor });
        self
    }

    pub fn with_comparator(mut self, comparator: FaceComparator) -> Self {
        self.comparator = comparator;
        self
    }

    /// Double the image `steps` times before detection to find small faces.
    /// Boxes are reported in the original image's coordinates.
    pub fn with_upsample(mut self, steps: u32) -> Result<Self, PipelineError> {
        if steps > MAX_UPSAMPLE {
            return Err(PipelineError::UpsampleTooLarge(steps));
        }
        self.upsample = steps;
        Ok(self)
    }

    fn find_faces(&mut self, image: &Image) -> Result<Vec<BoundingBox>, PipelineError> {
        if self.upsample == 0 {
            return self.detector.detect(image).map_err(PipelineError::Detection);
        }

        let factor = 1u32 << self.upsample;
        let enlarged = image.upsample(factor);
        tracing::debug!(
            factor,
            width = enlarged.width(),
            height = enlarged.height(),
            "upsampled image for detection"
        );

        let boxes = self.detector.detect(&enlarged).map_err(PipelineError::Detection)?;
        Ok(boxes
            .iter()
            .map(|b| b.downscale(factor, image.width(), image.height()))
            .collect())
    }

    /// Find faces and report their bounding boxes.
    pub fn detect(&mut self, image: &Image) -> Result<DetectionReport, PipelineError> {
        let faces = self.find_faces(image)?;
        tracing::info!(faces = faces.len(), "detection finished");
        Ok(DetectionReport { faces })
    }

    /// Find faces, describe each one, and compare every pair.
    ///
    /// A comparison failure does not fail the run: the per-face results are
    /// returned with [`ComparisonOutcome::Aborted`].
    pub fn recognize(&mut self, image: &Image) -> Result<RecognitionReport, PipelineError> {
        if self.recognition.is_none() {
            return Err(PipelineError::RecognitionUnavailable);
        }
        let boxes = self.find_faces(image)?;
        let rec = self
            .recognition
            .as_mut()
            .ok_or(PipelineError::RecognitionUnavailable)?;
        let descriptor_model = rec.extractor.model_id().to_string();

        let mut faces = Vec::with_capacity(boxes.len());
        for (face, bbox) in boxes.into_iter().enumerate() {
            let landmarks = rec
                .landmarks
                .predict(image, &bbox)
                .map_err(|source| PipelineError::Landmarks { face, source })?;

            let chip = extract_aligned_chip(
                image,
                &landmarks,
                rec.extractor.chip_size(),
                rec.extractor.chip_padding(),
            )
            .map_err(|source| PipelineError::Alignment { face, source })?;

            let descriptor = rec
                .extractor
                .compute(&chip)
                .map_err(|source| PipelineError::Descriptor { face, source })?;

            tracing::debug!(face, ?bbox, dims = descriptor.len(), "face described");
            faces.push(FaceAnalysis { bbox, landmarks, descriptor });
        }

        let comparison = if faces.len() < 2 {
            ComparisonOutcome::Skipped
        } else {
            let descriptors: Vec<FaceDescriptor> =
                faces.iter().map(|f| f.descriptor.clone()).collect();
            match self.comparator.compare_all(&descriptors) {
                Ok(results) => ComparisonOutcome::Completed(results),
                Err(err) => {
                    tracing::error!(error = %err, "comparison aborted");
                    ComparisonOutcome::Aborted(err)
                }
            }
        };

        tracing::info!(faces = faces.len(), model = %descriptor_model, "recognition finished");
        Ok(RecognitionReport {
            faces,
            descriptor_model,
            threshold: self.comparator.threshold(),
            comparison,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::Verdict;
    use crate::types::{LandmarkSet, Point, DESCRIPTOR_DIM};
    use image::RgbImage;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Returns fixed boxes and records the size of every image it sees.
    struct FakeDetector {
        boxes: Vec<BoundingBox>,
        seen: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl FaceDetector for FakeDetector {
        fn detect(&mut self, image: &Image) -> Result<Vec<BoundingBox>, InferenceError> {
            self.seen.lock().unwrap().push((image.width(), image.height()));
            Ok(self.boxes.clone())
        }
    }

    /// Spreads the 68 points over the face box so alignment is well posed.
    struct FakeLandmarks;

    impl LandmarkPredictor for FakeLandmarks {
        fn predict(
            &mut self,
            _: &Image,
            face: &BoundingBox,
        ) -> Result<LandmarkSet, InferenceError> {
            Ok(LandmarkSet::new(std::array::from_fn(|i| {
                Point::new(
                    face.left + (i as i64 * 7) % face.width(),
                    face.top + (i as i64 * 13) % face.height(),
                )
            })))
        }
    }

    /// Hands out queued descriptors, one per face.
    struct FakeExtractor {
        queue: VecDeque<FaceDescriptor>,
    }

    impl DescriptorExtractor for FakeExtractor {
        fn model_id(&self) -> &str {
            "fake"
        }

        fn chip_size(&self) -> u32 {
            32
        }

        fn chip_padding(&self) -> f32 {
            0.25
        }

        fn compute(&mut self, chip: &Image) -> Result<FaceDescriptor, InferenceError> {
            assert_eq!((chip.width(), chip.height()), (32, 32));
            self.queue
                .pop_front()
                .ok_or_else(|| InferenceError::Failed("no more fixtures".into()))
        }
    }

    fn at(distance: f32, model: &str) -> FaceDescriptor {
        let mut values = [0.0f32; DESCRIPTOR_DIM];
        values[0] = distance;
        FaceDescriptor::new(values, model)
    }

    fn boxes(n: usize) -> Vec<BoundingBox> {
        (0..n as i64)
            .map(|k| BoundingBox::new(10 + 60 * k, 10, 59 + 60 * k, 59, 0.9))
            .collect()
    }

    fn image() -> Image {
        Image::from_rgb(RgbImage::new(400, 100))
    }

    fn pipeline(n: usize, descriptors: Vec<FaceDescriptor>) -> Pipeline {
        let detector = FakeDetector { boxes: boxes(n), seen: Default::default() };
        Pipeline::new(Box::new(detector)).with_recognition(
            Box::new(FakeLandmarks),
            Box::new(FakeExtractor { queue: descriptors.into() }),
        )
    }

    #[test]
    fn test_zero_faces() {
        let report = pipeline(0, vec![]).recognize(&image()).unwrap();
        assert!(report.faces.is_empty());
        assert_eq!(report.comparison, ComparisonOutcome::Skipped);
        assert_eq!(report.to_string(), "\nTotal faces found: 0\n");
    }

    #[test]
    fn test_one_face_no_comparison() {
        let report = pipeline(1, vec![at(0.0, "fake")]).recognize(&image()).unwrap();
        assert_eq!(report.faces.len(), 1);
        assert_eq!(report.comparison, ComparisonOutcome::Skipped);

        let text = report.to_string();
        assert!(text.contains("Face 1 has 68 landmarks."));
        assert!(text.contains("Face descriptor size: 128"));
        assert!(!text.contains("Comparing faces"));
        assert!(text.ends_with("Total faces found: 1\n"));
    }

    #[test]
    fn test_two_faces_same_person() {
        let report = pipeline(2, vec![at(0.0, "fake"), at(0.45, "fake")])
            .recognize(&image())
            .unwrap();
        let ComparisonOutcome::Completed(results) = &report.comparison else {
            panic!("expected comparisons, got {:?}", report.comparison);
        };
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].verdict, Verdict::SamePerson);

        let text = report.to_string();
        assert!(text.contains("Distance between face 1 and face 2: 0.45\n"));
        assert!(text.contains("These faces are likely the same person"));
    }

    #[test]
    fn test_two_faces_different_people() {
        let report = pipeline(2, vec![at(0.0, "fake"), at(0.75, "fake")])
            .recognize(&image())
            .unwrap();
        let text = report.to_string();
        assert!(text.contains("Distance between face 1 and face 2: 0.75\n"));
        assert!(text.contains("These faces are different people"));
    }

    #[test]
    fn test_three_faces_pair_order() {
        let report = pipeline(3, vec![at(0.0, "fake"), at(0.3, "fake"), at(1.0, "fake")])
            .recognize(&image())
            .unwrap();
        let ComparisonOutcome::Completed(results) = report.comparison else {
            panic!("expected comparisons");
        };
        let pairs: Vec<_> = results.iter().map(|r| (r.i, r.j)).collect();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_mismatched_models_abort_comparison_only() {
        let report = pipeline(2, vec![at(0.0, "fake"), at(0.1, "other")])
            .recognize(&image())
            .unwrap();
        assert_eq!(report.faces.len(), 2);
        assert!(matches!(report.comparison, ComparisonOutcome::Aborted(_)));

        let text = report.to_string();
        assert!(text.contains("Face 2 has 68 landmarks."));
        assert!(text.contains("Comparison aborted"));
        assert!(!text.contains("Distance between"));
    }

    #[test]
    fn test_descriptor_failure_names_face() {
        let err = pipeline(2, vec![at(0.0, "fake")]).recognize(&image()).unwrap_err();
        assert!(matches!(err, PipelineError::Descriptor { face: 1, .. }));
    }

    #[test]
    fn test_recognize_without_models() {
        let detector = FakeDetector { boxes: boxes(1), seen: Default::default() };
        let err = Pipeline::new(Box::new(detector)).recognize(&image()).unwrap_err();
        assert!(matches!(err, PipelineError::RecognitionUnavailable));
    }

    #[test]
    fn test_custom_threshold_applies() {
        let report = pipeline(2, vec![at(0.0, "fake"), at(0.45, "fake")])
            .with_comparator(FaceComparator::new(0.4).unwrap())
            .recognize(&image())
            .unwrap();
        assert_eq!(report.threshold, 0.4);
        let ComparisonOutcome::Completed(results) = report.comparison else {
            panic!("expected comparisons");
        };
        assert_eq!(results[0].verdict, Verdict::DifferentPeople);
    }

    #[test]
    fn test_detect_upsample_maps_back() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let detector = FakeDetector {
            boxes: vec![BoundingBox::new(40, 20, 119, 99, 0.8)],
            seen: Arc::clone(&seen),
        };
        let report = Pipeline::new(Box::new(detector))
            .with_upsample(1)
            .unwrap()
            .detect(&image())
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(800, 200)]);
        let b = report.faces[0];
        assert_eq!((b.left, b.top, b.right, b.bottom), (20, 10, 59, 49));
    }

    #[test]
    fn test_detect_upsample_edge_box_stays_inside() {
        // Face touching the right and bottom edges of the 800x200 enlargement.
        let detector = FakeDetector {
            boxes: vec![BoundingBox::new(700, 150, 799, 199, 0.9)],
            seen: Default::default(),
        };
        let report = Pipeline::new(Box::new(detector))
            .with_upsample(1)
            .unwrap()
            .detect(&image())
            .unwrap();

        let b = report.faces[0];
        assert_eq!((b.left, b.top, b.right, b.bottom), (350, 75, 399, 99));
        assert!(report.to_string().contains("Right=399, Bottom=99"));
    }

    #[test]
    fn test_report_names_extractor_model() {
        let report = pipeline(1, vec![at(0.0, "fake")]).recognize(&image()).unwrap();
        assert_eq!(report.descriptor_model, "fake");
    }

    #[test]
    fn test_upsample_limit() {
        let detector = FakeDetector { boxes: vec![], seen: Default::default() };
        assert!(matches!(
            Pipeline::new(Box::new(detector)).with_upsample(MAX_UPSAMPLE + 1),
            Err(PipelineError::UpsampleTooLarge(_))
        ));
    }
}
