//! facedist-core — Face detection, landmarks, descriptors and comparison.
//!
//! Pretrained models run through ONNX Runtime behind the traits in
//! [`capability`]: SCRFD for detection, a 68-point landmark regressor, and a
//! ResNet metric network producing 128-dimensional descriptors that are
//! compared by Euclidean distance.

pub mod alignment;
pub mod capability;
pub mod comparator;
pub mod detector;
pub mod imaging;
pub mod landmarks;
pub mod pipeline;
pub mod recognizer;
pub mod report;
pub mod types;

use std::path::PathBuf;

pub use alignment::extract_aligned_chip;
pub use capability::{DescriptorExtractor, FaceDetector, LandmarkPredictor};
pub use comparator::{ComparisonResult, FaceComparator, Verdict, DEFAULT_SAME_PERSON_THRESHOLD};
pub use detector::OnnxFaceDetector;
pub use imaging::{load_image, Image};
pub use landmarks::OnnxLandmarkPredictor;
pub use pipeline::{Pipeline, PipelineError};
pub use recognizer::OnnxDescriptorExtractor;
pub use report::{ComparisonOutcome, DetectionReport, RecognitionReport};
pub use types::{BoundingBox, FaceDescriptor, InvalidDescriptorError, LandmarkSet, Point};

/// `$XDG_DATA_HOME/facedist/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facedist")
        .join("models")
}
