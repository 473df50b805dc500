//! Seams between the pipeline and the pretrained models.
//!
//! The ONNX-backed implementations live in [`crate::detector`],
//! [`crate::landmarks`] and [`crate::recognizer`]; tests substitute fakes
//! that return fixed boxes, landmarks and descriptors.

use crate::imaging::Image;
use crate::types::{BoundingBox, FaceDescriptor, InvalidDescriptorError, LandmarkSet};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("model file not found: {0} (set FACEDIST_MODEL_DIR or --model-dir)")]
    NotFound(PathBuf),
    #[error("model {path} is incompatible: {reason}")]
    Incompatible { path: PathBuf, reason: String },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("inference failed: {0}")]
    Failed(String),
    #[error("face box {0:?} lies outside the image")]
    EmptyCrop(BoundingBox),
    #[error("network produced an invalid descriptor: {0}")]
    Descriptor(#[from] InvalidDescriptorError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds faces in an image.
pub trait FaceDetector {
    /// Boxes for every detected face, possibly none.
    fn detect(&mut self, image: &Image) -> Result<Vec<BoundingBox>, InferenceError>;
}

/// Predicts the 68-point landmark set for one face.
pub trait LandmarkPredictor {
    fn predict(&mut self, image: &Image, face: &BoundingBox) -> Result<LandmarkSet, InferenceError>;
}

/// Computes a descriptor from an aligned face chip.
pub trait DescriptorExtractor {
    /// Identifier stamped on every descriptor this extractor produces.
    fn model_id(&self) -> &str;

    /// Side length of the square chip the network expects.
    fn chip_size(&self) -> u32;

    /// Padding around the mean face shape used when cutting the chip.
    fn chip_padding(&self) -> f32;

    fn compute(&mut self, chip: &Image) -> Result<FaceDescriptor, InferenceError>;
}
