//! ResNet metric-learning descriptor network via ONNX Runtime.
//!
//! Produces 128-dimensional descriptors from 150×150 aligned RGB chips.
//! Outputs are used as-is: the same-person threshold is calibrated on the
//! raw network output, so no L2 re-normalisation is applied.

use crate::alignment::{DEFAULT_CHIP_PADDING, DEFAULT_CHIP_SIZE};
use crate::capability::{DescriptorExtractor, InferenceError, ModelLoadError};
use crate::imaging::Image;
use crate::types::FaceDescriptor;
use image::imageops::FilterType;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

pub const DESCRIPTOR_MODEL_FILE: &str = "dlib_face_recognition_resnet_model_v1.onnx";
pub const DESCRIPTOR_MODEL_ID: &str = "dlib_resnet_v1";

/// Per-channel means (R, G, B) subtracted before scaling.
const RESNET_CHANNEL_MEAN: [f32; 3] = [122.782, 117.001, 104.298];
const RESNET_SCALE: f32 = 256.0;

/// Descriptor extractor backed by the ResNet metric network.
pub struct OnnxDescriptorExtractor {
    session: Session,
    chip_padding: f32,
}

impl OnnxDescriptorExtractor {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ModelLoadError> {
        if !model_path.exists() {
            return Err(ModelLoadError::NotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded descriptor model"
        );

        Ok(Self {
            session,
            chip_padding: DEFAULT_CHIP_PADDING,
        })
    }

    pub fn with_chip_padding(mut self, padding: f32) -> Self {
        self.chip_padding = padding;
        self
    }

    /// Chip to NCHW tensor. Chips of the wrong size are resized first.
    fn preprocess(chip: &Image) -> Array4<f32> {
        let size = DEFAULT_CHIP_SIZE;
        let resized;
        let pixels = if chip.width() == size && chip.height() == size {
            chip.rgb()
        } else {
            tracing::warn!(
                width = chip.width(),
                height = chip.height(),
                "resizing chip to {size}x{size}"
            );
            resized = image::imageops::resize(chip.rgb(), size, size, FilterType::Triangle);
            &resized
        };

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in pixels.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 - RESNET_CHANNEL_MEAN[c]) / RESNET_SCALE;
            }
        }
        tensor
    }
}

impl DescriptorExtractor for OnnxDescriptorExtractor {
    fn model_id(&self) -> &str {
        DESCRIPTOR_MODEL_ID
    }

    fn chip_size(&self) -> u32 {
        DEFAULT_CHIP_SIZE
    }

    fn chip_padding(&self) -> f32 {
        self.chip_padding
    }

    fn compute(&mut self, chip: &Image) -> Result<FaceDescriptor, InferenceError> {
        let input = Self::preprocess(chip);
        let values = {
            let outputs =
                self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

            let (_, raw) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| InferenceError::Failed(format!("descriptor extraction: {e}")))?;
            raw.to_vec()
        };

        Ok(FaceDescriptor::from_vec(values, self.model_id())?)
    }
}
