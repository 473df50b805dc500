//! Human-readable and serializable results of a pipeline run.

use crate::comparator::{ComparisonResult, Verdict};
use crate::types::{BoundingBox, FaceDescriptor, InvalidDescriptorError, LandmarkSet};
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionReport {
    pub faces: Vec<BoundingBox>,
}

/// Everything computed for one detected face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceAnalysis {
    pub bbox: BoundingBox,
    pub landmarks: LandmarkSet,
    pub descriptor: FaceDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ComparisonOutcome {
    /// Fewer than two descriptors.
    Skipped,
    Completed(Vec<ComparisonResult>),
    /// The comparison step failed; per-face results are still valid.
    Aborted(#[serde(serialize_with = "display")] InvalidDescriptorError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionReport {
    pub faces: Vec<FaceAnalysis>,
    /// Extractor that produced every descriptor in `faces`.
    pub descriptor_model: String,
    pub threshold: f64,
    pub comparison: ComparisonOutcome,
}

fn display<T: fmt::Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Six significant digits with trailing zeros dropped (`0.45`, `1.23457`).
pub fn format_distance(distance: f64) -> String {
    if distance == 0.0 || !distance.is_finite() {
        return distance.to_string();
    }
    let magnitude = distance.abs().log10().floor() as i32;
    let decimals = (5 - magnitude).max(0) as usize;
    let s = format!("{distance:.decimals$}");
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

impl fmt::Display for DetectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Found {} faces in the image.", self.faces.len())?;
        for (n, face) in self.faces.iter().enumerate() {
            writeln!(
                f,
                "Face {}: Left={}, Top={}, Right={}, Bottom={}",
                n + 1,
                face.left,
                face.top,
                face.right,
                face.bottom
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for RecognitionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, face) in self.faces.iter().enumerate() {
            let (left, right) = (face.landmarks.left_eye(), face.landmarks.right_eye());
            writeln!(f, "Face {} has {} landmarks.", n + 1, face.landmarks.len())?;
            writeln!(f, "Left eye:  ({},{})", left.x, left.y)?;
            writeln!(f, "Right eye: ({},{})", right.x, right.y)?;
            writeln!(f, "Face descriptor size: {}", face.descriptor.len())?;
        }

        match &self.comparison {
            ComparisonOutcome::Skipped => {}
            ComparisonOutcome::Completed(results) => {
                writeln!(f, "\nComparing faces:")?;
                for r in results {
                    writeln!(
                        f,
                        "Distance between face {} and face {}: {}",
                        r.i + 1,
                        r.j + 1,
                        format_distance(r.distance)
                    )?;
                    let verdict = match r.verdict {
                        Verdict::SamePerson => "likely the same person",
                        Verdict::DifferentPeople => "different people",
                    };
                    writeln!(f, "These faces are {verdict}")?;
                }
            }
            ComparisonOutcome::Aborted(err) => {
                writeln!(f, "\nComparison aborted: {err}")?;
            }
        }

        writeln!(f, "\nTotal faces found: {}", self.faces.len())
    }
}
