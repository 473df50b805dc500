//! Same-person classification by descriptor distance.

use crate::types::{FaceDescriptor, InvalidDescriptorError};
use serde::Serialize;
use thiserror::Error;

/// Distance below which two descriptors from the ResNet metric network are
/// taken to be the same person. Tuned for that network only.
pub const DEFAULT_SAME_PERSON_THRESHOLD: f64 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("threshold must be finite and positive, got {0}")]
pub struct InvalidThreshold(pub f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    SamePerson,
    DifferentPeople,
}

impl Verdict {
    pub fn is_same_person(self) -> bool {
        self == Verdict::SamePerson
    }
}

/// Outcome of comparing descriptor `i` with descriptor `j` (`i < j`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub i: usize,
    pub j: usize,
    pub distance: f64,
    pub verdict: Verdict,
}

/// Euclidean distance comparator with a strict threshold cut.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceComparator {
    threshold: f64,
}

impl Default for FaceComparator {
    fn default() -> Self {
        Self { threshold: DEFAULT_SAME_PERSON_THRESHOLD }
    }
}

impl FaceComparator {
    pub fn new(threshold: f64) -> Result<Self, InvalidThreshold> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn distance(&self, a: &FaceDescriptor, b: &FaceDescriptor) -> f64 {
        a.euclidean_distance(b)
    }

    /// `SamePerson` iff `distance < threshold`; the boundary itself is
    /// `DifferentPeople`.
    pub fn classify(&self, distance: f64) -> Verdict {
        if distance < self.threshold {
            Verdict::SamePerson
        } else {
            Verdict::DifferentPeople
        }
    }

    /// Distance and verdict for one pair, refusing cross-model comparisons.
    pub fn compare(
        &self,
        a: &FaceDescriptor,
        b: &FaceDescriptor,
    ) -> Result<(f64, Verdict), InvalidDescriptorError> {
        if a.model() != b.model() {
            return Err(InvalidDescriptorError::ModelMismatch {
                left: a.model().to_string(),
                right: b.model().to_string(),
            });
        }
        let distance = self.distance(a, b);
        Ok((distance, self.classify(distance)))
    }

    /// Compare every unordered pair, ordered by `(i, j)` ascending.
    pub fn compare_all(
        &self,
        descriptors: &[FaceDescriptor],
    ) -> Result<Vec<ComparisonResult>, InvalidDescriptorError> {
        let n = descriptors.len();
        let mut results = Vec::with_capacity(n * n.saturating_sub(1) / 2);

        for i in 0..n {
            for j in (i + 1)..n {
                let (distance, verdict) = self.compare(&descriptors[i], &descriptors[j])?;
                tracing::trace!(i, j, distance, ?verdict, "pair compared");
                results.push(ComparisonResult { i, j, distance, verdict });
            }
        }

        Ok(results)
    }
}
