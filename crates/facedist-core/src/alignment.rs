//! Aligned face chips via a 4-DOF similarity transform.
//!
//! The 68 predicted landmarks are fitted by least squares to a mean face
//! shape scaled into a square chip, and the chip is sampled from the source
//! image with bilinear interpolation. The descriptor network was trained on
//! chips cut this way, so the point subset and the mean shape must not
//! change independently of the landmark scheme.

use crate::imaging::Image;
use crate::types::{LandmarkSet, LANDMARK_COUNT};
use image::{Rgb, RgbImage};
use thiserror::Error;

/// Chip side length expected by the ResNet descriptor network.
pub const DEFAULT_CHIP_SIZE: u32 = 150;
/// Border around the mean face, as a fraction of the face width.
pub const DEFAULT_CHIP_PADDING: f32 = 0.25;

/// First landmark covered by the mean shape tables (jawline excluded).
const MEAN_SHAPE_OFFSET: usize = 17;

/// Mean face shape for landmarks 17..=67, normalised to the unit square.
const MEAN_FACE_SHAPE_X: [f64; LANDMARK_COUNT - MEAN_SHAPE_OFFSET] = [
    0.000213256, 0.0752622, 0.18113, 0.29077, 0.393397, 0.586856, 0.689483, 0.799124,
    0.904991, 0.98004, 0.490127, 0.490127, 0.490127, 0.490127, 0.36688, 0.426036,
    0.490127, 0.554217, 0.613373, 0.121737, 0.187122, 0.265825, 0.334606, 0.260918,
    0.182743, 0.645647, 0.714428, 0.793132, 0.858516, 0.79751, 0.719335, 0.254149,
    0.340985, 0.428858, 0.490127, 0.551395, 0.639268, 0.726104, 0.642159, 0.556721,
    0.490127, 0.423532, 0.338094, 0.290379, 0.428096, 0.490127, 0.552157, 0.689874,
    0.553364, 0.490127, 0.42689,
];

const MEAN_FACE_SHAPE_Y: [f64; LANDMARK_COUNT - MEAN_SHAPE_OFFSET] = [
    0.106454, 0.038915, 0.0187482, 0.0344891, 0.0773906, 0.0773906, 0.0344891,
    0.0187482, 0.038915, 0.106454, 0.203352, 0.307009, 0.409805, 0.515625, 0.587326,
    0.609345, 0.628106, 0.609345, 0.587326, 0.216423, 0.178758, 0.179852, 0.231733,
    0.245099, 0.244077, 0.231733, 0.179852, 0.178758, 0.216423, 0.244077, 0.245099,
    0.780233, 0.745405, 0.727388, 0.742578, 0.727388, 0.745405, 0.780233, 0.864805,
    0.902192, 0.909281, 0.902192, 0.864805, 0.784792, 0.778746, 0.785343, 0.778746,
    0.784792, 0.824182, 0.831803, 0.824182,
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignmentError {
    #[error("chip size must be positive")]
    ZeroSize,
    #[error("chip padding must be finite and non-negative, got {0}")]
    InvalidPadding(f32),
    #[error("landmarks are degenerate (all points coincide)")]
    Degenerate,
}

/// Landmarks that anchor the alignment: the eyes, nose and upper lip.
/// Eyebrows (17..=26) and the lower lip (55..=59, 65..=67) move too much
/// with expression.
fn is_anchor(index: usize) -> bool {
    (27..=54).contains(&index) || (60..=64).contains(&index)
}

/// Chip-space position of landmark `index` for the given chip geometry.
fn chip_anchor(index: usize, size: u32, padding: f64) -> (f64, f64) {
    let k = index - MEAN_SHAPE_OFFSET;
    let scale = size as f64 / (2.0 * padding + 1.0);
    (
        (padding + MEAN_FACE_SHAPE_X[k]) * scale,
        (padding + MEAN_FACE_SHAPE_Y[k]) * scale,
    )
}

/// 2×3 similarity transform `[a, -b, tx; b, a, ty]` stored as `(a, b, tx, ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f64,
    b: f64,
    tx: f64,
    ty: f64,
}

impl Similarity {
    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Least-squares fit of `from[i] -> to[i]`.
    ///
    /// Each correspondence contributes two rows of the overdetermined
    /// system `A * [a, b, tx, ty]^T = B`:
    /// ```text
    /// | fx  -fy  1  0 |   | tx_i |
    /// | fy   fx  0  1 | = | ty_i |
    /// ```
    fn fit(from: &[(f64, f64)], to: &[(f64, f64)]) -> Option<Similarity> {
        let mut normal = [[0.0f64; 5]; 4];

        for (&(fx, fy), &(tx, ty)) in from.iter().zip(to) {
            let rows = [([fx, -fy, 1.0, 0.0], tx), ([fy, fx, 0.0, 1.0], ty)];
            for (row, rhs) in rows {
                for j in 0..4 {
                    for k in 0..4 {
                        normal[j][k] += row[j] * row[k];
                    }
                    normal[j][4] += row[j] * rhs;
                }
            }
        }

        let [a, b, tx, ty] = solve_normal_equations(normal)?;
        if a.hypot(b) < 1e-9 {
            return None;
        }
        Some(Similarity { a, b, tx, ty })
    }
}

/// Gaussian elimination with partial pivoting on an augmented 4×5 system.
/// Returns `None` when the system is singular.
fn solve_normal_equations(mut m: [[f64; 5]; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r, &s| m[r][col].abs().total_cmp(&m[s][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for k in col..5 {
                m[row][k] -= factor * m[col][k];
            }
        }
    }

    let mut x = [0.0f64; 4];
    for i in (0..4).rev() {
        let tail: f64 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (m[i][4] - tail) / m[i][i];
    }
    Some(x)
}

/// Bilinear sample at a sub-pixel position; black outside the image.
pub(crate) fn sample_bilinear(src: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (w, h) = (src.width() as i64, src.height() as i64);
    // Reject before the integer casts so `x0 + 1` cannot overflow.
    if !(x > -1.0 && y > -1.0 && x < w as f64 && y < h as f64) {
        return Rgb([0, 0, 0]);
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let texel = |px: i64, py: i64| -> [f64; 3] {
        if px >= 0 && px < w && py >= 0 && py < h {
            let p = src.get_pixel(px as u32, py as u32).0;
            [p[0] as f64, p[1] as f64, p[2] as f64]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr) = (texel(x0, y0), texel(x0 + 1, y0));
    let (bl, br) = (texel(x0, y0 + 1), texel(x0 + 1, y0 + 1));
    Rgb(std::array::from_fn(|c| {
        let v = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
        v.round().clamp(0.0, 255.0) as u8
    }))
}

/// Fit the chip-to-image transform for a face.
fn chip_transform(
    landmarks: &LandmarkSet,
    size: u32,
    padding: f64,
) -> Result<Similarity, AlignmentError> {
    let (from, to): (Vec<_>, Vec<_>) = (MEAN_SHAPE_OFFSET..LANDMARK_COUNT)
        .filter(|&i| is_anchor(i))
        .map(|i| {
            let p = landmarks[i];
            (chip_anchor(i, size, padding), (p.x as f64, p.y as f64))
        })
        .unzip();

    Similarity::fit(&from, &to).ok_or(AlignmentError::Degenerate)
}

/// Cut a `size`×`size` face chip rotated and scaled so the landmarks line
/// up with the mean face shape, leaving `padding` (fraction of face width)
/// on every side.
pub fn extract_aligned_chip(
    image: &Image,
    landmarks: &LandmarkSet,
    size: u32,
    padding: f32,
) -> Result<Image, AlignmentError> {
    if size == 0 {
        return Err(AlignmentError::ZeroSize);
    }
    if !padding.is_finite() || padding < 0.0 {
        return Err(AlignmentError::InvalidPadding(padding));
    }

    let transform = chip_transform(landmarks, size, padding as f64)?;
    tracing::trace!(?transform, size, padding, "chip transform");

    let src = image.rgb();
    let chip = RgbImage::from_fn(size, size, |cx, cy| {
        let (ix, iy) = transform.apply(cx as f64, cy as f64);
        sample_bilinear(src, ix, iy)
    });

    Ok(Image::from_rgb(chip))
}
