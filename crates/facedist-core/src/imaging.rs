//! In-memory images and decoding from disk.

use image::imageops::FilterType;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("cannot read image {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image {0} has zero width or height")]
    ZeroDimensions(PathBuf),
}

/// An immutable RGB pixel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pixels: RgbImage,
}

impl Image {
    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.pixels
    }

    /// Resize by an integer factor with bilinear filtering.
    pub fn upsample(&self, factor: u32) -> Image {
        if factor <= 1 {
            return self.clone();
        }
        Image {
            pixels: image::imageops::resize(
                &self.pixels,
                self.width() * factor,
                self.height() * factor,
                FilterType::Triangle,
            ),
        }
    }
}

/// Decode an image file into RGB pixels.
pub fn load_image(path: impl AsRef<Path>) -> Result<Image, DecodeError> {
    let path = path.as_ref();
    let decoded = image::open(path).map_err(|source| DecodeError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(DecodeError::ZeroDimensions(path.to_path_buf()));
    }

    tracing::debug!(
        path = %path.display(),
        width = decoded.width(),
        height = decoded.height(),
        color = ?decoded.color(),
        "image decoded"
    );

    Ok(Image::from_rgb(decoded.to_rgb8()))
}
