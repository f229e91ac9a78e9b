//! Error types for the CAM tools crate.

use g2burn_core::GenerationError;
use thiserror::Error;

/// Errors that can occur during CAM tool operations.
#[derive(Error, Debug)]
pub enum CamToolError {
    /// Raster conversion or motion generation rejected its input.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The image file could not be opened or decoded.
    #[error("Failed to load image: {0}")]
    ImageLoad(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_error_passes_through() {
        let err: CamToolError = GenerationError::image("empty pixel matrix").into();
        assert_eq!(err.to_string(), "Invalid image: empty pixel matrix");
    }
}
