use locus_match::QueryFeatures;
use thiserror::Error;

use crate::config::DescriberPreset;

/// Error raised by a feature describer.
#[derive(Debug, Error)]
#[error("feature extraction failed: {0}")]
pub struct DescribeError(pub String);

/// One captured grayscale query image, owned by the caller.
#[derive(Debug, Clone)]
pub struct QueryImage {
    /// Row-major 8-bit grayscale pixels.
    pub pixels: Vec<u8>,
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
}

impl QueryImage {
    /// Wrap a grayscale buffer, checking its dimensions.
    pub fn new(pixels: Vec<u8>, width: usize, height: usize) -> Result<Self, DescribeError> {
        if pixels.len() != width * height {
            return Err(DescribeError(format!(
                "buffer holds {} bytes, {}x{} needs {}",
                pixels.len(),
                width,
                height,
                width * height
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// Image dimensions as (width, height).
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

/// External collaborator turning raw pixels into keypoints + descriptors.
///
/// The localization engine never implements feature extraction itself; it
/// calls this seam when handed a raw image instead of pre-extracted
/// features.
pub trait FeatureDescriber: Send + Sync {
    /// Detect keypoints and compute their descriptors.
    fn describe(
        &self,
        image: &QueryImage,
        preset: DescriberPreset,
    ) -> Result<QueryFeatures, DescribeError>;
}

/// Describer that extracts nothing.
///
/// Placeholder for callers that only ever use the pre-extracted-features
/// entry points; any raw-image localization through it fails cleanly.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDescriber;

impl FeatureDescriber for NullDescriber {
    fn describe(
        &self,
        _image: &QueryImage,
        _preset: DescriberPreset,
    ) -> Result<QueryFeatures, DescribeError> {
        Err(DescribeError(
            "no feature describer configured for raw images".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_image_dimension_check() {
        assert!(QueryImage::new(vec![0; 12], 4, 3).is_ok());
        assert!(QueryImage::new(vec![0; 11], 4, 3).is_err());
    }

    #[test]
    fn test_null_describer_fails() {
        let image = QueryImage::new(vec![0; 4], 2, 2).unwrap();
        assert!(NullDescriber
            .describe(&image, DescriberPreset::Normal)
            .is_err());
    }
}
