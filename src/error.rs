//! Error types
//!
//! Fatal failures (bad input, missing models, broken detection) surface as
//! [`OcrError`]. Failures scoped to a single region surface as [`RegionError`]
//! and never leave the orchestrator.

use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a pipeline run (or engine construction)
#[derive(Debug, Error)]
pub enum OcrError {
    /// Supplied bytes or path could not be decoded into a pixel buffer
    #[error("failed to decode input image: {message}")]
    InputDecode { message: String },

    /// A model artifact is missing or malformed
    #[error("failed to load model {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    /// The detection model invocation failed or produced an unusable tensor
    #[error("detection failed: {message}")]
    DetectionInvocation { message: String },

    /// Engine configuration is inconsistent
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl OcrError {
    pub fn input_decode(message: impl Into<String>) -> Self {
        Self::InputDecode { message: message.into() }
    }

    pub fn model_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn detection(message: impl Into<String>) -> Self {
        Self::DetectionInvocation { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }
}

impl From<image::ImageError> for OcrError {
    fn from(err: image::ImageError) -> Self {
        Self::input_decode(err.to_string())
    }
}

/// Failures isolated to one detected region
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    /// The crop rectangle has zero width or height
    #[error("region {index} has a degenerate crop ({width}x{height})")]
    Degenerate { index: usize, width: u32, height: u32 },

    /// Tensor preparation or model invocation failed
    #[error("recognition failed for region {index}: {message}")]
    Recognition { index: usize, message: String },

    /// The recognition task panicked
    #[error("recognition task for region {index} panicked: {message}")]
    Panicked { index: usize, message: String },

    /// No worker ever picked the region up
    #[error("region {index} was never dispatched")]
    NotDispatched { index: usize },
}

impl RegionError {
    pub fn index(&self) -> usize {
        match self {
            Self::Degenerate { index, .. }
            | Self::Recognition { index, .. }
            | Self::Panicked { index, .. }
            | Self::NotDispatched { index } => *index,
        }
    }

    /// Degenerate crops are expected for tiny boxes and are not counted as failures
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::Degenerate { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_error_index() {
        let err = RegionError::Recognition {
            index: 3,
            message: "boom".to_string(),
        };
        assert_eq!(err.index(), 3);
        assert!(!err.is_degenerate());

        let err = RegionError::Degenerate { index: 1, width: 0, height: 4 };
        assert_eq!(err.index(), 1);
        assert!(err.is_degenerate());
    }

    #[test]
    fn test_model_load_message_contains_path() {
        let err = OcrError::model_load("/models/craft.onnx", "file not found");
        let msg = err.to_string();
        assert!(msg.contains("/models/craft.onnx"));
        assert!(msg.contains("file not found"));
    }
}
