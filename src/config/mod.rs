//! Engine Configuration
//!
//! Model locations, detection thresholds and worker settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::OcrError;

/// Default recognition alphabet; index 0 of the model output is the blank
pub const DEFAULT_ALPHABET: &str = "0123456789abcdefghijklmnopqrstuvwxyz";

/// Engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Model artifact locations
    pub models: ModelSettings,
    /// Detection input and heatmap post-processing
    pub detection: DetectionSettings,
    /// Recognition input and decoding
    pub recognition: RecognitionSettings,
    /// Thread settings
    pub performance: PerformanceConfig,
}

/// Where the two ONNX artifacts live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Detection (CRAFT) model path
    pub detection: PathBuf,
    /// Recognition (CRNN) model path
    pub recognition: PathBuf,
    /// Expected SHA-256 of the detection model (empty = skip)
    pub detection_sha256: String,
    /// Expected SHA-256 of the recognition model (empty = skip)
    pub recognition_sha256: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        let models_dir = crate::storage::default_models_dir();

        Self {
            detection: models_dir.join("craft.onnx"),
            recognition: models_dir.join("crnn.onnx"),
            detection_sha256: String::new(),
            recognition_sha256: String::new(),
        }
    }
}

/// Detection-stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Minimum peak text score for a component to survive
    pub text_threshold: f32,
    /// Binarization threshold for the link channel
    pub link_threshold: f32,
    /// Binarization threshold for the text channel
    pub low_text: f32,
    /// Components smaller than this many heatmap pixels are dropped
    pub min_area: u32,
    /// Width the image is resized to before detection
    pub input_width: u32,
    /// Height the image is resized to before detection
    pub input_height: u32,
    /// Downsampling stride of the detection model
    pub ratio_net: f32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            text_threshold: 0.7,
            link_threshold: 0.4,
            low_text: 0.4,
            min_area: 10,
            input_width: 600,
            input_height: 800,
            ratio_net: 2.0,
        }
    }
}

/// Recognition-stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Crop width fed to the recognition model
    pub input_width: u32,
    /// Crop height fed to the recognition model
    pub input_height: u32,
    /// Characters for class indices 1..=N
    pub alphabet: String,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            input_width: 100,
            input_height: 32,
            alphabet: DEFAULT_ALPHABET.to_string(),
        }
    }
}

/// Performance-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Recognition worker threads (0 = available parallelism)
    pub worker_threads: usize,
    /// ONNX Runtime intra-op threads per session
    pub intra_threads: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            intra_threads: 1,
        }
    }
}

impl PerformanceConfig {
    /// Resolve the worker count, falling back to the machine's parallelism
    pub fn effective_workers(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl AppConfig {
    /// Check value ranges the pipeline relies on
    pub fn validate(&self) -> Result<(), OcrError> {
        let det = &self.detection;
        for (name, value) in [
            ("text_threshold", det.text_threshold),
            ("link_threshold", det.link_threshold),
            ("low_text", det.low_text),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(OcrError::config(format!(
                    "detection.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if det.input_width == 0 || det.input_height == 0 {
            return Err(OcrError::config("detection input size must be non-zero"));
        }
        if det.ratio_net.is_nan() || det.ratio_net <= 0.0 {
            return Err(OcrError::config(format!(
                "detection.ratio_net must be positive, got {}",
                det.ratio_net
            )));
        }

        let rec = &self.recognition;
        if rec.input_width == 0 || rec.input_height == 0 {
            return Err(OcrError::config("recognition input size must be non-zero"));
        }
        if rec.alphabet.is_empty() {
            return Err(OcrError::config("recognition.alphabet must not be empty"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = rec.alphabet.chars().find(|c| !seen.insert(*c)) {
            return Err(OcrError::config(format!(
                "recognition.alphabet repeats character {:?}",
                dup
            )));
        }

        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
