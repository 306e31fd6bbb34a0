//! docscan - text extraction from document images
//!
//! Locates text regions with a character-region detection model and reads
//! each region with a sequence recognition model, both run through ONNX
//! Runtime. Results keep the detection order regardless of how the
//! recognition work is scheduled.

pub mod config;
pub mod error;
pub mod input;
pub mod storage;
pub mod vision;

pub use config::AppConfig;
pub use error::{OcrError, RegionError};
pub use input::{ChannelOrder, PixelBuffer};
pub use vision::{OcrEngine, OcrReport, OcrResult, PipelineStage, RegionLabel};
