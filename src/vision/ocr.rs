//! OCR result types and assembly

use serde::{Deserialize, Serialize};

use super::geometry::{CropRect, OrientedBox};
use crate::error::RegionError;

/// One region in the serialized result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionLabel {
    /// `[[x_min, y_min], [x_max, y_max]]` in original-image pixels
    #[serde(rename = "box")]
    pub bounds: [[i32; 2]; 2],
    pub label: String,
}

/// Final text plus every region in detection order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrResult {
    pub final_text: String,
    pub boxes: Vec<RegionLabel>,
}

impl OcrResult {
    /// Build the result from per-region outcomes already in detection order.
    ///
    /// Every region is listed; only non-empty labels make it into
    /// `final_text`, joined by single spaces.
    pub fn assemble(outcomes: &[RegionOutcome]) -> Self {
        let boxes: Vec<RegionLabel> = outcomes
            .iter()
            .map(|o| RegionLabel {
                bounds: o.crop.corners(),
                label: o.label().to_string(),
            })
            .collect();

        let final_text = boxes
            .iter()
            .map(|b| b.label.as_str())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Self { final_text, boxes }
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

/// Everything known about one region after recognition
#[derive(Debug, Clone)]
pub struct RegionOutcome {
    /// Detection index
    pub index: usize,
    /// Box in original-image pixels, clockwise from the minimal-sum vertex
    pub polygon: OrientedBox,
    pub crop: CropRect,
    pub result: Result<String, RegionError>,
}

impl RegionOutcome {
    /// Decoded label, or empty when recognition did not produce one
    pub fn label(&self) -> &str {
        self.result.as_deref().unwrap_or("")
    }
}

/// Stage timings and region counts for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub preprocess_ms: u64,
    pub detection_ms: u64,
    pub postprocess_ms: u64,
    pub recognition_ms: u64,
    pub total_ms: u64,
    /// Boxes that survived post-processing
    pub regions_detected: usize,
    /// Regions with a non-empty label
    pub regions_recognized: usize,
    /// Regions recognized as empty text
    pub regions_empty: usize,
    /// Regions whose crop had zero extent
    pub regions_degenerate: usize,
    /// Regions whose recognition errored, panicked or never ran
    pub regions_failed: usize,
}

impl RunStats {
    /// Fill in the region counters from the outcomes
    pub fn tally(&mut self, outcomes: &[RegionOutcome]) {
        self.regions_detected = outcomes.len();
        self.regions_recognized = 0;
        self.regions_empty = 0;
        self.regions_degenerate = 0;
        self.regions_failed = 0;

        for outcome in outcomes {
            match &outcome.result {
                Ok(label) if label.is_empty() => self.regions_empty += 1,
                Ok(_) => self.regions_recognized += 1,
                Err(e) if e.is_degenerate() => self.regions_degenerate += 1,
                Err(_) => self.regions_failed += 1,
            }
        }
    }
}

/// A result together with per-region detail and run statistics
#[derive(Debug, Clone)]
pub struct OcrReport {
    pub result: OcrResult,
    pub regions: Vec<RegionOutcome>,
    pub stats: RunStats,
}
