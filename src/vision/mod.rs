//! Vision/OCR Layer
//!
//! Runs the full text extraction pipeline on a decoded image:
//! preprocessing, one detection pass, heatmap post-processing, concurrent
//! per-region recognition, and assembly of the ordered result.

pub mod annotate;
pub mod decode;
pub mod detection;
pub mod geometry;
pub mod models;
pub mod ocr;
pub mod orchestrator;
pub mod preprocess;
pub mod recognition;

use parking_lot::Mutex;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::OcrError;
use crate::input::{self, PixelBuffer};

pub use detection::{DetectionHeatmap, HeatmapPostProcessor, ScoreMap, Thresholds};
pub use geometry::{CropRect, OrientedBox, Point};
pub use models::{DetectionModel, ModelKind, ModelManager, RecognitionModel, RecognizerPool};
pub use ocr::{OcrReport, OcrResult, RegionLabel, RegionOutcome, RunStats};
pub use orchestrator::Orchestrator;
pub use recognition::RegionRecognizer;

/// Stages of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Preprocessing,
    Detecting,
    PostProcessing,
    Recognizing,
    Assembled,
    Failed,
}

impl PipelineStage {
    /// The stage that follows on success
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Preprocessing),
            Self::Preprocessing => Some(Self::Detecting),
            Self::Detecting => Some(Self::PostProcessing),
            Self::PostProcessing => Some(Self::Recognizing),
            Self::Recognizing => Some(Self::Assembled),
            Self::Assembled | Self::Failed => None,
        }
    }

    /// Only the stages before recognition can fail the whole run
    pub fn may_fail(self) -> bool {
        matches!(self, Self::Preprocessing | Self::Detecting | Self::PostProcessing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Assembled | Self::Failed)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        self.successor() == Some(next) || (next == Self::Failed && self.may_fail())
    }
}

/// Tracks the current stage and how long the previous one took
struct StageTracker {
    stage: PipelineStage,
    entered: Instant,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            stage: PipelineStage::Idle,
            entered: Instant::now(),
        }
    }

    /// Move to `next`, returning the milliseconds spent in the stage just left
    fn advance(&mut self, next: PipelineStage) -> u64 {
        debug_assert!(self.stage.can_transition_to(next), "{:?} -> {:?}", self.stage, next);
        let elapsed = self.entered.elapsed().as_millis() as u64;
        debug!("Pipeline {:?} -> {:?} ({} ms)", self.stage, next, elapsed);
        self.stage = next;
        self.entered = Instant::now();
        elapsed
    }

    fn fail(&mut self, err: OcrError) -> OcrError {
        debug!("Pipeline {:?} -> Failed: {}", self.stage, err);
        self.stage = PipelineStage::Failed;
        err
    }
}

/// One region queued for recognition
struct RegionJob {
    polygon: OrientedBox,
    crop: CropRect,
}

/// Text extraction engine. Construct once and reuse across runs.
pub struct OcrEngine {
    config: AppConfig,
    detector: Mutex<Box<dyn DetectionModel>>,
    recognizers: RecognizerPool,
    postprocessor: HeatmapPostProcessor,
    recognizer: RegionRecognizer,
    orchestrator: Orchestrator,
}

impl OcrEngine {
    /// Verify and load both ONNX models named in the configuration
    pub fn from_config(config: &AppConfig) -> Result<Self, OcrError> {
        config.validate()?;

        let manager = ModelManager::new(config.models.clone());
        let detection = manager.verify(ModelKind::Detection)?;
        let recognition = manager.verify(ModelKind::Recognition)?;

        for model in [&detection, &recognition] {
            if let Err(e) = manager.record_verified(model) {
                warn!("Could not update model manifest for {}: {:#}", model.kind.display_name(), e);
            }
        }

        let intra_threads = config.performance.intra_threads;
        let workers = config.performance.effective_workers();

        let detector = models::OnnxDetector::new(&detection.path, intra_threads)?;
        let recognizers = RecognizerPool::from_onnx(&recognition.path, workers, intra_threads)?;

        Self::with_models(Box::new(detector), recognizers, config)
    }

    /// Build an engine around already loaded models
    pub fn with_models(
        detector: Box<dyn DetectionModel>,
        recognizers: RecognizerPool,
        config: &AppConfig,
    ) -> Result<Self, OcrError> {
        config.validate()?;

        let workers = config.performance.effective_workers().min(recognizers.len());
        info!(
            "OCR engine ready: {} recognition workers, detection input {}x{}",
            workers, config.detection.input_width, config.detection.input_height
        );

        Ok(Self {
            config: config.clone(),
            detector: Mutex::new(detector),
            recognizers,
            postprocessor: HeatmapPostProcessor::new(Thresholds::from(&config.detection)),
            recognizer: RegionRecognizer::new(&config.recognition),
            orchestrator: Orchestrator::new(workers),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn workers(&self) -> usize {
        self.orchestrator.workers()
    }

    /// Extract text from a decoded image
    pub fn run(&self, image: &PixelBuffer) -> Result<OcrResult, OcrError> {
        self.run_detailed(image).map(|report| report.result)
    }

    /// Decode an image file, then extract text from it
    pub fn run_path(&self, path: impl AsRef<Path>) -> Result<OcrResult, OcrError> {
        let image = input::load_path(path)?;
        self.run(&image)
    }

    /// Decode an encoded image held in memory, then extract text from it
    pub fn run_bytes(&self, bytes: &[u8]) -> Result<OcrResult, OcrError> {
        let image = input::load_bytes(bytes)?;
        self.run(&image)
    }

    /// Decode a base64 (optionally data-URI) payload, then extract text from it
    pub fn run_base64(&self, payload: &str) -> Result<OcrResult, OcrError> {
        let image = input::load_base64(payload)?;
        self.run(&image)
    }

    /// Extract text and report per-region outcomes and stage timings
    pub fn run_detailed(&self, image: &PixelBuffer) -> Result<OcrReport, OcrError> {
        let started = Instant::now();
        let mut stats = RunStats::default();
        let mut tracker = StageTracker::new();
        let det = &self.config.detection;

        tracker.advance(PipelineStage::Preprocessing);
        let tensor = preprocess::prepare_detection_input(image.as_image(), det.input_width, det.input_height);
        let ratio_w = image.width() as f32 / det.input_width as f32;
        let ratio_h = image.height() as f32 / det.input_height as f32;

        stats.preprocess_ms = tracker.advance(PipelineStage::Detecting);
        let output = {
            let mut detector = self.detector.lock();
            detector.detect(tensor.view())
        };
        let output = match output {
            Ok(output) => output,
            Err(e) => return Err(tracker.fail(OcrError::detection(format!("{:#}", e)))),
        };

        stats.detection_ms = tracker.advance(PipelineStage::PostProcessing);
        let heatmap = match DetectionHeatmap::from_model_output(output.view()) {
            Ok(heatmap) => heatmap,
            Err(e) => return Err(tracker.fail(e)),
        };

        let mut report = self.recognize_heatmap(&heatmap, ratio_w, ratio_h, image, &mut tracker, stats);
        report.stats.total_ms = started.elapsed().as_millis() as u64;

        info!(
            "OCR run: {} regions, {} recognized, {} failed in {} ms",
            report.stats.regions_detected,
            report.stats.regions_recognized,
            report.stats.regions_failed,
            report.stats.total_ms
        );
        Ok(report)
    }

    /// Post-process an already computed heatmap, recognize every region in
    /// `image`, and assemble the result
    pub fn process_heatmap(
        &self,
        heatmap: &DetectionHeatmap,
        ratio_w: f32,
        ratio_h: f32,
        image: &PixelBuffer,
    ) -> OcrResult {
        let mut tracker = StageTracker {
            stage: PipelineStage::PostProcessing,
            entered: Instant::now(),
        };
        self.recognize_heatmap(heatmap, ratio_w, ratio_h, image, &mut tracker, RunStats::default())
            .result
    }

    fn recognize_heatmap(
        &self,
        heatmap: &DetectionHeatmap,
        ratio_w: f32,
        ratio_h: f32,
        image: &PixelBuffer,
        tracker: &mut StageTracker,
        mut stats: RunStats,
    ) -> OcrReport {
        let ratio_net = self.config.detection.ratio_net;
        let jobs: Vec<RegionJob> = self
            .postprocessor
            .process(heatmap)
            .into_iter()
            .map(|candidate| {
                let polygon = candidate.bounds.rescale(ratio_w, ratio_h, ratio_net);
                RegionJob {
                    polygon,
                    crop: polygon.crop_rect(),
                }
            })
            .collect();

        stats.postprocess_ms = tracker.advance(PipelineStage::Recognizing);
        let recognizer = &self.recognizer;
        let results = self
            .orchestrator
            .dispatch(&jobs, self.recognizers.handles(), |model, index, job: &RegionJob| {
                recognizer.recognize(&mut **model, image, &job.crop, index)
            });

        let regions: Vec<RegionOutcome> = jobs
            .into_iter()
            .zip(results)
            .enumerate()
            .map(|(index, (job, result))| {
                match &result {
                    Err(e) if e.is_degenerate() => debug!("{}", e),
                    Err(e) => warn!("{}", e),
                    Ok(_) => {}
                }
                RegionOutcome {
                    index,
                    polygon: job.polygon,
                    crop: job.crop,
                    result,
                }
            })
            .collect();

        stats.recognition_ms = tracker.advance(PipelineStage::Assembled);
        stats.tally(&regions);

        OcrReport {
            result: OcrResult::assemble(&regions),
            regions,
            stats,
        }
    }
}
