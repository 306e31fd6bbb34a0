//! Model handles for ONNX Runtime
//!
//! The engine talks to models through [`DetectionModel`] and
//! [`RecognitionModel`] so that ONNX sessions and test doubles are
//! interchangeable. Recognition handles are not shareable between threads
//! while running, so the engine keeps one per worker in a [`RecognizerPool`].

use anyhow::{Context, Result};
use ndarray::{Array3, Array4, ArrayView4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::ModelSettings;
use crate::error::OcrError;

/// Text detection model: `[1, 3, H, W]` image in, two-channel heatmap out
pub trait DetectionModel: Send {
    fn detect(&mut self, input: ArrayView4<f32>) -> Result<Array4<f32>>;
}

/// Text recognition model: `[1, 1, H, W]` crop in, `[1, T, C]` class scores out
pub trait RecognitionModel: Send {
    fn infer(&mut self, input: ArrayView4<f32>) -> Result<Array3<f32>>;
}

/// Which of the two artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Character-region detector (CRAFT)
    Detection,
    /// Cropped-word recognizer (CRNN)
    Recognition,
}

impl ModelKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::Detection => "Text Detection",
            ModelKind::Recognition => "Text Recognition",
        }
    }
}

/// Manifest of verified model files, stored next to the detection model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub kind: ModelKind,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Unix seconds
    pub recorded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// A model file that passed [`ModelManager::verify`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedModel {
    pub kind: ModelKind,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Set when a configured checksum was checked
    pub sha256: Option<String>,
}

/// Locates and verifies the model artifacts named in the configuration
pub struct ModelManager {
    settings: ModelSettings,
}

impl ModelManager {
    pub fn new(settings: ModelSettings) -> Self {
        Self { settings }
    }

    pub fn model_path(&self, kind: ModelKind) -> &Path {
        match kind {
            ModelKind::Detection => &self.settings.detection,
            ModelKind::Recognition => &self.settings.recognition,
        }
    }

    fn expected_sha256(&self, kind: ModelKind) -> Option<&str> {
        let expected = match kind {
            ModelKind::Detection => &self.settings.detection_sha256,
            ModelKind::Recognition => &self.settings.recognition_sha256,
        };
        let expected = expected.trim();
        (!expected.is_empty()).then_some(expected)
    }

    /// Check that a model file exists and is not empty
    pub fn is_model_available(&self, kind: ModelKind) -> bool {
        std::fs::metadata(self.model_path(kind))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    pub fn are_models_ready(&self) -> bool {
        self.is_model_available(ModelKind::Detection)
            && self.is_model_available(ModelKind::Recognition)
    }

    /// Availability and size of each model
    pub fn get_model_status(&self) -> Vec<(ModelKind, bool, Option<u64>)> {
        [ModelKind::Detection, ModelKind::Recognition]
            .into_iter()
            .map(|kind| {
                let size = std::fs::metadata(self.model_path(kind)).ok().map(|m| m.len());
                (kind, self.is_model_available(kind), size)
            })
            .collect()
    }

    /// Verify a model file before loading it: present, non-empty, and
    /// matching the configured checksum when one is set
    pub fn verify(&self, kind: ModelKind) -> Result<VerifiedModel, OcrError> {
        let path = self.model_path(kind);

        let metadata = std::fs::metadata(path)
            .map_err(|e| OcrError::model_load(path, format!("cannot read file: {}", e)))?;
        if !metadata.is_file() {
            return Err(OcrError::model_load(path, "not a regular file"));
        }
        if metadata.len() == 0 {
            return Err(OcrError::model_load(path, "file is empty"));
        }

        let mut sha256 = None;
        if let Some(expected) = self.expected_sha256(kind) {
            let actual = sha256_file(path)
                .map_err(|e| OcrError::model_load(path, format!("cannot hash file: {}", e)))?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(OcrError::model_load(
                    path,
                    format!("checksum mismatch: expected {}, got {}", expected, actual),
                ));
            }
            info!("Checksum verified for {}", kind.display_name());
            sha256 = Some(actual);
        }

        Ok(VerifiedModel {
            kind,
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            sha256,
        })
    }

    /// Where the manifest lives: beside the detection model
    pub fn manifest_path(&self) -> PathBuf {
        self.model_path(ModelKind::Detection)
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("manifest.json")
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.manifest_path();
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: ModelManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(self.manifest_path(), content)?;
        Ok(())
    }

    /// Record the size and checksum of a verified model in the manifest.
    ///
    /// Returns `false` without hashing or writing when the manifest entry
    /// already matches the file's name and size (and the checksum
    /// computed during verification, if any).
    pub fn record_verified(&self, model: &VerifiedModel) -> Result<bool> {
        let mut manifest = self.load_manifest().unwrap_or_default();

        let filename = model
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let existing = manifest.models.iter().position(|m| m.kind == model.kind);
        if let Some(entry) = existing.map(|i| &manifest.models[i]) {
            let same_checksum = model
                .sha256
                .as_deref()
                .map_or(true, |sha| sha.eq_ignore_ascii_case(&entry.sha256));
            if entry.filename == filename && entry.size_bytes == model.size_bytes && same_checksum {
                debug!("Manifest entry for {} is current", model.kind.display_name());
                return Ok(false);
            }
        }

        let sha256 = match &model.sha256 {
            Some(sha) => sha.to_ascii_lowercase(),
            None => sha256_file(&model.path)?,
        };
        let info = ModelInfo {
            kind: model.kind,
            filename,
            size_bytes: model.size_bytes,
            sha256,
            recorded_at: unix_now(),
        };

        match existing {
            Some(i) => manifest.models[i] = info,
            None => manifest.models.push(info),
        }

        self.save_manifest(&manifest)?;
        Ok(true)
    }
}

/// Hex SHA-256 of a file, streamed
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// ONNX Runtime session wrapper with a single image input
pub struct OnnxSession {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self, OcrError> {
        info!("Loading ONNX model from {:?}", model_path);
        let build = || -> Result<Session> {
            Ok(Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(intra_threads.max(1))?
                .commit_from_file(model_path)?)
        };
        let session = build().map_err(|e| OcrError::model_load(model_path, format!("{:#}", e)))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| OcrError::model_load(model_path, "model declares no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| OcrError::model_load(model_path, "model declares no outputs"))?;

        if session.inputs.len() > 1 || session.outputs.len() > 1 {
            warn!(
                "Model {:?} has {} inputs and {} outputs; using {:?} -> {:?}",
                model_path,
                session.inputs.len(),
                session.outputs.len(),
                input_name,
                output_name
            );
        }
        debug!("Model loaded. Input: {:?}, Output: {:?}", input_name, output_name);

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }

    /// Run one forward pass, returning the first output's shape and data
    pub fn run(&mut self, input: ArrayView4<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let tensor = TensorRef::from_array_view(input).context("failed to convert input tensor")?;
        let inputs = ort::inputs![self.input_name.as_str() => tensor];

        let outputs = self
            .session
            .run(inputs)
            .context("ONNX Runtime inference failed")?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .with_context(|| format!("failed to extract output {:?} as f32", self.output_name))?;

        let shape = shape.iter().map(|&d| d.max(0) as usize).collect();
        Ok((shape, data.to_vec()))
    }
}

/// CRAFT detector backed by ONNX Runtime
pub struct OnnxDetector {
    session: OnnxSession,
}

impl OnnxDetector {
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self, OcrError> {
        Ok(Self {
            session: OnnxSession::new(model_path, intra_threads)?,
        })
    }
}

impl DetectionModel for OnnxDetector {
    fn detect(&mut self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (shape, data) = self.session.run(input)?;
        let dims: [usize; 4] = shape
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected a 4D heatmap, got shape {:?}", shape))?;
        Ok(Array4::from_shape_vec(dims, data)?)
    }
}

/// CRNN recognizer backed by ONNX Runtime
pub struct OnnxRecognizer {
    session: OnnxSession,
}

impl OnnxRecognizer {
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self, OcrError> {
        Ok(Self {
            session: OnnxSession::new(model_path, intra_threads)?,
        })
    }
}

impl RecognitionModel for OnnxRecognizer {
    fn infer(&mut self, input: ArrayView4<f32>) -> Result<Array3<f32>> {
        let (shape, data) = self.session.run(input)?;
        let dims: [usize; 3] = shape
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected [batch, steps, classes] scores, got shape {:?}", shape))?;
        Ok(Array3::from_shape_vec(dims, data)?)
    }
}

/// One recognition handle per worker; each slot is only ever locked by the
/// worker that owns it
pub struct RecognizerPool {
    handles: Vec<Mutex<Box<dyn RecognitionModel>>>,
}

impl RecognizerPool {
    pub fn new(models: Vec<Box<dyn RecognitionModel>>) -> Result<Self, OcrError> {
        if models.is_empty() {
            return Err(OcrError::config("recognizer pool needs at least one handle"));
        }
        Ok(Self {
            handles: models.into_iter().map(Mutex::new).collect(),
        })
    }

    /// Load `count` independent sessions of the same model file
    pub fn from_onnx(model_path: &Path, count: usize, intra_threads: usize) -> Result<Self, OcrError> {
        let count = count.max(1);
        let mut models: Vec<Box<dyn RecognitionModel>> = Vec::with_capacity(count);
        for _ in 0..count {
            models.push(Box::new(OnnxRecognizer::new(model_path, intra_threads)?));
        }
        info!("Loaded {} recognition handles", count);
        Self::new(models)
    }

    pub fn handles(&self) -> &[Mutex<Box<dyn RecognitionModel>>] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
