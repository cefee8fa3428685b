use crate::error::PredictError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const MODEL_FILENAME: &str = "model.json";
pub const FEATURE_NAMES_FILENAME: &str = "feature_names.json";
pub const SCALER_FILENAME: &str = "scaler.json";

/// Scoring capability of a trained classifier. `predict` is mandatory;
/// probability and global importances are optional sub-capabilities that the
/// scoring layer queries instead of inspecting concrete model types.
pub trait Scoreable: Send + Sync {
    /// Hard class prediction: 1 = phishing, 0 = legitimate.
    fn predict(&self, features: &[f64]) -> u8;

    /// Probability of the positive (phishing) class, if the model supports
    /// probability scoring.
    fn probability(&self, features: &[f64]) -> Option<f64> {
        let _ = features;
        None
    }

    /// Per-feature global importances in training feature order, if the
    /// model carries them.
    fn importances(&self) -> Option<&[f64]> {
        None
    }
}

/// Logistic-regression style linear classifier, the shape produced by the
/// training side. `feature_importances` is optional and carried through from
/// training when available (e.g. exported from a tree ensemble distilled to
/// this form, or |coefficient| magnitudes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    #[serde(default)]
    pub feature_importances: Option<Vec<f64>>,
}

impl LinearModel {
    fn decision(&self, features: &[f64]) -> f64 {
        let dot: f64 = self
            .weights
            .iter()
            .zip(features.iter())
            .map(|(w, x)| w * x)
            .sum();
        dot + self.bias
    }
}

impl Scoreable for LinearModel {
    fn predict(&self, features: &[f64]) -> u8 {
        u8::from(sigmoid(self.decision(features)) >= 0.5)
    }

    fn probability(&self, features: &[f64]) -> Option<f64> {
        Some(sigmoid(self.decision(features)))
    }

    fn importances(&self) -> Option<&[f64]> {
        self.feature_importances.as_deref()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Serialized model artifact, tagged so new model families can be added
/// without breaking old files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model_type", rename_all = "snake_case")]
pub enum ModelArtifact {
    Linear(LinearModel),
}

impl ModelArtifact {
    pub fn into_scoreable(self) -> Box<dyn Scoreable> {
        match self {
            ModelArtifact::Linear(m) => Box::new(m),
        }
    }
}

/// Standard feature scaling (x - mean) / scale, matching the transform
/// fitted at training time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn transform(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let mean = self.mean.get(i).copied().unwrap_or(0.0);
                let scale = self.scale.get(i).copied().unwrap_or(1.0);
                if scale == 0.0 {
                    x - mean
                } else {
                    (x - mean) / scale
                }
            })
            .collect()
    }
}

/// The full set of artifacts the serving path needs: classifier, the
/// training-time feature order, and the optional scaler.
pub struct Artifacts {
    pub model: Box<dyn Scoreable>,
    pub feature_names: Vec<String>,
    pub scaler: Option<StandardScaler>,
}

impl Artifacts {
    /// Load artifacts from a directory. Missing model or feature-name files
    /// are fatal for serving; a missing scaler is tolerated.
    pub fn load(dir: &Path) -> Result<Self, PredictError> {
        let model_path = dir.join(MODEL_FILENAME);
        let names_path = dir.join(FEATURE_NAMES_FILENAME);
        let scaler_path = dir.join(SCALER_FILENAME);

        let artifact: ModelArtifact = read_json(&model_path)?;
        let feature_names: Vec<String> = read_json(&names_path)?;

        let scaler = if scaler_path.exists() {
            Some(read_json::<StandardScaler>(&scaler_path)?)
        } else {
            log::debug!("no scaler at {}; scoring raw features", scaler_path.display());
            None
        };

        log::info!(
            "loaded model artifacts from {} ({} features, scaler: {})",
            dir.display(),
            feature_names.len(),
            scaler.is_some()
        );

        Ok(Self {
            model: artifact.into_scoreable(),
            feature_names,
            scaler,
        })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T, PredictError> {
    if !path.exists() {
        return Err(PredictError::ArtifactMissing(format!(
            "{} (run training first)",
            path.display()
        )));
    }
    let content = fs::read_to_string(path).map_err(|e| PredictError::ArtifactLoad {
        path: path.display().to_string(),
        source: Box::new(e),
    })?;
    serde_json::from_str(&content).map_err(|e| PredictError::ArtifactLoad {
        path: path.display().to_string(),
        source: Box::new(e),
    })
}

/// Single-flight lazy artifact cache. The first caller loads while holding
/// the lock; concurrent callers wait on the same load and observe the fully
/// published value, so the artifacts are read from disk exactly once.
/// `reset` exists for tests and explicit reloads.
pub struct ArtifactCache {
    slot: Mutex<Option<Arc<Artifacts>>>,
}

impl ArtifactCache {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn get_or_load(&self, dir: &Path) -> Result<Arc<Artifacts>, PredictError> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(artifacts) = slot.as_ref() {
            return Ok(artifacts.clone());
        }
        let loaded = Arc::new(Artifacts::load(dir)?);
        *slot = Some(loaded.clone());
        Ok(loaded)
    }

    /// Drop the cached artifacts; the next caller reloads from disk.
    pub fn reset(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new()
    }
}
