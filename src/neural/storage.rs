// projeto: lstmforecast
// file: src/neural/storage.rs
// Model artifact persistence (weights + scaler + hyperparameters) as JSON files

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::neural::data::FeatureScaler;
use crate::neural::model::{LstmForecaster, ModelWeights};
use crate::neural::search::HyperParameters;
use crate::neural::utils::{ForecastError, create_safe_filename};

/// Everything needed to rebuild a trained forecaster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    pub model_id: String,
    pub weights: ModelWeights,
    pub scaler: FeatureScaler,
    pub hyperparameters: HyperParameters,
    pub prediction_days: usize,
    pub created_at: DateTime<Utc>,
}

impl ModelArtifact {
    pub fn forecaster(&self) -> Result<LstmForecaster, ForecastError> {
        if self.weights.config.feature_dim != self.scaler.num_features() {
            return Err(ForecastError::ModelConfiguration(format!(
                "Artifact {} has {} network inputs but {} scaled features",
                self.model_id, self.weights.config.feature_dim, self.scaler.num_features()
            )));
        }
        LstmForecaster::from_weights(self.weights.clone())
    }
}

/// `<models_dir>/<model_id>_<safe name>.json`
pub fn artifact_path(models_dir: &Path, model_id: &str, model_name: &str) -> PathBuf {
    models_dir.join(format!("{}.json", create_safe_filename(model_id, model_name)))
}

/// Writes to a sibling temp file first so a crash never leaves a torn artifact.
pub fn save_artifact(artifact: &ModelArtifact, path: &Path) -> Result<(), ForecastError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec(artifact)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    info!("💾 [Storage] Saved model {} to {}", artifact.model_id, path.display());
    Ok(())
}

pub fn load_artifact(path: &Path) -> Result<ModelArtifact, ForecastError> {
    if !path.exists() {
        return Err(ForecastError::NotFound(format!("Model file {}", path.display())));
    }
    let data = fs::read(path)?;
    let artifact: ModelArtifact = serde_json::from_slice(&data)?;
    artifact.weights.validate_shapes()?;
    artifact.scaler.validate()?;
    artifact.hyperparameters.validate()?;
    debug!("📂 [Storage] Loaded model {} from {}", artifact.model_id, path.display());
    Ok(artifact)
}

/// Missing files are not an error.
pub fn remove_artifact(path: &Path) -> Result<bool, ForecastError> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!("🗑️ [Storage] Removed {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
