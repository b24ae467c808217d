// file: src/config.rs
// Configuração do motor de previsão (caminhos, limites, treino e busca)

use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::neural::utils::ForecastError;

/// Longest forecast horizon a model can be trained for.
pub const MAX_PREDICTION_DAYS: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub limits: LimitsConfig,
    pub training: TrainingConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub models_dir: PathBuf,
    pub metadata_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfig {
    pub min_rows: usize,
    pub max_rows: usize,
    pub max_file_size_bytes: u64,
    pub max_prediction_days: usize,
    pub max_historical_points: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingConfig {
    pub lookback_window: usize,
    pub validation_split: f64,
    pub final_epochs: usize,
    pub batch_size: usize,
    pub early_stopping_patience: usize,
    pub dense_units: usize,
    pub clip_norm: f64,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    pub max_epochs: usize,
    pub factor: usize,
    pub iterations: usize,
    pub lstm_units_1: Vec<usize>,
    pub lstm_units_2: Vec<usize>,
    pub dropout: Vec<f64>,
    pub learning_rate: Vec<f64>,
    pub batch_size: Vec<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig {
                data_dir: PathBuf::from("data"),
                uploads_dir: PathBuf::from("data/uploaded"),
                models_dir: PathBuf::from("data/models"),
                metadata_file: PathBuf::from("data/metadata.json"),
            },
            limits: LimitsConfig {
                min_rows: 60,
                max_rows: 1_000_000,
                max_file_size_bytes: 100 * 1024 * 1024,
                max_prediction_days: MAX_PREDICTION_DAYS,
                max_historical_points: 200,
            },
            training: TrainingConfig {
                lookback_window: 60,
                validation_split: 0.2,
                final_epochs: 50,
                batch_size: 32,
                early_stopping_patience: 10,
                dense_units: 25,
                clip_norm: 1.0,
                seed: None,
            },
            search: SearchConfig {
                max_epochs: 20,
                factor: 3,
                iterations: 1,
                lstm_units_1: vec![32, 64, 96, 128],
                lstm_units_2: vec![16, 32, 48, 64],
                dropout: vec![0.1, 0.2, 0.3, 0.4, 0.5],
                learning_rate: vec![0.01, 0.001, 0.0001],
                batch_size: vec![32],
            },
        }
    }
}

impl AppConfig {
    /// Loads `path` when it exists, otherwise writes the defaults there.
    pub fn load(path: &Path) -> Result<Self, ForecastError> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: AppConfig = toml::from_str(&content)
                .map_err(|e| ForecastError::Serialization(format!("{}: {}", path.display(), e)))?;
            info!("⚙️ [Config] Loaded from {}", path.display());
            config.validate()?;
            Ok(config)
        } else {
            info!("📄 [Config] {} not found, writing defaults", path.display());
            let default_config = AppConfig::default();
            default_config.save(path)?;
            Ok(default_config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ForecastError> {
        let config_toml = toml::to_string_pretty(self)
            .map_err(|e| ForecastError::Serialization(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, config_toml)?;
        info!("💾 [Config] Saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ForecastError> {
        let invalid = |msg: &str| Err(ForecastError::Validation(msg.to_string()));

        if self.limits.min_rows == 0 || self.limits.min_rows > self.limits.max_rows {
            return invalid("limits.min_rows must be in 1..=max_rows");
        }
        if !(1..=MAX_PREDICTION_DAYS).contains(&self.limits.max_prediction_days) {
            return invalid("limits.max_prediction_days must be in 1..=30");
        }
        if self.training.lookback_window == 0 {
            return invalid("training.lookback_window must be greater than zero");
        }
        if !(0.0..1.0).contains(&self.training.validation_split) {
            return invalid("training.validation_split must be in [0.0, 1.0)");
        }
        if self.training.final_epochs == 0 || self.training.batch_size == 0 {
            return invalid("training.final_epochs and training.batch_size must be greater than zero");
        }
        if self.training.dense_units == 0 {
            return invalid("training.dense_units must be greater than zero");
        }
        if self.search.factor < 2 {
            return invalid("search.factor must be at least 2");
        }
        if self.search.max_epochs == 0 || self.search.iterations == 0 {
            return invalid("search.max_epochs and search.iterations must be greater than zero");
        }
        if self.search.lstm_units_1.is_empty()
            || self.search.lstm_units_2.is_empty()
            || self.search.dropout.is_empty()
            || self.search.learning_rate.is_empty()
            || self.search.batch_size.is_empty()
        {
            return invalid("search choice lists must not be empty");
        }

        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<(), ForecastError> {
        let dirs = [
            &self.paths.data_dir,
            &self.paths.uploads_dir,
            &self.paths.models_dir,
        ];

        for dir in dirs {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
                info!("📁 [Config] Created directory {}", dir.display());
            }
        }

        Ok(())
    }

    /// Re-roots every path under `root`.
    pub fn rooted_at(mut self, root: &Path) -> Self {
        self.paths.data_dir = root.join("data");
        self.paths.uploads_dir = root.join("data/uploaded");
        self.paths.models_dir = root.join("data/models");
        self.paths.metadata_file = root.join("data/metadata.json");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.training.lookback_window, 60);
        assert_eq!(config.search.factor, 3);
    }

    #[test]
    fn test_load_writes_defaults_then_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let first = AppConfig::load(&path).unwrap();
        assert!(path.exists());
        let second = AppConfig::load(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_validate_rejects_empty_choices() {
        let mut config = AppConfig::default();
        config.search.learning_rate.clear();
        assert!(matches!(config.validate(), Err(ForecastError::Validation(_))));
    }

    #[test]
    fn test_validate_caps_prediction_days() {
        let mut config = AppConfig::default();
        config.limits.max_prediction_days = 40;
        assert!(matches!(config.validate(), Err(ForecastError::Validation(_))));
        config.limits.max_prediction_days = 0;
        assert!(config.validate().is_err());
        config.limits.max_prediction_days = MAX_PREDICTION_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rooted_at_and_ensure_directories() {
        let dir = tempdir().unwrap();
        let config = AppConfig::default().rooted_at(dir.path());
        config.ensure_directories().unwrap();
        assert!(config.paths.uploads_dir.is_dir());
        assert!(config.paths.models_dir.is_dir());
    }
}
