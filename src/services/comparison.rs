// projeto: lstmforecast
// file: src/services/comparison.rs
// Side-by-side comparison of trained models

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::neural::metrics::TrainingMetrics;
use crate::neural::search::HyperParameters;
use crate::neural::utils::ForecastError;
use crate::services::metadata::{MetadataStore, ModelStatus};

pub const MIN_COMPARED: usize = 2;
pub const MAX_COMPARED: usize = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonItem {
    pub model_id: String,
    pub model_name: String,
    pub prediction_days: usize,
    pub trained_at: DateTime<Utc>,
    pub hyperparameters: HyperParameters,
    pub metrics: TrainingMetrics,
    pub data_file_id: String,
    pub data_file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestModel {
    pub model_id: String,
    pub model_name: String,
    pub val_loss: f64,
    #[serde(rename = "valMAE")]
    pub val_mae: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub models: Vec<ComparisonItem>,
    pub best_model: BestModel,
    pub comparison_timestamp: DateTime<Utc>,
}

pub struct ComparisonService {
    store: Arc<MetadataStore>,
}

impl ComparisonService {
    pub fn new(store: Arc<MetadataStore>) -> Self {
        ComparisonService { store }
    }

    /// Best model is the one with the lowest validation loss.
    pub fn compare(&self, model_ids: &[String]) -> Result<ComparisonResult, ForecastError> {
        if model_ids.len() < MIN_COMPARED || model_ids.len() > MAX_COMPARED {
            return Err(ForecastError::Validation(format!(
                "Between {} and {} models can be compared, got {}", MIN_COMPARED, MAX_COMPARED, model_ids.len()
            )));
        }

        let document = self.store.read()?;
        let mut items = Vec::with_capacity(model_ids.len());
        for model_id in model_ids {
            let model = document.models.iter()
                .find(|m| &m.model_id == model_id)
                .ok_or_else(|| ForecastError::NotFound(format!("Model {}", model_id)))?;
            if model.status != ModelStatus::Ready {
                return Err(ForecastError::Validation(format!(
                    "Model {} is not available for comparison", model.model_name
                )));
            }
            let data_file_name = document.data_files.iter()
                .find(|f| f.file_id == model.data_file_id)
                .map(|f| f.file_name.clone());
            items.push(ComparisonItem {
                model_id: model.model_id.clone(),
                model_name: model.model_name.clone(),
                prediction_days: model.prediction_days,
                trained_at: model.trained_at,
                hyperparameters: model.hyperparameters.clone(),
                metrics: model.metrics,
                data_file_id: model.data_file_id.clone(),
                data_file_name,
            });
        }

        let best = items.iter()
            .min_by(|a, b| a.metrics.val_loss.total_cmp(&b.metrics.val_loss))
            .ok_or_else(|| ForecastError::Validation("No models to compare".into()))?;
        let best_model = BestModel {
            model_id: best.model_id.clone(),
            model_name: best.model_name.clone(),
            val_loss: best.metrics.val_loss,
            val_mae: best.metrics.val_mae,
        };

        Ok(ComparisonResult { models: items, best_model, comparison_timestamp: Utc::now() })
    }
}
