// projeto: lstmforecast
// file: src/services/prediction.rs
// Autoregressive multi-day forecast from a ready model

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{debug, info};
use ndarray::{Array2, Axis, concatenate, s};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::neural::data::{CLOSE_INDEX, StockRecord, StockSeries, format_date, load_stock_series, parse_date};
use crate::neural::model::LstmForecaster;
use crate::neural::storage::{ModelArtifact, load_artifact};
use crate::neural::utils::{ForecastError, sigmoid_scalar};
use crate::services::metadata::{FileStatus, MetadataStore, ModelStatus};

/// Steepness of the change -> probability squashing.
const DIRECTION_GAIN: f64 = 20.0;
const MIN_UP_PROBABILITY: f64 = 0.1;
const MAX_UP_PROBABILITY: f64 = 0.9;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRequest {
    pub model_id: String,
    pub data_file_id: String,
    pub start_date: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub model_id: String,
    pub model_name: String,
    pub data_file_id: String,
    pub start_date: NaiveDate,
    pub prediction_days: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoricalPoint {
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl From<&StockRecord> for HistoricalPoint {
    fn from(record: &StockRecord) -> Self {
        HistoricalPoint {
            date: format_date(record.date),
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionPoint {
    pub date: String,
    pub predicted_close: f64,
    pub up_probability: f64,
    pub change_percent: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionMetadata {
    pub predicted_at: DateTime<Utc>,
    /// Seconds, two decimals.
    pub execution_time: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub request_info: RequestInfo,
    pub historical_data: Vec<HistoricalPoint>,
    pub predictions: Vec<PredictionPoint>,
    pub metadata: PredictionMetadata,
}

/// Probability that the close rises, from the relative change `change`.
/// Monotonic and bounded to [0.1, 0.9].
pub fn up_probability(change: f64) -> f64 {
    sigmoid_scalar(DIRECTION_GAIN * change).clamp(MIN_UP_PROBABILITY, MAX_UP_PROBABILITY)
}

/// Every `ceil(len / max)`-th index, so at most `max` points survive.
fn downsample_indices(len: usize, max: usize) -> Vec<usize> {
    if max == 0 {
        return Vec::new();
    }
    let step = len.div_ceil(max).max(1);
    (0..len).step_by(step).collect()
}

pub struct ForecastEngine {
    store: Arc<MetadataStore>,
    max_historical_points: usize,
}

impl ForecastEngine {
    pub fn new(store: Arc<MetadataStore>, max_historical_points: usize) -> Self {
        ForecastEngine { store, max_historical_points }
    }

    pub fn predict(&self, request: &PredictionRequest) -> Result<PredictionResult, ForecastError> {
        let started = Instant::now();
        let invalid = |msg: String| ForecastError::Validation(msg);

        let model = self.store.get_model(&request.model_id)?
            .ok_or_else(|| invalid(format!("Model {} does not exist", request.model_id)))?;
        if model.status != ModelStatus::Ready {
            return Err(invalid(format!("Model {} is not available ({:?})", model.model_id, model.status)));
        }

        let data_file = self.store.get_data_file(&request.data_file_id)?
            .ok_or_else(|| invalid(format!("Data file {} does not exist", request.data_file_id)))?;
        if data_file.status != FileStatus::Valid {
            return Err(invalid(format!("Data file {} is not valid ({:?})", data_file.file_id, data_file.status)));
        }

        let start_date = parse_date(&request.start_date)
            .ok_or_else(|| invalid(format!("Start date '{}' is not a valid date", request.start_date)))?;
        if !data_file.date_range.contains(start_date) {
            return Err(invalid(format!(
                "Start date {} must be within the data range {} .. {}",
                start_date, data_file.date_range.start, data_file.date_range.end
            )));
        }

        let artifact = load_artifact(&model.model_path)?;
        let lookback = artifact.hyperparameters.lookback_window;
        let series = load_stock_series(&data_file.file_path)?;
        let history_len = series.rows_before(start_date);
        if history_len < lookback {
            return Err(invalid(format!(
                "Insufficient history before {}: {} rows required, {} available",
                start_date, lookback, history_len
            )));
        }
        let missing: Vec<&str> = artifact.scaler.feature_columns.iter()
            .map(String::as_str)
            .filter(|f| !series.has_feature(f))
            .collect();
        if !missing.is_empty() {
            return Err(invalid(format!("Data file lacks model feature columns: {}", missing.join(", "))));
        }

        let predictions = rollout(&artifact, &series, history_len, start_date, model.prediction_days)?;

        let historical_data = downsample_indices(history_len, self.max_historical_points)
            .into_iter()
            .map(|i| HistoricalPoint::from(&series.records[i]))
            .collect();

        let execution_time = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;
        info!(
            "🔮 [Forecast] {} days from {} with model {} in {:.2}s",
            model.prediction_days, start_date, model.model_id, execution_time
        );

        Ok(PredictionResult {
            request_info: RequestInfo {
                model_id: model.model_id,
                model_name: model.model_name,
                data_file_id: data_file.file_id,
                start_date,
                prediction_days: model.prediction_days,
            },
            historical_data,
            predictions,
            metadata: PredictionMetadata { predicted_at: Utc::now(), execution_time },
        })
    }
}

/// Feeds each predicted close back into the window. Non-close features keep
/// the values of the last observed row.
fn rollout(
    artifact: &ModelArtifact,
    series: &StockSeries,
    history_len: usize,
    start_date: NaiveDate,
    days: usize,
) -> Result<Vec<PredictionPoint>, ForecastError> {
    let forecaster: LstmForecaster = artifact.forecaster()?;
    let scaler = &artifact.scaler;
    let lookback = artifact.hyperparameters.lookback_window;

    let raw = series.feature_rows(&scaler.feature_columns, history_len - lookback..history_len)?;
    let mut window: Array2<f64> = scaler.transform(&raw)?;
    let mut carried = window.row(lookback - 1).to_owned();
    let mut previous_close = series.records[history_len - 1].close;

    let mut predictions = Vec::with_capacity(days);
    for day in 0..days {
        let output = forecaster.forward(&window)?;
        let scaled_close = output[0];
        let predicted_close = scaler.inverse_close(scaled_close);

        let change = if previous_close.abs() > f64::EPSILON {
            (predicted_close - previous_close) / previous_close
        } else {
            0.0
        };
        predictions.push(PredictionPoint {
            date: format_date(start_date + Duration::days(day as i64)),
            predicted_close,
            up_probability: up_probability(change),
            change_percent: change * 100.0,
        });
        debug!("[Forecast] day {}: close {:.4} ({:+.2}%)", day + 1, predicted_close, change * 100.0);

        carried[CLOSE_INDEX] = scaled_close;
        let next_row = carried.view().insert_axis(Axis(0));
        let shifted = concatenate(Axis(0), &[window.slice(s![1.., ..]), next_row])?;
        window = shifted;
        previous_close = predicted_close;
    }
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::neural::data::FeatureScaler;
    use crate::neural::data::tests::write_series_csv;
    use crate::neural::model::NetworkConfig;
    use crate::neural::search::HyperParameters;
    use crate::neural::storage::{artifact_path, save_artifact};
    use crate::services::data_service::DataService;
    use crate::services::metadata::tests::sample_model;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::path::Path;
    use tempfile::tempdir;

    struct Fixture {
        engine: ForecastEngine,
        store: Arc<MetadataStore>,
        file_id: String,
        model_id: String,
    }

    fn fixture(root: &Path, feature_override: Option<&str>) -> Fixture {
        let config = AppConfig::default().rooted_at(root);
        config.ensure_directories().unwrap();
        let store = Arc::new(MetadataStore::open(&config.paths.metadata_file).unwrap());
        let data = DataService::new(Arc::clone(&store), &config.paths.uploads_dir, config.limits.clone()).unwrap();
        let csv_path = root.join("prices.csv");
        write_series_csv(&csv_path, 100, false);
        let data_file = data.upload_path(&csv_path, None).unwrap();

        let series = load_stock_series(&data_file.file_path).unwrap();
        let features = series.select_features();
        let scaler_rows = series.feature_rows(&features, 0..80).unwrap();
        let mut scaler = FeatureScaler::fit(&scaler_rows, &features).unwrap();
        if let Some(name) = feature_override {
            scaler.feature_columns[4] = name.to_string();
        }
        let network = NetworkConfig {
            feature_dim: features.len(),
            lstm_units_1: 4,
            lstm_units_2: 3,
            dense_units: 4,
            output_size: 5,
            dropout: 0.1,
        };
        let forecaster = LstmForecaster::new(network, &mut StdRng::seed_from_u64(11)).unwrap();

        let model_id = "model_0000beef".to_string();
        let path = artifact_path(&config.paths.models_dir, &model_id, "fixture");
        let hyperparameters = HyperParameters { lstm_units_1: 4, lstm_units_2: 3, ..HyperParameters::default() };
        save_artifact(
            &ModelArtifact {
                model_id: model_id.clone(),
                weights: forecaster.weights().clone(),
                scaler,
                hyperparameters: hyperparameters.clone(),
                prediction_days: 5,
                created_at: Utc::now(),
            },
            &path,
        ).unwrap();

        let mut model = sample_model(&model_id, &data_file.file_id, 0.01);
        model.model_path = path;
        model.hyperparameters = hyperparameters;
        store.add_model(model).unwrap();

        Fixture {
            engine: ForecastEngine::new(Arc::clone(&store), config.limits.max_historical_points),
            store,
            file_id: data_file.file_id,
            model_id,
        }
    }

    fn request(f: &Fixture, start: &str) -> PredictionRequest {
        PredictionRequest { model_id: f.model_id.clone(), data_file_id: f.file_id.clone(), start_date: start.into() }
    }

    fn validation_message(result: Result<PredictionResult, ForecastError>) -> String {
        match result {
            Err(ForecastError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_forecast_shape_and_bounds() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path(), None);
        // 2023-03-15 is row 73 of the synthetic series.
        let result = f.engine.predict(&request(&f, "2023-03-15")).unwrap();

        assert_eq!(result.predictions.len(), 5);
        assert_eq!(result.predictions[0].date, "2023-03-15");
        assert_eq!(result.predictions[4].date, "2023-03-19");
        for point in &result.predictions {
            assert!(point.predicted_close.is_finite());
            assert!((0.1..=0.9).contains(&point.up_probability));
            assert!((point.up_probability - 0.5) * point.change_percent >= 0.0);
        }
        assert_eq!(result.historical_data.len(), 73);
        assert_eq!(result.historical_data.last().unwrap().date, "2023-03-14");
        assert_eq!(result.request_info.prediction_days, 5);

        let json = serde_json::to_value(&result).unwrap();
        assert!(json["requestInfo"].get("modelName").is_some());
        assert!(json["predictions"][0].get("upProbability").is_some());
        assert!(json["metadata"].get("executionTime").is_some());
    }

    #[test]
    fn test_repeated_forecasts_are_identical() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path(), None);
        let first = f.engine.predict(&request(&f, "2023-03-20")).unwrap();
        let second = f.engine.predict(&request(&f, "2023-03-20")).unwrap();
        assert_eq!(first.predictions, second.predictions);
        assert_eq!(first.historical_data, second.historical_data);
    }

    #[test]
    fn test_start_at_first_date_lacks_history() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path(), None);
        let message = validation_message(f.engine.predict(&request(&f, "2023-01-01")));
        assert!(message.contains("Insufficient history"));

        // 59 rows before 2023-03-01.
        let message = validation_message(f.engine.predict(&request(&f, "2023-03-01")));
        assert!(message.contains("60 rows required"));
    }

    #[test]
    fn test_deleted_model_is_unavailable() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path(), None);
        f.store.soft_delete_model(&f.model_id).unwrap();
        let message = validation_message(f.engine.predict(&request(&f, "2023-03-15")));
        assert!(message.contains(&f.model_id));
        assert!(message.contains("not available"));
    }

    #[test]
    fn test_request_preconditions() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path(), None);

        let mut missing_model = request(&f, "2023-03-15");
        missing_model.model_id = "model_missing".into();
        assert!(validation_message(f.engine.predict(&missing_model)).contains("does not exist"));

        assert!(validation_message(f.engine.predict(&request(&f, "15/03/2023"))).contains("not a valid date"));
        assert!(validation_message(f.engine.predict(&request(&f, "2024-01-01"))).contains("within the data range"));

        f.store.update_data_file_status(&f.file_id, FileStatus::Deleted).unwrap();
        assert!(validation_message(f.engine.predict(&request(&f, "2023-03-15"))).contains("not valid"));
    }

    #[test]
    fn test_missing_feature_column_is_rejected() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path(), Some("SMA10"));
        let message = validation_message(f.engine.predict(&request(&f, "2023-03-15")));
        assert!(message.contains("SMA10"));
    }

    #[test]
    fn test_damaged_scaler_returns_error() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path(), None);
        let path = f.store.get_model(&f.model_id).unwrap().unwrap().model_path;
        let mut artifact: ModelArtifact = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        artifact.scaler.mins.truncate(2);
        artifact.scaler.maxs.truncate(2);
        save_artifact(&artifact, &path).unwrap();

        let result = f.engine.predict(&request(&f, "2023-03-15"));
        assert!(matches!(result, Err(ForecastError::ModelConfiguration(_))));
    }

    #[test]
    fn test_up_probability_is_monotonic_and_bounded() {
        let changes = [-0.5, -0.05, -0.01, 0.0, 0.01, 0.05, 0.5];
        let probabilities: Vec<f64> = changes.iter().map(|c| up_probability(*c)).collect();
        assert!(probabilities.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(up_probability(0.0), 0.5);
        assert_eq!(up_probability(1.0), 0.9);
        assert_eq!(up_probability(-1.0), 0.1);
    }

    #[test]
    fn test_downsample_keeps_at_most_max_points() {
        assert_eq!(downsample_indices(73, 200).len(), 73);
        let kept = downsample_indices(450, 200);
        assert!(kept.len() <= 200);
        assert_eq!(kept[0], 0);
        assert_eq!(kept[1], 3);
        assert!(downsample_indices(10, 0).is_empty());
    }
}
