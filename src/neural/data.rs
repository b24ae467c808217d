// projeto: lstmforecast
// file: src/neural/data.rs
// CSV loading/validation and the sequence preprocessing pipeline

use chrono::NaiveDate;
use csv::{ReaderBuilder, Trim};
use log::{debug, info};
use ndarray::{Array1, Array2, s};
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::neural::utils::{ForecastError, min_max_scale, validate_input_data};

pub const REQUIRED_COLUMNS: [&str; 6] = ["date", "open", "high", "low", "close", "volume"];
pub const BASE_FEATURES: [&str; 5] = ["open", "high", "low", "close", "volume"];
pub const INDICATOR_FEATURES: [&str; 10] = [
    "SMA5", "SMA10", "SMA20", "SMA60", "MA5", "MA10", "DIF12-26", "MACD9", "K(9,3)", "D(9,3)",
];
/// Position of `close` inside every feature vector.
pub const CLOSE_INDEX: usize = 3;

const MAX_SAMPLE_ERRORS: usize = 5;
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// Accepts `YYYY-MM-DD` and `YYYY/M/D` (padding optional). A trailing time
/// component is ignored.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let token = raw.trim().split(|c: char| c == ' ' || c == 'T').next()?;
    DATE_FORMATS.iter()
        .find_map(|fmt| NaiveDate::parse_from_str(token, fmt).ok())
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StockRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A validated daily price table, ordered by date ascending.
#[derive(Debug, Clone)]
pub struct StockSeries {
    pub columns: Vec<String>,
    pub records: Vec<StockRecord>,
    indicators: HashMap<String, Vec<f64>>,
}

impl StockSeries {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.records.first()?.date, self.records.last()?.date))
    }

    /// Base price features followed by the known indicators present in the file.
    pub fn select_features(&self) -> Vec<String> {
        BASE_FEATURES.iter()
            .map(|f| f.to_string())
            .chain(
                INDICATOR_FEATURES.iter()
                    .filter(|f| self.indicators.contains_key(**f))
                    .map(|f| f.to_string()),
            )
            .collect()
    }

    pub fn has_feature(&self, name: &str) -> bool {
        BASE_FEATURES.contains(&name) || self.indicators.contains_key(name)
    }

    pub fn feature_matrix(&self, features: &[String]) -> Result<Array2<f64>, ForecastError> {
        self.feature_rows(features, 0..self.len())
    }

    pub fn feature_rows(
        &self,
        features: &[String],
        rows: std::ops::Range<usize>,
    ) -> Result<Array2<f64>, ForecastError> {
        if rows.end > self.len() || rows.start > rows.end {
            return Err(ForecastError::DataProcessing(format!(
                "Row range {:?} outside series of {} rows", rows, self.len()
            )));
        }
        let mut matrix = Array2::zeros((rows.len(), features.len()));
        for (col, name) in features.iter().enumerate() {
            for (out_row, row) in rows.clone().enumerate() {
                matrix[[out_row, col]] = self.value(name, row)?;
            }
        }
        Ok(matrix)
    }

    fn value(&self, feature: &str, row: usize) -> Result<f64, ForecastError> {
        let record = &self.records[row];
        match feature {
            "open" => Ok(record.open),
            "high" => Ok(record.high),
            "low" => Ok(record.low),
            "close" => Ok(record.close),
            "volume" => Ok(record.volume),
            other => self.indicators.get(other)
                .map(|values| values[row])
                .ok_or_else(|| ForecastError::Validation(format!("Feature column '{}' not present", other))),
        }
    }

    /// Number of rows dated strictly before `date`.
    pub fn rows_before(&self, date: NaiveDate) -> usize {
        self.records.partition_point(|r| r.date < date)
    }
}

/// CSV contract checks. Every problem found is reported in one error.
#[derive(Debug, Clone)]
pub struct CsvValidator {
    pub min_rows: usize,
    pub max_rows: usize,
}

impl CsvValidator {
    pub fn new(min_rows: usize, max_rows: usize) -> Self {
        CsvValidator { min_rows, max_rows }
    }

    pub fn validate(&self, path: &Path) -> Result<StockSeries, ForecastError> {
        if !path.is_file() {
            return Err(ForecastError::Validation(format!("File does not exist: {}", path.display())));
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_path(path)?;

        let headers: Vec<String> = reader.headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let raw_rows: Vec<csv::StringRecord> = reader.records()
            .collect::<Result<_, _>>()
            .map_err(|e| ForecastError::Validation(format!("Unable to read CSV file: {}", e)))?;

        let mut errors = Vec::new();

        let missing: Vec<&str> = REQUIRED_COLUMNS.iter()
            .copied()
            .filter(|c| !headers.iter().any(|h| h == c))
            .collect();
        if !missing.is_empty() {
            errors.push(format!(
                "Missing required columns: {}. Required columns: {}",
                missing.join(", "),
                REQUIRED_COLUMNS.join(", ")
            ));
        }

        let row_count = raw_rows.len();
        if row_count < self.min_rows {
            errors.push(format!("Insufficient data: at least {} rows required, found {}", self.min_rows, row_count));
        }
        if row_count > self.max_rows {
            errors.push(format!("Too many rows: at most {} supported, found {}", self.max_rows, row_count));
        }

        if !missing.is_empty() {
            return Err(ForecastError::Validation(errors.join("; ")));
        }

        let column_index = |name: &str| headers.iter().position(|h| h == name);
        let idx = |name: &str| column_index(name).unwrap_or(usize::MAX);
        let cell = |row: &csv::StringRecord, i: usize| row.get(i).unwrap_or("").trim().to_string();

        let dates = self.check_dates(&raw_rows, idx("date"), &mut errors);

        let mut numeric: HashMap<&str, Vec<f64>> = HashMap::new();
        for column in BASE_FEATURES {
            let ci = idx(column);
            let mut values = Vec::with_capacity(row_count);
            let mut invalid = 0usize;
            for row in &raw_rows {
                match cell(row, ci).parse::<f64>() {
                    Ok(v) if v.is_finite() => values.push(v),
                    _ => {
                        invalid += 1;
                        values.push(f64::NAN);
                    }
                }
            }
            if invalid > 0 {
                errors.push(format!("{} column contains {} empty or non-numeric values", column, invalid));
            }
            if column == "volume" {
                let negative = values.iter().filter(|v| **v < 0.0).count();
                if negative > 0 {
                    errors.push(format!("{} column contains {} negative values", column, negative));
                }
            } else {
                let non_positive = values.iter().filter(|v| **v <= 0.0).count();
                if non_positive > 0 {
                    errors.push(format!(
                        "{} column contains {} non-positive values (prices must be greater than 0)",
                        column, non_positive
                    ));
                }
            }
            numeric.insert(column, values);
        }

        let inverted = numeric["high"].iter().zip(numeric["low"].iter())
            .filter(|(h, l)| h < l)
            .count();
        if inverted > 0 {
            errors.push(format!("{} rows have high lower than low", inverted));
        }

        if !errors.is_empty() {
            return Err(ForecastError::Validation(errors.join("; ")));
        }

        let mut indicators = HashMap::new();
        for name in INDICATOR_FEATURES {
            if let Some(ci) = column_index(name) {
                let mut last = 0.0;
                let values = raw_rows.iter()
                    .map(|row| {
                        if let Ok(v) = cell(row, ci).parse::<f64>() {
                            if v.is_finite() {
                                last = v;
                            }
                        }
                        last
                    })
                    .collect::<Vec<f64>>();
                indicators.insert(name.to_string(), values);
            }
        }

        let mut order: Vec<usize> = (0..row_count).collect();
        order.sort_by_key(|&i| dates[i]);

        let records = order.iter()
            .map(|&i| StockRecord {
                date: dates[i],
                open: numeric["open"][i],
                high: numeric["high"][i],
                low: numeric["low"][i],
                close: numeric["close"][i],
                volume: numeric["volume"][i],
            })
            .collect();
        for values in indicators.values_mut() {
            *values = order.iter().map(|&i| values[i]).collect();
        }

        debug!("🔎 [CsvValidator] {} rows, columns {:?}", row_count, headers);

        Ok(StockSeries { columns: headers, records, indicators })
    }

    fn check_dates(
        &self,
        rows: &[csv::StringRecord],
        date_index: usize,
        errors: &mut Vec<String>,
    ) -> Vec<NaiveDate> {
        let mut parsed = Vec::with_capacity(rows.len());
        let mut empty = 0usize;
        let mut invalid: Vec<(usize, String)> = Vec::new();
        let mut seen = HashSet::new();
        let mut duplicates = 0usize;

        for (i, row) in rows.iter().enumerate() {
            let raw = row.get(date_index).unwrap_or("").trim();
            if raw.is_empty() {
                empty += 1;
                parsed.push(NaiveDate::MIN);
                continue;
            }
            match parse_date(raw) {
                Some(date) => {
                    if !seen.insert(date) {
                        duplicates += 1;
                    }
                    parsed.push(date);
                }
                None => {
                    invalid.push((i + 1, raw.to_string()));
                    parsed.push(NaiveDate::MIN);
                }
            }
        }

        if empty > 0 {
            errors.push(format!("date column contains {} empty values", empty));
        }
        if !invalid.is_empty() {
            let sample = invalid.iter()
                .take(MAX_SAMPLE_ERRORS)
                .map(|(row, value)| format!("row {}: '{}'", row, value))
                .collect::<Vec<_>>()
                .join(", ");
            let mut message = format!("Unparseable dates: {}", sample);
            if invalid.len() > MAX_SAMPLE_ERRORS {
                message.push_str(&format!(" ({} errors in total)", invalid.len()));
            }
            errors.push(message);
        }
        if duplicates > 0 {
            errors.push(format!("Found {} duplicate dates", duplicates));
        }

        parsed
    }
}

/// Loads a file that already passed upload validation.
pub fn load_stock_series(path: &Path) -> Result<StockSeries, ForecastError> {
    CsvValidator::new(1, usize::MAX).validate(path)
}

/// Per-feature min/max scaling into [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureScaler {
    pub feature_columns: Vec<String>,
    pub mins: Vec<f64>,
    pub maxs: Vec<f64>,
}

impl FeatureScaler {
    pub fn fit(data: &Array2<f64>, feature_columns: &[String]) -> Result<Self, ForecastError> {
        if data.ncols() != feature_columns.len() {
            return Err(ForecastError::Shape(format!(
                "Scaler got {} columns for {} features", data.ncols(), feature_columns.len()
            )));
        }
        let mut mins = Vec::with_capacity(data.ncols());
        let mut maxs = Vec::with_capacity(data.ncols());
        for column in data.columns() {
            let min = column.min()
                .map_err(|e| ForecastError::DataProcessing(format!("Cannot fit scaler: {}", e)))?;
            let max = column.max()
                .map_err(|e| ForecastError::DataProcessing(format!("Cannot fit scaler: {}", e)))?;
            mins.push(*min);
            maxs.push(*max);
        }
        Ok(FeatureScaler { feature_columns: feature_columns.to_vec(), mins, maxs })
    }

    pub fn num_features(&self) -> usize {
        self.feature_columns.len()
    }

    /// Checks a deserialized scaler before it touches any data.
    pub fn validate(&self) -> Result<(), ForecastError> {
        let n = self.num_features();
        if self.mins.len() != n || self.maxs.len() != n {
            return Err(ForecastError::ModelConfiguration(format!(
                "Scaler has {} features but {} mins and {} maxs", n, self.mins.len(), self.maxs.len()
            )));
        }
        if n <= CLOSE_INDEX || self.feature_columns[CLOSE_INDEX] != "close" {
            return Err(ForecastError::ModelConfiguration(format!(
                "Scaler columns {:?} do not hold close at position {}", self.feature_columns, CLOSE_INDEX
            )));
        }
        for (i, (min, max)) in self.mins.iter().zip(&self.maxs).enumerate() {
            if !min.is_finite() || !max.is_finite() || min > max {
                return Err(ForecastError::ModelConfiguration(format!(
                    "Scaler range for '{}' is invalid: [{}, {}]", self.feature_columns[i], min, max
                )));
            }
        }
        Ok(())
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>, ForecastError> {
        if data.ncols() != self.num_features() {
            return Err(ForecastError::Shape(format!(
                "Expected {} feature columns, got {}", self.num_features(), data.ncols()
            )));
        }
        let mut scaled = data.clone();
        min_max_scale(&mut scaled, &Array1::from(self.mins.clone()), &Array1::from(self.maxs.clone()));
        Ok(scaled)
    }

    pub fn scale_value(&self, feature: usize, value: f64) -> f64 {
        let range = self.maxs[feature] - self.mins[feature];
        if range > 1e-8 { (value - self.mins[feature]) / range } else { 0.0 }
    }

    pub fn inverse_value(&self, feature: usize, scaled: f64) -> f64 {
        let range = self.maxs[feature] - self.mins[feature];
        if range > 1e-8 { scaled * range + self.mins[feature] } else { self.mins[feature] }
    }

    pub fn inverse_close(&self, scaled: f64) -> f64 {
        self.inverse_value(CLOSE_INDEX, scaled)
    }
}

#[derive(Debug, Clone, Default)]
pub struct WindowSet {
    pub inputs: Vec<Array2<f64>>,
    pub targets: Vec<Array1<f64>>,
    /// Date of the first target row of each window.
    pub anchor_dates: Vec<NaiveDate>,
}

impl WindowSet {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PreparedData {
    pub train: WindowSet,
    pub validation: WindowSet,
    pub scaler: FeatureScaler,
    pub lookback_window: usize,
    pub horizon: usize,
}

impl PreparedData {
    pub fn feature_dim(&self) -> usize {
        self.scaler.num_features()
    }

    /// Validation windows, or the training windows when the split left none.
    pub fn evaluation_set(&self) -> &WindowSet {
        if self.validation.is_empty() { &self.train } else { &self.validation }
    }
}

#[derive(Debug, Clone)]
pub struct SequencePreprocessor {
    pub lookback_window: usize,
    pub horizon: usize,
    pub validation_split: f64,
}

impl SequencePreprocessor {
    pub fn new(lookback_window: usize, horizon: usize, validation_split: f64) -> Result<Self, ForecastError> {
        if lookback_window == 0 {
            return Err(ForecastError::Validation("lookback window must be at least 1".into()));
        }
        if horizon == 0 {
            return Err(ForecastError::Validation("horizon must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&validation_split) {
            return Err(ForecastError::Validation("validation split must be in [0, 1)".into()));
        }
        Ok(SequencePreprocessor { lookback_window, horizon, validation_split })
    }

    /// `max(0, n - L - H + 1)`
    pub fn window_count(&self, n_rows: usize) -> usize {
        (n_rows + 1).saturating_sub(self.lookback_window + self.horizon)
    }

    /// Chronological split; at least one training window is kept.
    pub fn split_counts(&self, n_windows: usize) -> (usize, usize) {
        let train = ((n_windows as f64) * (1.0 - self.validation_split)).floor() as usize;
        let train = train.clamp(1.min(n_windows), n_windows);
        (train, n_windows - train)
    }

    pub fn prepare(&self, series: &StockSeries) -> Result<PreparedData, ForecastError> {
        let n_rows = series.len();
        let n_windows = self.window_count(n_rows);
        if n_windows < 1 {
            return Err(ForecastError::InsufficientData {
                required: self.lookback_window + self.horizon,
                actual: n_rows,
            });
        }

        let features = series.select_features();
        let raw = series.feature_matrix(&features)?;
        validate_input_data(&raw, "feature matrix")?;

        let (n_train, n_val) = self.split_counts(n_windows);
        // Rows touched by training windows (inputs and targets); the scaler
        // never sees anything after them.
        let train_rows = n_train + self.lookback_window + self.horizon - 1;
        let scaler = FeatureScaler::fit(&raw.slice(s![..train_rows, ..]).to_owned(), &features)?;
        let scaled = scaler.transform(&raw)?;

        let mut train = WindowSet::default();
        let mut validation = WindowSet::default();
        for k in 0..n_windows {
            let anchor = self.lookback_window + k;
            let input = scaled.slice(s![anchor - self.lookback_window..anchor, ..]).to_owned();
            let target = scaled.slice(s![anchor..anchor + self.horizon, CLOSE_INDEX]).to_owned();
            let set = if k < n_train { &mut train } else { &mut validation };
            set.inputs.push(input);
            set.targets.push(target);
            set.anchor_dates.push(series.records[anchor].date);
        }

        info!(
            "✅ [Preprocessor] {} rows -> {} windows ({} train / {} validation), {} features",
            n_rows, n_windows, n_train, n_val, features.len()
        );

        Ok(PreparedData {
            train,
            validation,
            scaler,
            lookback_window: self.lookback_window,
            horizon: self.horizon,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    /// Writes a synthetic ascending series with a gentle trend and cycle.
    pub(crate) fn write_series_csv(path: &Path, rows: usize, with_indicator: bool) {
        let mut file = fs::File::create(path).unwrap();
        let header = if with_indicator { "date,open,high,low,close,volume,SMA5" } else { "date,open,high,low,close,volume" };
        writeln!(file, "{}", header).unwrap();
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        for i in 0..rows {
            let date = start + chrono::Duration::days(i as i64);
            let close = 100.0 + i as f64 * 0.5 + (i as f64 / 5.0).sin() * 3.0;
            let open = close - 0.5;
            let high = close + 1.0;
            let low = close - 1.5;
            let volume = 1000.0 + (i % 7) as f64 * 50.0;
            if with_indicator {
                writeln!(file, "{},{},{},{},{},{},{}", date.format("%Y/%-m/%-d"), open, high, low, close, volume, close - 1.0).unwrap();
            } else {
                writeln!(file, "{},{},{},{},{},{}", date.format("%Y-%m-%d"), open, high, low, close, volume).unwrap();
            }
        }
    }

    fn series(rows: usize) -> StockSeries {
        let dir = tempdir().unwrap();
        let path = dir.path().join("series.csv");
        write_series_csv(&path, rows, false);
        load_stock_series(&path).unwrap()
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(parse_date("2024-03-05"), Some(expected));
        assert_eq!(parse_date("2024/3/5"), Some(expected));
        assert_eq!(parse_date("2024/03/05"), Some(expected));
        assert_eq!(parse_date("2024-03-05 00:00:00"), Some(expected));
        assert_eq!(parse_date("05.03.2024"), None);
    }

    #[test]
    fn test_validator_accepts_good_file_and_selects_indicators() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("good.csv");
        write_series_csv(&path, 80, true);
        let series = CsvValidator::new(60, 1_000_000).validate(&path).unwrap();
        assert_eq!(series.len(), 80);
        assert_eq!(series.select_features(), vec!["open", "high", "low", "close", "volume", "SMA5"]);
        let (start, end) = series.date_range().unwrap();
        assert!(start < end);
    }

    #[test]
    fn test_validator_collects_all_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "date,open,high,low,close,volume").unwrap();
        writeln!(file, "2024-01-01,10,9,11,10,100").unwrap();
        writeln!(file, "2024-01-01,10,12,9,-1,100").unwrap();
        writeln!(file, "not-a-date,10,12,9,10,-5").unwrap();
        drop(file);

        let err = CsvValidator::new(2, 100).validate(&path).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("duplicate"));
        assert!(message.contains("Unparseable dates"));
        assert!(message.contains("non-positive"));
        assert!(message.contains("negative"));
        assert!(message.contains("high lower than low"));
    }

    #[test]
    fn test_validator_reports_missing_columns_and_row_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.csv");
        fs::write(&path, "date,open,close\n2024-01-01,1,1\n").unwrap();
        let err = CsvValidator::new(60, 100).validate(&path).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("high, low, volume"));
        assert!(message.contains("at least 60 rows"));
    }

    #[test]
    fn test_rows_are_sorted_ascending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("desc.csv");
        fs::write(&path, "date,open,high,low,close,volume\n2024-01-03,3,4,2,3,1\n2024-01-01,1,2,1,1,1\n2024-01-02,2,3,1,2,1\n").unwrap();
        let series = load_stock_series(&path).unwrap();
        let closes: Vec<f64> = series.records.iter().map(|r| r.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_scaler_round_trip() {
        let data = ndarray::array![[1.0, 10.0], [3.0, 30.0], [2.0, 20.0]];
        let names = vec!["a".to_string(), "b".to_string()];
        let scaler = FeatureScaler::fit(&data, &names).unwrap();
        for &value in &[1.0, 1.7, 2.5, 3.0, 42.0] {
            let scaled = scaler.scale_value(0, value);
            assert!((scaler.inverse_value(0, scaled) - value).abs() < 1e-9);
        }
        let scaled = scaler.transform(&data).unwrap();
        assert_eq!(scaled[[1, 1]], 1.0);
        assert_eq!(scaled[[0, 0]], 0.0);
    }

    #[test]
    fn test_window_count_formula() {
        let pre = SequencePreprocessor::new(60, 5, 0.2).unwrap();
        assert_eq!(pre.window_count(100), 36);
        assert_eq!(pre.window_count(64), 0);
        assert_eq!(pre.window_count(65), 1);
        assert_eq!(pre.window_count(10), 0);
    }

    #[test]
    fn test_prepare_hundred_rows() {
        let pre = SequencePreprocessor::new(60, 5, 0.2).unwrap();
        let data = pre.prepare(&series(100)).unwrap();
        assert_eq!(data.train.len() + data.validation.len(), 36);
        assert_eq!(data.train.len(), 28);
        assert_eq!(data.train.inputs[0].dim(), (60, 5));
        assert_eq!(data.train.targets[0].len(), 5);
    }

    #[test]
    fn test_prepare_insufficient_rows() {
        let pre = SequencePreprocessor::new(60, 5, 0.2).unwrap();
        let err = pre.prepare(&series(64)).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientData { required: 65, actual: 64 }));
    }

    #[test]
    fn test_split_is_chronological() {
        let pre = SequencePreprocessor::new(10, 3, 0.2).unwrap();
        let data = pre.prepare(&series(80)).unwrap();
        let last_train = data.train.anchor_dates.iter().max().unwrap();
        assert!(data.validation.anchor_dates.iter().all(|d| d > last_train));
    }

    #[test]
    fn test_scaler_fitted_on_training_rows_only() {
        let pre = SequencePreprocessor::new(10, 3, 0.2).unwrap();
        let series = series(80);
        let data = pre.prepare(&series).unwrap();
        let train_rows = data.train.len() + 10 + 3 - 1;
        let max_train_close = series.records[..train_rows].iter()
            .map(|r| r.close)
            .fold(f64::NEG_INFINITY, f64::max);
        assert!((data.scaler.maxs[CLOSE_INDEX] - max_train_close).abs() < 1e-12);
    }

    #[test]
    fn test_single_window_keeps_it_for_training() {
        let pre = SequencePreprocessor::new(10, 3, 0.2).unwrap();
        let data = pre.prepare(&series(13)).unwrap();
        assert_eq!(data.train.len(), 1);
        assert!(data.validation.is_empty());
        assert_eq!(data.evaluation_set().len(), 1);
    }
}
