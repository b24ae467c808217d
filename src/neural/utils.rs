// projeto: lstmforecast
// file: src/neural/utils.rs
// Error taxonomy, optimizer, activations and numeric helpers shared by the engine

use ndarray::{Array, Array1, Array2, ArrayD, Dimension, ShapeError, Zip};
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient data: need at least {required} rows, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Search exhausted: {0}")]
    SearchExhausted(String),

    #[error("Metadata store corrupted at {path}: {reason}")]
    StoreCorruption { path: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Data processing error: {0}")]
    DataProcessing(String),

    #[error("Model configuration error: {0}")]
    ModelConfiguration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shape error: {0}")]
    Shape(String),
}

impl From<ShapeError> for ForecastError {
    fn from(err: ShapeError) -> Self {
        ForecastError::Shape(err.to_string())
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(err: serde_json::Error) -> Self {
        ForecastError::Serialization(err.to_string())
    }
}

/// Adam with one moment pair per named parameter tensor.
///
/// `step` advances the shared timestep once per batch; `update` then applies
/// the bias-corrected step to each parameter in place.
#[derive(Debug, Clone)]
pub struct AdamOptimizer {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub t: usize,
    m: HashMap<String, ArrayD<f64>>,
    v: HashMap<String, ArrayD<f64>>,
}

impl AdamOptimizer {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        AdamOptimizer {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    pub fn with_learning_rate(learning_rate: f64) -> Self {
        Self::new(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn step(&mut self) {
        self.t += 1;
    }

    pub fn update<D: Dimension>(
        &mut self,
        param_name: &str,
        param: &mut Array<f64, D>,
        gradient: &Array<f64, D>,
    ) {
        let t = self.t.max(1) as i32;
        let (beta1, beta2, epsilon, lr) = (self.beta1, self.beta2, self.epsilon, self.learning_rate);
        let bias1 = 1.0 - beta1.powi(t);
        let bias2 = 1.0 - beta2.powi(t);

        let shape = gradient.raw_dim().into_dyn();
        let m = self.m.entry(param_name.to_string())
            .or_insert_with(|| ArrayD::zeros(shape.clone()));
        let v = self.v.entry(param_name.to_string())
            .or_insert_with(|| ArrayD::zeros(shape));

        let mut param = param.view_mut().into_dyn();
        let gradient = gradient.view().into_dyn();

        Zip::from(&mut param)
            .and(m)
            .and(v)
            .and(&gradient)
            .for_each(|p, m, v, &g| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *p -= lr * m_hat / (v_hat.sqrt() + epsilon);
            });
    }
}

pub fn sigmoid(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(sigmoid_scalar)
}

pub fn tanh(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(|val| val.tanh())
}

pub fn relu(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(|val| val.max(0.0))
}

pub fn sigmoid_scalar(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn mean_over_pairs(predictions: &[f64], targets: &[f64], f: impl Fn(f64) -> f64) -> f64 {
    debug_assert_eq!(predictions.len(), targets.len());
    if predictions.is_empty() {
        return 0.0;
    }
    let total: f64 = predictions.iter().zip(targets).map(|(p, t)| f(p - t)).sum();
    total / predictions.len() as f64
}

pub fn mse_loss(predictions: &[f64], targets: &[f64]) -> f64 {
    mean_over_pairs(predictions, targets, |e| e * e)
}

pub fn mae_loss(predictions: &[f64], targets: &[f64]) -> f64 {
    mean_over_pairs(predictions, targets, f64::abs)
}

/// Scales each column into [0, 1] with the given bounds. Constant columns
/// (range below 1e-8) collapse to 0.
pub fn min_max_scale(data: &mut Array2<f64>, mins: &Array1<f64>, maxs: &Array1<f64>) {
    for (col, mut column) in data.columns_mut().into_iter().enumerate() {
        let min_val = mins[col];
        let range = maxs[col] - min_val;
        if range > 1e-8 {
            column.mapv_inplace(|x| (x - min_val) / range);
        } else {
            column.mapv_inplace(|_| 0.0);
        }
    }
}

/// Glorot-normal weight matrix of shape (fan_out, fan_in).
pub fn xavier_init(
    fan_in: usize,
    fan_out: usize,
    rng: &mut StdRng,
) -> Result<Array2<f64>, ForecastError> {
    let std = (2.0 / (fan_in + fan_out) as f64).sqrt();
    let normal = Normal::new(0.0, std)
        .map_err(|e| ForecastError::ModelConfiguration(format!("Invalid init distribution: {}", e)))?;
    Ok(Array2::from_shape_fn((fan_out, fan_in), |_| normal.sample(rng)))
}

/// Rejects empty matrices and any NaN or infinite cell.
pub fn validate_input_data(data: &Array2<f64>, name: &str) -> Result<(), ForecastError> {
    if data.is_empty() {
        return Err(ForecastError::DataProcessing(format!("{} is empty", name)));
    }
    match data.indexed_iter().find(|(_, v)| !v.is_finite()) {
        Some(((row, col), value)) => Err(ForecastError::DataProcessing(format!(
            "{} has non-finite value {} at row {}, column {}", name, value, row, col
        ))),
        None => Ok(()),
    }
}

pub fn validate_finite(values: &[f64], name: &str) -> Result<(), ForecastError> {
    for (i, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            return Err(ForecastError::Training(
                format!("{} diverged: non-finite value {} at position {}", name, value, i)
            ));
        }
    }
    Ok(())
}

/// `prefix_` followed by eight lowercase hex characters.
pub fn generate_id(prefix: &str) -> String {
    let mut rng = rand::rng();
    format!("{}_{:08x}", prefix, rng.random::<u32>())
}

/// Prefixes `name` with `id`, replacing path separators.
pub fn create_safe_filename(id: &str, name: &str) -> String {
    let safe_name = name.replace(['/', '\\'], "_");
    format!("{}_{}", id, safe_name)
}
