// projeto: lstmforecast
// file: src/neural/model.rs
// Stacked LSTM forecaster: LSTM -> Dropout -> LSTM -> Dropout -> Dense(relu) -> Dense(H)

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::neural::data::WindowSet;
use crate::neural::utils::{
    AdamOptimizer, ForecastError, mae_loss, mse_loss, relu, sigmoid, tanh, validate_finite, xavier_init,
};

const MATRIX_NAMES: [&str; 8] = ["w_ii", "w_if", "w_ig", "w_io", "w_hi", "w_hf", "w_hg", "w_ho"];
const BIAS_NAMES: [&str; 4] = ["b_i", "b_f", "b_g", "b_o"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LstmLayerWeights {
    pub w_ii: Array2<f64>,  // Input gate input weights
    pub w_if: Array2<f64>,  // Forget gate input weights
    pub w_ig: Array2<f64>,  // Cell gate input weights
    pub w_io: Array2<f64>,  // Output gate input weights
    pub w_hi: Array2<f64>,  // Input gate hidden weights
    pub w_hf: Array2<f64>,  // Forget gate hidden weights
    pub w_hg: Array2<f64>,  // Cell gate hidden weights
    pub w_ho: Array2<f64>,  // Output gate hidden weights
    pub b_i: Array1<f64>,   // Input gate bias
    pub b_f: Array1<f64>,   // Forget gate bias
    pub b_g: Array1<f64>,   // Cell gate bias
    pub b_o: Array1<f64>,   // Output gate bias
}

impl LstmLayerWeights {
    fn new(input_size: usize, hidden_size: usize, rng: &mut StdRng) -> Result<Self, ForecastError> {
        Ok(LstmLayerWeights {
            w_ii: xavier_init(input_size, hidden_size, rng)?,
            w_if: xavier_init(input_size, hidden_size, rng)?,
            w_ig: xavier_init(input_size, hidden_size, rng)?,
            w_io: xavier_init(input_size, hidden_size, rng)?,
            w_hi: xavier_init(hidden_size, hidden_size, rng)?,
            w_hf: xavier_init(hidden_size, hidden_size, rng)?,
            w_hg: xavier_init(hidden_size, hidden_size, rng)?,
            w_ho: xavier_init(hidden_size, hidden_size, rng)?,
            b_i: Array1::zeros(hidden_size),
            // Forget gate starts open.
            b_f: Array1::ones(hidden_size),
            b_g: Array1::zeros(hidden_size),
            b_o: Array1::zeros(hidden_size),
        })
    }

    pub fn input_size(&self) -> usize {
        self.w_ii.ncols()
    }

    pub fn hidden_size(&self) -> usize {
        self.b_i.len()
    }

    fn matrices(&self) -> [&Array2<f64>; 8] {
        [&self.w_ii, &self.w_if, &self.w_ig, &self.w_io, &self.w_hi, &self.w_hf, &self.w_hg, &self.w_ho]
    }

    fn matrices_mut(&mut self) -> [&mut Array2<f64>; 8] {
        [
            &mut self.w_ii, &mut self.w_if, &mut self.w_ig, &mut self.w_io,
            &mut self.w_hi, &mut self.w_hf, &mut self.w_hg, &mut self.w_ho,
        ]
    }

    fn biases(&self) -> [&Array1<f64>; 4] {
        [&self.b_i, &self.b_f, &self.b_g, &self.b_o]
    }

    fn biases_mut(&mut self) -> [&mut Array1<f64>; 4] {
        [&mut self.b_i, &mut self.b_f, &mut self.b_g, &mut self.b_o]
    }

    fn zeros_like(&self) -> Self {
        LstmLayerWeights {
            w_ii: Array2::zeros(self.w_ii.raw_dim()),
            w_if: Array2::zeros(self.w_if.raw_dim()),
            w_ig: Array2::zeros(self.w_ig.raw_dim()),
            w_io: Array2::zeros(self.w_io.raw_dim()),
            w_hi: Array2::zeros(self.w_hi.raw_dim()),
            w_hf: Array2::zeros(self.w_hf.raw_dim()),
            w_hg: Array2::zeros(self.w_hg.raw_dim()),
            w_ho: Array2::zeros(self.w_ho.raw_dim()),
            b_i: Array1::zeros(self.b_i.raw_dim()),
            b_f: Array1::zeros(self.b_f.raw_dim()),
            b_g: Array1::zeros(self.b_g.raw_dim()),
            b_o: Array1::zeros(self.b_o.raw_dim()),
        }
    }

    fn add_assign(&mut self, other: &Self) {
        for (a, b) in self.matrices_mut().into_iter().zip(other.matrices()) {
            *a += b;
        }
        for (a, b) in self.biases_mut().into_iter().zip(other.biases()) {
            *a += b;
        }
    }

    fn scale(&mut self, factor: f64) {
        for m in self.matrices_mut() {
            *m *= factor;
        }
        for b in self.biases_mut() {
            *b *= factor;
        }
    }

    fn sum_squares(&self) -> f64 {
        self.matrices().iter().map(|m| m.mapv(|x| x * x).sum()).sum::<f64>()
            + self.biases().iter().map(|b| b.mapv(|x| x * x).sum()).sum::<f64>()
    }

    fn num_parameters(&self) -> usize {
        self.matrices().iter().map(|m| m.len()).sum::<usize>()
            + self.biases().iter().map(|b| b.len()).sum::<usize>()
    }

    fn apply_gradients(&mut self, grads: &Self, optimizer: &mut AdamOptimizer, prefix: &str) {
        for (name, (param, grad)) in MATRIX_NAMES.iter().zip(self.matrices_mut().into_iter().zip(grads.matrices())) {
            optimizer.update(&format!("{}.{}", prefix, name), param, grad);
        }
        for (name, (param, grad)) in BIAS_NAMES.iter().zip(self.biases_mut().into_iter().zip(grads.biases())) {
            optimizer.update(&format!("{}.{}", prefix, name), param, grad);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DenseLayerWeights {
    pub w: Array2<f64>,
    pub b: Array1<f64>,
}

impl DenseLayerWeights {
    fn new(input_size: usize, output_size: usize, rng: &mut StdRng) -> Result<Self, ForecastError> {
        Ok(DenseLayerWeights {
            w: xavier_init(input_size, output_size, rng)?,
            b: Array1::zeros(output_size),
        })
    }

    fn zeros_like(&self) -> Self {
        DenseLayerWeights {
            w: Array2::zeros(self.w.raw_dim()),
            b: Array1::zeros(self.b.raw_dim()),
        }
    }

    fn add_assign(&mut self, other: &Self) {
        self.w += &other.w;
        self.b += &other.b;
    }

    fn scale(&mut self, factor: f64) {
        self.w *= factor;
        self.b *= factor;
    }

    fn sum_squares(&self) -> f64 {
        self.w.mapv(|x| x * x).sum() + self.b.mapv(|x| x * x).sum()
    }

    fn apply_gradients(&mut self, grads: &Self, optimizer: &mut AdamOptimizer, prefix: &str) {
        optimizer.update(&format!("{}.w", prefix), &mut self.w, &grads.w);
        optimizer.update(&format!("{}.b", prefix), &mut self.b, &grads.b);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub feature_dim: usize,
    pub lstm_units_1: usize,
    pub lstm_units_2: usize,
    pub dense_units: usize,
    pub output_size: usize,
    pub dropout: f64,
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), ForecastError> {
        if self.feature_dim == 0 || self.lstm_units_1 == 0 || self.lstm_units_2 == 0
            || self.dense_units == 0 || self.output_size == 0
        {
            return Err(ForecastError::ModelConfiguration(format!("All layer sizes must be positive: {:?}", self)));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ForecastError::ModelConfiguration(format!("Dropout {} outside [0, 1)", self.dropout)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelWeights {
    pub config: NetworkConfig,
    pub lstm_layers: Vec<LstmLayerWeights>,
    pub hidden_layer: DenseLayerWeights,
    pub final_layer: DenseLayerWeights,
}

impl ModelWeights {
    fn zeros_like(&self) -> Self {
        ModelWeights {
            config: self.config.clone(),
            lstm_layers: self.lstm_layers.iter().map(LstmLayerWeights::zeros_like).collect(),
            hidden_layer: self.hidden_layer.zeros_like(),
            final_layer: self.final_layer.zeros_like(),
        }
    }

    fn add_assign(&mut self, other: &Self) {
        for (a, b) in self.lstm_layers.iter_mut().zip(other.lstm_layers.iter()) {
            a.add_assign(b);
        }
        self.hidden_layer.add_assign(&other.hidden_layer);
        self.final_layer.add_assign(&other.final_layer);
    }

    fn global_norm(&self) -> f64 {
        let lstm: f64 = self.lstm_layers.iter().map(LstmLayerWeights::sum_squares).sum();
        (lstm + self.hidden_layer.sum_squares() + self.final_layer.sum_squares()).sqrt()
    }

    fn scale(&mut self, factor: f64) {
        for layer in &mut self.lstm_layers {
            layer.scale(factor);
        }
        self.hidden_layer.scale(factor);
        self.final_layer.scale(factor);
    }

    pub(crate) fn validate_shapes(&self) -> Result<(), ForecastError> {
        self.config.validate()?;
        let c = &self.config;
        let mismatch = |what: &str| Err(ForecastError::ModelConfiguration(format!("Weight shape mismatch in {}", what)));

        if self.lstm_layers.len() != 2 {
            return mismatch("LSTM layer count");
        }
        let expected = [(c.feature_dim, c.lstm_units_1), (c.lstm_units_1, c.lstm_units_2)];
        for (layer, (input, hidden)) in self.lstm_layers.iter().zip(expected) {
            let ok = layer.matrices()[..4].iter().all(|m| m.dim() == (hidden, input))
                && layer.matrices()[4..].iter().all(|m| m.dim() == (hidden, hidden))
                && layer.biases().iter().all(|b| b.len() == hidden);
            if !ok {
                return mismatch("LSTM layer");
            }
        }
        if self.hidden_layer.w.dim() != (c.dense_units, c.lstm_units_2) || self.hidden_layer.b.len() != c.dense_units {
            return mismatch("hidden dense layer");
        }
        if self.final_layer.w.dim() != (c.output_size, c.dense_units) || self.final_layer.b.len() != c.output_size {
            return mismatch("output layer");
        }
        Ok(())
    }
}

struct LstmStepCache {
    x: Array1<f64>,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    tanh_c: Array1<f64>,
}

struct DropoutMasks {
    first: Array2<f64>,
    second: Array1<f64>,
}

struct ForwardCache {
    layer1: Vec<LstmStepCache>,
    layer2: Vec<LstmStepCache>,
    dropped2: Array1<f64>,
    dense_pre: Array1<f64>,
    dense_out: Array1<f64>,
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    a.view().insert_axis(Axis(1)).dot(&b.view().insert_axis(Axis(0)))
}

fn forward_lstm_layer(layer: &LstmLayerWeights, input: &Array2<f64>) -> (Array2<f64>, Vec<LstmStepCache>) {
    let hidden_size = layer.hidden_size();
    let seq_len = input.nrows();
    let mut outputs = Array2::zeros((seq_len, hidden_size));
    let mut caches = Vec::with_capacity(seq_len);
    let mut hidden: Array1<f64> = Array1::zeros(hidden_size);
    let mut cell: Array1<f64> = Array1::zeros(hidden_size);

    for t in 0..seq_len {
        let x_t = input.row(t).to_owned();

        let i_t = sigmoid(&(layer.w_ii.dot(&x_t) + layer.w_hi.dot(&hidden) + &layer.b_i));
        let f_t = sigmoid(&(layer.w_if.dot(&x_t) + layer.w_hf.dot(&hidden) + &layer.b_f));
        let g_t = tanh(&(layer.w_ig.dot(&x_t) + layer.w_hg.dot(&hidden) + &layer.b_g));
        let o_t = sigmoid(&(layer.w_io.dot(&x_t) + layer.w_ho.dot(&hidden) + &layer.b_o));

        let new_cell = &f_t * &cell + &i_t * &g_t;
        let tanh_c = tanh(&new_cell);
        let new_hidden = &o_t * &tanh_c;
        outputs.row_mut(t).assign(&new_hidden);

        caches.push(LstmStepCache {
            x: x_t,
            h_prev: hidden,
            c_prev: cell,
            i: i_t,
            f: f_t,
            g: g_t,
            o: o_t,
            tanh_c,
        });
        hidden = new_hidden;
        cell = new_cell;
    }

    (outputs, caches)
}

/// Backpropagation through time for one layer. Accumulates into `grads` and
/// returns the gradient with respect to the layer input sequence.
fn backward_lstm_layer(
    layer: &LstmLayerWeights,
    caches: &[LstmStepCache],
    d_outputs: &Array2<f64>,
    grads: &mut LstmLayerWeights,
) -> Array2<f64> {
    let hidden_size = layer.hidden_size();
    let mut d_inputs: Array2<f64> = Array2::zeros((caches.len(), layer.input_size()));
    let mut dh_next: Array1<f64> = Array1::zeros(hidden_size);
    let mut dc_next: Array1<f64> = Array1::zeros(hidden_size);

    for (t, cache) in caches.iter().enumerate().rev() {
        let dh = &d_outputs.row(t) + &dh_next;

        let dz_o = &dh * &cache.tanh_c * &cache.o.mapv(|v| v * (1.0 - v));
        let dc = &dh * &cache.o * &cache.tanh_c.mapv(|v| 1.0 - v * v) + &dc_next;
        let dz_i = &dc * &cache.g * &cache.i.mapv(|v| v * (1.0 - v));
        let dz_g = &dc * &cache.i * &cache.g.mapv(|v| 1.0 - v * v);
        let dz_f = &dc * &cache.c_prev * &cache.f.mapv(|v| v * (1.0 - v));
        dc_next = &dc * &cache.f;

        grads.w_ii += &outer(&dz_i, &cache.x);
        grads.w_if += &outer(&dz_f, &cache.x);
        grads.w_ig += &outer(&dz_g, &cache.x);
        grads.w_io += &outer(&dz_o, &cache.x);
        grads.w_hi += &outer(&dz_i, &cache.h_prev);
        grads.w_hf += &outer(&dz_f, &cache.h_prev);
        grads.w_hg += &outer(&dz_g, &cache.h_prev);
        grads.w_ho += &outer(&dz_o, &cache.h_prev);
        grads.b_i += &dz_i;
        grads.b_f += &dz_f;
        grads.b_g += &dz_g;
        grads.b_o += &dz_o;

        let dx = layer.w_ii.t().dot(&dz_i) + layer.w_if.t().dot(&dz_f)
            + layer.w_ig.t().dot(&dz_g) + layer.w_io.t().dot(&dz_o);
        d_inputs.row_mut(t).assign(&dx);

        dh_next = layer.w_hi.t().dot(&dz_i) + layer.w_hf.t().dot(&dz_f)
            + layer.w_hg.t().dot(&dz_g) + layer.w_ho.t().dot(&dz_o);
    }

    d_inputs
}

pub struct LstmForecaster {
    weights: ModelWeights,
}

impl LstmForecaster {
    pub fn new(config: NetworkConfig, rng: &mut StdRng) -> Result<Self, ForecastError> {
        config.validate()?;
        let lstm_layers = vec![
            LstmLayerWeights::new(config.feature_dim, config.lstm_units_1, rng)?,
            LstmLayerWeights::new(config.lstm_units_1, config.lstm_units_2, rng)?,
        ];
        let hidden_layer = DenseLayerWeights::new(config.lstm_units_2, config.dense_units, rng)?;
        let final_layer = DenseLayerWeights::new(config.dense_units, config.output_size, rng)?;

        let model = LstmForecaster {
            weights: ModelWeights { config, lstm_layers, hidden_layer, final_layer },
        };
        log::debug!(
            "🛠️ [Model] LSTM({}) -> LSTM({}) -> Dense({}) -> Dense({}), {} parameters",
            model.weights.config.lstm_units_1,
            model.weights.config.lstm_units_2,
            model.weights.config.dense_units,
            model.weights.config.output_size,
            model.num_parameters()
        );
        Ok(model)
    }

    pub fn from_weights(weights: ModelWeights) -> Result<Self, ForecastError> {
        weights.validate_shapes()?;
        Ok(LstmForecaster { weights })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.weights.config
    }

    pub fn weights(&self) -> &ModelWeights {
        &self.weights
    }

    pub fn load_weights(&mut self, weights: &ModelWeights) -> Result<(), ForecastError> {
        if weights.config != self.weights.config {
            return Err(ForecastError::ModelConfiguration(format!(
                "Network mismatch: expected {:?}, got {:?}", self.weights.config, weights.config
            )));
        }
        self.weights = weights.clone();
        Ok(())
    }

    pub fn num_parameters(&self) -> usize {
        let w = &self.weights;
        w.lstm_layers.iter().map(LstmLayerWeights::num_parameters).sum::<usize>()
            + w.hidden_layer.w.len() + w.hidden_layer.b.len()
            + w.final_layer.w.len() + w.final_layer.b.len()
    }

    fn check_input(&self, input: &Array2<f64>) -> Result<(), ForecastError> {
        if input.nrows() == 0 || input.ncols() != self.weights.config.feature_dim {
            return Err(ForecastError::Shape(format!(
                "Expected (seq_len > 0, {}) input, got {:?}", self.weights.config.feature_dim, input.dim()
            )));
        }
        Ok(())
    }

    fn forward_pass(&self, input: &Array2<f64>, masks: Option<&DropoutMasks>) -> (Array1<f64>, ForwardCache) {
        let w = &self.weights;
        let (out1, layer1) = forward_lstm_layer(&w.lstm_layers[0], input);
        let dropped1 = match masks {
            Some(m) => &out1 * &m.first,
            None => out1,
        };

        let (out2, layer2) = forward_lstm_layer(&w.lstm_layers[1], &dropped1);
        let last = out2.row(out2.nrows() - 1).to_owned();
        let dropped2 = match masks {
            Some(m) => &last * &m.second,
            None => last,
        };

        let dense_pre = w.hidden_layer.w.dot(&dropped2) + &w.hidden_layer.b;
        let dense_out = relu(&dense_pre);
        let output = w.final_layer.w.dot(&dense_out) + &w.final_layer.b;

        (output, ForwardCache { layer1, layer2, dropped2, dense_pre, dense_out })
    }

    /// Inference without dropout.
    pub fn forward(&self, input: &Array2<f64>) -> Result<Array1<f64>, ForecastError> {
        self.check_input(input)?;
        let (output, _) = self.forward_pass(input, None);
        if output.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::Training("Network produced a non-finite output".into()));
        }
        Ok(output)
    }

    pub fn predict_batch(&self, inputs: &[Array2<f64>]) -> Result<Vec<Array1<f64>>, ForecastError> {
        inputs.par_iter()
            .map(|input| self.forward(input))
            .collect()
    }

    fn sample_masks(&self, seq_len: usize, rng: &mut StdRng) -> DropoutMasks {
        let c = &self.weights.config;
        let keep = 1.0 - c.dropout;
        let mut draw = |_: (usize, usize)| {
            if c.dropout <= 0.0 || rng.random::<f64>() < keep { 1.0 / keep } else { 0.0 }
        };
        let first = Array2::from_shape_fn((seq_len, c.lstm_units_1), &mut draw);
        let second = Array2::from_shape_fn((1, c.lstm_units_2), &mut draw).row(0).to_owned();
        DropoutMasks { first, second }
    }

    /// Squared error summed over the horizon, with gradients of
    /// `scale * sum((y - t)^2)`.
    fn sample_gradients(
        &self,
        input: &Array2<f64>,
        target: &Array1<f64>,
        masks: &DropoutMasks,
        scale: f64,
    ) -> (f64, ModelWeights) {
        let w = &self.weights;
        let mut grads = w.zeros_like();
        let (output, cache) = self.forward_pass(input, Some(masks));

        let error = &output - target;
        let loss = error.mapv(|e| e * e).sum();
        let d_output = error * (2.0 * scale);

        grads.final_layer.w += &outer(&d_output, &cache.dense_out);
        grads.final_layer.b += &d_output;
        let d_dense_out = w.final_layer.w.t().dot(&d_output);

        let d_dense_pre = d_dense_out * &cache.dense_pre.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        grads.hidden_layer.w += &outer(&d_dense_pre, &cache.dropped2);
        grads.hidden_layer.b += &d_dense_pre;
        let d_dropped2 = w.hidden_layer.w.t().dot(&d_dense_pre);

        let d_last = d_dropped2 * &masks.second;
        let seq_len = input.nrows();
        let mut d_out2: Array2<f64> = Array2::zeros((seq_len, w.config.lstm_units_2));
        d_out2.row_mut(seq_len - 1).assign(&d_last);

        let (first, rest) = grads.lstm_layers.split_at_mut(1);
        let d_dropped1 = backward_lstm_layer(&w.lstm_layers[1], &cache.layer2, &d_out2, &mut rest[0]);
        let d_out1 = d_dropped1 * &masks.first;
        backward_lstm_layer(&w.lstm_layers[0], &cache.layer1, &d_out1, &mut first[0]);

        (loss, grads)
    }

    /// One pass over `set` in shuffled mini-batches. Returns the mean
    /// per-element MSE of the epoch.
    pub fn train_epoch(
        &mut self,
        set: &WindowSet,
        optimizer: &mut AdamOptimizer,
        batch_size: usize,
        clip_norm: f64,
        rng: &mut StdRng,
    ) -> Result<f64, ForecastError> {
        if set.is_empty() {
            return Err(ForecastError::Training("No training windows".into()));
        }
        for input in &set.inputs {
            self.check_input(input)?;
        }

        let horizon = self.weights.config.output_size;
        let mut order: Vec<usize> = (0..set.len()).collect();
        order.shuffle(rng);

        let mut total_loss = 0.0;
        for batch in order.chunks(batch_size.max(1)) {
            let masks: Vec<DropoutMasks> = batch.iter()
                .map(|&idx| self.sample_masks(set.inputs[idx].nrows(), rng))
                .collect();
            let scale = 1.0 / (batch.len() * horizon) as f64;

            // Ordered collect keeps the summation order fixed across runs.
            let per_sample: Vec<(f64, ModelWeights)> = batch.par_iter()
                .zip(masks.par_iter())
                .map(|(&idx, m)| self.sample_gradients(&set.inputs[idx], &set.targets[idx], m, scale))
                .collect();

            let mut grads = self.weights.zeros_like();
            let mut batch_loss = 0.0;
            for (loss, g) in &per_sample {
                batch_loss += loss;
                grads.add_assign(g);
            }
            validate_finite(&[batch_loss], "training loss")?;

            let norm = grads.global_norm();
            if clip_norm > 0.0 && norm > clip_norm {
                grads.scale(clip_norm / norm);
            }

            optimizer.step();
            self.apply_gradients(&grads, optimizer);
            total_loss += batch_loss / horizon as f64;
        }

        Ok(total_loss / set.len() as f64)
    }

    fn apply_gradients(&mut self, grads: &ModelWeights, optimizer: &mut AdamOptimizer) {
        for (idx, (layer, g)) in self.weights.lstm_layers.iter_mut().zip(grads.lstm_layers.iter()).enumerate() {
            layer.apply_gradients(g, optimizer, &format!("lstm{}", idx));
        }
        self.weights.hidden_layer.apply_gradients(&grads.hidden_layer, optimizer, "dense");
        self.weights.final_layer.apply_gradients(&grads.final_layer, optimizer, "output");
    }

    /// (MSE, MAE) over every horizon step of every window.
    pub fn evaluate(&self, set: &WindowSet) -> Result<(f64, f64), ForecastError> {
        if set.is_empty() {
            return Err(ForecastError::Training("No windows to evaluate".into()));
        }
        let outputs = self.predict_batch(&set.inputs)?;
        let predictions: Vec<f64> = outputs.iter().flat_map(|o| o.iter().copied()).collect();
        let targets: Vec<f64> = set.targets.iter().flat_map(|t| t.iter().copied()).collect();
        if predictions.len() != targets.len() {
            return Err(ForecastError::Shape(format!(
                "{} predictions for {} targets", predictions.len(), targets.len()
            )));
        }
        let mse = mse_loss(&predictions, &targets);
        let mae = mae_loss(&predictions, &targets);
        validate_finite(&[mse, mae], "evaluation loss")?;
        Ok((mse, mae))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::SeedableRng;

    fn tiny_config(dropout: f64) -> NetworkConfig {
        NetworkConfig {
            feature_dim: 2,
            lstm_units_1: 3,
            lstm_units_2: 2,
            dense_units: 4,
            output_size: 2,
            dropout,
        }
    }

    fn ramp_set(windows: usize, seq_len: usize) -> WindowSet {
        let mut set = WindowSet::default();
        for k in 0..windows {
            let base = k as f64 / windows as f64;
            let input = Array2::from_shape_fn((seq_len, 2), |(t, f)| base + 0.01 * t as f64 + 0.1 * f as f64);
            set.inputs.push(input);
            set.targets.push(Array1::from(vec![base + 0.05, base + 0.1]));
            set.anchor_dates.push(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(k as i64));
        }
        set
    }

    #[test]
    fn test_lstm_creation() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = LstmForecaster::new(tiny_config(0.2), &mut rng).unwrap();
        assert_eq!(model.weights().lstm_layers.len(), 2);
        // 4*(3*2 + 3*3 + 3) + 4*(2*3 + 2*2 + 2) + (4*2 + 4) + (2*4 + 2)
        assert_eq!(model.num_parameters(), 72 + 48 + 12 + 10);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut config = tiny_config(0.0);
        config.dropout = 1.0;
        assert!(LstmForecaster::new(config, &mut rng).is_err());
    }

    #[test]
    fn test_forward_output_shape_and_determinism() {
        let mut rng = StdRng::seed_from_u64(3);
        let model = LstmForecaster::new(tiny_config(0.3), &mut rng).unwrap();
        let input = Array2::from_shape_fn((5, 2), |(t, f)| (t + f) as f64 * 0.1);
        let a = model.forward(&input).unwrap();
        let b = model.forward(&input).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a, b);
        assert!(model.forward(&Array2::zeros((5, 3))).is_err());
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(11);
        let model = LstmForecaster::new(tiny_config(0.0), &mut rng).unwrap();
        let input = Array2::from_shape_fn((4, 2), |(t, f)| 0.3 * t as f64 - 0.2 * f as f64 + 0.1);
        let target = Array1::from(vec![0.4, -0.2]);
        let masks = model.sample_masks(4, &mut rng);
        let (_, grads) = model.sample_gradients(&input, &target, &masks, 1.0);

        let loss_of = |weights: &ModelWeights| {
            let m = LstmForecaster::from_weights(weights.clone()).unwrap();
            let out = m.forward(&input).unwrap();
            (&out - &target).mapv(|e| e * e).sum()
        };

        let eps = 1e-6;
        for which in 0..6 {
            let mut grads_copy = grads.clone();
            let analytic = *probe(&mut grads_copy, which);
            let mut plus = model.weights().clone();
            *probe(&mut plus, which) += eps;
            let mut minus = model.weights().clone();
            *probe(&mut minus, which) -= eps;
            let numeric = (loss_of(&plus) - loss_of(&minus)) / (2.0 * eps);
            assert!(
                (numeric - analytic).abs() < 1e-5 * (1.0 + numeric.abs()),
                "probe {}: numeric {} vs analytic {}", which, numeric, analytic
            );
        }
    }

    fn probe(w: &mut ModelWeights, which: usize) -> &mut f64 {
        match which {
            0 => &mut w.lstm_layers[0].w_ii[[1, 0]],
            1 => &mut w.lstm_layers[0].w_hf[[2, 1]],
            2 => &mut w.lstm_layers[1].b_g[0],
            3 => &mut w.lstm_layers[1].w_ho[[1, 0]],
            4 => &mut w.hidden_layer.w[[0, 1]],
            _ => &mut w.final_layer.b[1],
        }
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = LstmForecaster::new(tiny_config(0.0), &mut rng).unwrap();
        let set = ramp_set(16, 6);
        let mut optimizer = AdamOptimizer::with_learning_rate(0.01);
        let (before, _) = model.evaluate(&set).unwrap();
        for _ in 0..60 {
            model.train_epoch(&set, &mut optimizer, 4, 1.0, &mut rng).unwrap();
        }
        let (after, mae) = model.evaluate(&set).unwrap();
        assert!(after < before, "loss {} -> {}", before, after);
        assert!(mae.is_finite());
    }

    #[test]
    fn test_seeded_training_is_reproducible() {
        let run = || {
            let mut rng = StdRng::seed_from_u64(9);
            let mut model = LstmForecaster::new(tiny_config(0.2), &mut rng).unwrap();
            let mut optimizer = AdamOptimizer::with_learning_rate(0.01);
            let set = ramp_set(8, 5);
            model.train_epoch(&set, &mut optimizer, 3, 1.0, &mut rng).unwrap();
            model.weights().clone()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_weights_round_trip_through_json() {
        let mut rng = StdRng::seed_from_u64(2);
        let model = LstmForecaster::new(tiny_config(0.1), &mut rng).unwrap();
        let json = serde_json::to_string(model.weights()).unwrap();
        let restored: ModelWeights = serde_json::from_str(&json).unwrap();
        let reloaded = LstmForecaster::from_weights(restored).unwrap();
        let input = Array2::from_elem((3, 2), 0.5);
        assert_eq!(model.forward(&input).unwrap(), reloaded.forward(&input).unwrap());
    }

    #[test]
    fn test_from_weights_rejects_bad_shapes() {
        let mut rng = StdRng::seed_from_u64(2);
        let model = LstmForecaster::new(tiny_config(0.1), &mut rng).unwrap();
        let mut weights = model.weights().clone();
        weights.final_layer.b = Array1::zeros(5);
        assert!(LstmForecaster::from_weights(weights).is_err());
    }
}
