// projeto: lstmforecast
// file: src/neural/search.rs
// Hyperband search over the network configuration space

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::neural::data::WindowSet;
use crate::neural::model::{LstmForecaster, NetworkConfig};
use crate::neural::utils::{AdamOptimizer, ForecastError};

const MAX_UNITS: usize = 1024;

/// Resolved configuration of one network. `lookback_window` is fixed by the
/// preprocessor; the other six fields are tunable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HyperParameters {
    pub lstm_units_1: usize,
    pub lstm_units_2: usize,
    pub dropout: f64,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub lookback_window: usize,
}

impl HyperParameters {
    pub fn new(
        lstm_units_1: usize,
        lstm_units_2: usize,
        dropout: f64,
        learning_rate: f64,
        batch_size: usize,
        epochs: usize,
        lookback_window: usize,
    ) -> Result<Self, ForecastError> {
        let params = HyperParameters {
            lstm_units_1,
            lstm_units_2,
            dropout,
            learning_rate,
            batch_size,
            epochs,
            lookback_window,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ForecastError> {
        let bad = |msg: String| Err(ForecastError::Validation(msg));
        if !(1..=MAX_UNITS).contains(&self.lstm_units_1) || !(1..=MAX_UNITS).contains(&self.lstm_units_2) {
            return bad(format!("LSTM units must be in 1..={}", MAX_UNITS));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return bad(format!("dropout {} outside [0, 1)", self.dropout));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return bad(format!("learning rate {} outside (0, 1]", self.learning_rate));
        }
        if self.batch_size == 0 || self.epochs == 0 || self.lookback_window == 0 {
            return bad("batch size, epochs and lookback window must be positive".to_string());
        }
        Ok(())
    }

    pub fn network_config(&self, feature_dim: usize, dense_units: usize, horizon: usize) -> NetworkConfig {
        NetworkConfig {
            feature_dim,
            lstm_units_1: self.lstm_units_1,
            lstm_units_2: self.lstm_units_2,
            dense_units,
            output_size: horizon,
            dropout: self.dropout,
        }
    }
}

impl Default for HyperParameters {
    fn default() -> Self {
        HyperParameters {
            lstm_units_1: 64,
            lstm_units_2: 32,
            dropout: 0.2,
            learning_rate: 0.001,
            batch_size: 32,
            epochs: 50,
            lookback_window: 60,
        }
    }
}

/// Discrete choices for each tunable field plus the hyperband budget.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    pub lstm_units_1: Vec<usize>,
    pub lstm_units_2: Vec<usize>,
    pub dropout: Vec<f64>,
    pub learning_rate: Vec<f64>,
    pub batch_size: Vec<usize>,
    pub max_epochs: usize,
    pub factor: usize,
    pub iterations: usize,
}

impl SearchSpace {
    pub fn from_config(config: &SearchConfig) -> Result<Self, ForecastError> {
        let space = SearchSpace {
            lstm_units_1: config.lstm_units_1.clone(),
            lstm_units_2: config.lstm_units_2.clone(),
            dropout: config.dropout.clone(),
            learning_rate: config.learning_rate.clone(),
            batch_size: config.batch_size.clone(),
            max_epochs: config.max_epochs,
            factor: config.factor,
            iterations: config.iterations,
        };
        space.validate()?;
        Ok(space)
    }

    pub fn validate(&self) -> Result<(), ForecastError> {
        if self.factor < 2 || self.max_epochs == 0 || self.iterations == 0 {
            return Err(ForecastError::Validation(
                "search needs factor >= 2, max_epochs >= 1 and iterations >= 1".into(),
            ));
        }
        // Every combination must be a valid configuration.
        for &u1 in &self.lstm_units_1 {
            for &u2 in &self.lstm_units_2 {
                for &dropout in &self.dropout {
                    for &lr in &self.learning_rate {
                        for &batch in &self.batch_size {
                            HyperParameters::new(u1, u2, dropout, lr, batch, self.max_epochs, 1)?;
                        }
                    }
                }
            }
        }
        if self.lstm_units_1.is_empty() || self.lstm_units_2.is_empty() || self.dropout.is_empty()
            || self.learning_rate.is_empty() || self.batch_size.is_empty()
        {
            return Err(ForecastError::Validation("search space has an empty dimension".into()));
        }
        Ok(())
    }

    fn sample(&self, rng: &mut StdRng, lookback_window: usize) -> Result<HyperParameters, ForecastError> {
        let empty = || ForecastError::Validation("search space has an empty dimension".into());
        Ok(HyperParameters {
            lstm_units_1: *self.lstm_units_1.choose(rng).ok_or_else(empty)?,
            lstm_units_2: *self.lstm_units_2.choose(rng).ok_or_else(empty)?,
            dropout: *self.dropout.choose(rng).ok_or_else(empty)?,
            learning_rate: *self.learning_rate.choose(rng).ok_or_else(empty)?,
            batch_size: *self.batch_size.choose(rng).ok_or_else(empty)?,
            epochs: 0,
            lookback_window,
        })
    }

    /// Largest s with factor^s <= max_epochs.
    pub fn max_bracket(&self) -> usize {
        let mut s = 0;
        let mut budget = self.factor;
        while budget <= self.max_epochs {
            s += 1;
            budget *= self.factor;
        }
        s
    }

    /// (initial candidates, initial epochs) for bracket `s`.
    pub fn bracket_shape(&self, s: usize) -> (usize, usize) {
        let eta = self.factor as f64;
        let s_max = self.max_bracket() as f64;
        let n = ((s_max + 1.0) / (s as f64 + 1.0) * eta.powi(s as i32)).ceil() as usize;
        let r = self.rung_epochs(s, 0);
        (n.max(1), r)
    }

    /// Epoch budget of rung `i` in bracket `s`.
    pub fn rung_epochs(&self, s: usize, i: usize) -> usize {
        let eta = self.factor as f64;
        let r = self.max_epochs as f64 * eta.powi(i as i32 - s as i32);
        (r.round() as usize).clamp(1, self.max_epochs)
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: HyperParameters,
    pub best_score: f64,
    pub trials: usize,
    pub failed: usize,
}

struct Candidate {
    params: HyperParameters,
    model: LstmForecaster,
    optimizer: AdamOptimizer,
    rng: StdRng,
    epochs_trained: usize,
    score: f64,
}

impl Candidate {
    fn train_to(
        &mut self,
        epochs: usize,
        train: &WindowSet,
        validation: &WindowSet,
        clip_norm: f64,
    ) -> Result<(), ForecastError> {
        while self.epochs_trained < epochs {
            self.model.train_epoch(train, &mut self.optimizer, self.params.batch_size, clip_norm, &mut self.rng)?;
            self.epochs_trained += 1;
        }
        let (val_loss, _) = self.model.evaluate(validation)?;
        self.score = val_loss;
        Ok(())
    }
}

pub struct HyperbandSearch {
    pub space: SearchSpace,
    pub dense_units: usize,
    pub clip_norm: f64,
    pub seed: Option<u64>,
}

impl HyperbandSearch {
    pub fn new(space: SearchSpace, dense_units: usize, clip_norm: f64, seed: Option<u64>) -> Self {
        HyperbandSearch { space, dense_units, clip_norm, seed }
    }

    /// Runs every bracket and returns the configuration with the lowest
    /// validation loss. Deterministic when a seed is set.
    pub fn search(
        &self,
        train: &WindowSet,
        validation: &WindowSet,
        feature_dim: usize,
        horizon: usize,
        lookback_window: usize,
    ) -> Result<SearchOutcome, ForecastError> {
        if train.is_empty() {
            return Err(ForecastError::InsufficientData { required: 1, actual: 0 });
        }
        let validation = if validation.is_empty() { train } else { validation };

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let s_max = self.space.max_bracket();
        let mut best: Option<(HyperParameters, f64)> = None;
        let mut trials = 0;
        let mut failed = 0;

        info!(
            "🔍 [Search] Hyperband: max_epochs={}, factor={}, brackets={}, iterations={}",
            self.space.max_epochs, self.space.factor, s_max + 1, self.space.iterations
        );

        for iteration in 0..self.space.iterations {
            for s in (0..=s_max).rev() {
                let (n, _) = self.space.bracket_shape(s);
                let mut candidates = Vec::with_capacity(n);
                for _ in 0..n {
                    let params = self.space.sample(&mut rng, lookback_window)?;
                    let mut candidate_rng = StdRng::seed_from_u64(rng.random::<u64>());
                    let config = params.network_config(feature_dim, self.dense_units, horizon);
                    match LstmForecaster::new(config, &mut candidate_rng) {
                        Ok(model) => candidates.push(Candidate {
                            optimizer: AdamOptimizer::with_learning_rate(params.learning_rate),
                            params,
                            model,
                            rng: candidate_rng,
                            epochs_trained: 0,
                            score: f64::INFINITY,
                        }),
                        Err(e) => {
                            warn!("⚠️ [Search] Candidate rejected: {}", e);
                            failed += 1;
                        }
                    }
                }
                trials += n;

                for i in 0..=s {
                    let epochs = self.space.rung_epochs(s, i);
                    let before = candidates.len();
                    candidates.retain_mut(|c| match c.train_to(epochs, train, validation, self.clip_norm) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("⚠️ [Search] Candidate {:?} failed: {}", c.params, e);
                            false
                        }
                    });
                    failed += before - candidates.len();
                    if candidates.is_empty() {
                        break;
                    }

                    candidates.sort_by(|a, b| a.score.total_cmp(&b.score));
                    debug!(
                        "[Search] iteration {} bracket {} rung {}: {} candidates at {} epochs, best {:.6}",
                        iteration, s, i, candidates.len(), epochs, candidates[0].score
                    );

                    if i < s {
                        let keep = (candidates.len() / self.space.factor).max(1);
                        candidates.truncate(keep);
                    }
                    if candidates.len() == 1 {
                        break;
                    }
                }

                if let Some(winner) = candidates.first() {
                    let is_better = best.as_ref().map_or(true, |(_, score)| winner.score < *score);
                    if is_better {
                        let mut params = winner.params.clone();
                        params.epochs = winner.epochs_trained;
                        info!("🎯 [Search] New best val_loss {:.6} with {:?}", winner.score, params);
                        best = Some((params, winner.score));
                    }
                }
            }
        }

        match best {
            Some((best, best_score)) => Ok(SearchOutcome { best, best_score, trials, failed }),
            None => Err(ForecastError::SearchExhausted(format!(
                "all {} candidates failed to train", trials
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn space(max_epochs: usize) -> SearchSpace {
        SearchSpace {
            lstm_units_1: vec![4, 6],
            lstm_units_2: vec![2, 3],
            dropout: vec![0.0, 0.1],
            learning_rate: vec![0.01, 0.001],
            batch_size: vec![4],
            max_epochs,
            factor: 3,
            iterations: 1,
        }
    }

    fn windows(count: usize, offset: f64) -> WindowSet {
        let mut set = WindowSet::default();
        for k in 0..count {
            let base = offset + k as f64 * 0.02;
            set.inputs.push(Array2::from_shape_fn((5, 2), |(t, f)| base + 0.01 * t as f64 + 0.05 * f as f64));
            set.targets.push(Array1::from(vec![base + 0.06, base + 0.07]));
            set.anchor_dates.push(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(k as i64));
        }
        set
    }

    #[test]
    fn test_hyperparameter_bounds() {
        assert!(HyperParameters::new(64, 32, 0.2, 0.001, 32, 50, 60).is_ok());
        assert!(HyperParameters::new(0, 32, 0.2, 0.001, 32, 50, 60).is_err());
        assert!(HyperParameters::new(64, 32, 1.0, 0.001, 32, 50, 60).is_err());
        assert!(HyperParameters::new(64, 32, 0.2, 0.0, 32, 50, 60).is_err());
        assert!(HyperParameters::new(64, 32, 0.2, 0.001, 0, 50, 60).is_err());
    }

    #[test]
    fn test_hyperparameters_serialize_camel_case() {
        let json = serde_json::to_value(HyperParameters::default()).unwrap();
        assert_eq!(json["lstmUnits1"], 64);
        assert_eq!(json["lookbackWindow"], 60);
        assert_eq!(json["learningRate"], 0.001);
    }

    #[test]
    fn test_bracket_shapes_for_default_budget() {
        let space = space(20);
        assert_eq!(space.max_bracket(), 2);
        assert_eq!(space.bracket_shape(2), (9, 2));
        assert_eq!(space.bracket_shape(1), (5, 7));
        assert_eq!(space.bracket_shape(0), (3, 20));
        assert_eq!(space.rung_epochs(2, 1), 7);
        assert_eq!(space.rung_epochs(2, 2), 20);
    }

    #[test]
    fn test_space_rejects_invalid_choices() {
        let mut bad = space(3);
        bad.dropout = vec![1.5];
        assert!(bad.validate().is_err());
        let mut empty = space(3);
        empty.batch_size.clear();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_search_finds_config_and_is_deterministic() {
        let search = HyperbandSearch::new(space(3), 3, 1.0, Some(42));
        let train = windows(12, 0.1);
        let validation = windows(4, 0.4);
        let first = search.search(&train, &validation, 2, 2, 5).unwrap();
        let second = search.search(&train, &validation, 2, 2, 5).unwrap();
        assert!(first.best_score.is_finite());
        assert_eq!(first.best, second.best);
        assert_eq!(first.best_score, second.best_score);
        assert_eq!(first.best.lookback_window, 5);
        assert!(first.best.epochs >= 1 && first.best.epochs <= 3);
        assert_eq!(first.failed, 0);
    }

    #[test]
    fn test_search_exhausted_when_every_candidate_fails() {
        let search = HyperbandSearch::new(space(1), 3, 1.0, Some(1));
        let train = windows(4, 0.1);
        // Wrong feature width makes every candidate fail on its first epoch.
        let err = search.search(&train, &train, 3, 2, 5).unwrap_err();
        assert!(matches!(err, ForecastError::SearchExhausted(_)));
    }
}
