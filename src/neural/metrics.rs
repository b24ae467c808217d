// projeto: lstmforecast
// file: src/neural/metrics.rs
// Training metrics, per-epoch progress and early stopping

use log::debug;
use serde::{Deserialize, Serialize};

/// Final losses of a trained model, in scaled units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct TrainingMetrics {
    #[serde(rename = "trainLoss")]
    pub train_loss: f64,
    #[serde(rename = "valLoss")]
    pub val_loss: f64,
    #[serde(rename = "trainMAE")]
    pub train_mae: f64,
    #[serde(rename = "valMAE")]
    pub val_mae: f64,
}

/// Snapshot published after every epoch of the final fit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrainingProgress {
    pub current_epoch: usize,
    pub total_epochs: usize,
    pub current_loss: f64,
    pub current_val_loss: f64,
}

/// Watches a loss that should go down.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    pub patience: usize,
    pub min_delta: f64,
    pub best_score: Option<f64>,
    pub best_epoch: usize,
    pub wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        EarlyStopping {
            patience,
            min_delta,
            best_score: None,
            best_epoch: 0,
            wait: 0,
        }
    }

    /// Records `current_score` for `epoch` and reports whether training should stop.
    pub fn should_stop(&mut self, current_score: f64, epoch: usize) -> bool {
        match self.best_score {
            None => {
                self.best_score = Some(current_score);
                self.best_epoch = epoch;
                self.wait = 0;
                false
            },
            Some(best) => {
                if current_score < best - self.min_delta {
                    self.best_score = Some(current_score);
                    self.best_epoch = epoch;
                    self.wait = 0;
                    false
                } else {
                    self.wait += 1;
                    if self.wait >= self.patience {
                        debug!("⏹️ [EarlyStopping] Stopped at epoch {} (best epoch {})", epoch, self.best_epoch);
                        true
                    } else {
                        false
                    }
                }
            }
        }
    }

    /// True when the last recorded score became the new best.
    pub fn improved_last(&self) -> bool {
        self.best_score.is_some() && self.wait == 0
    }
}
