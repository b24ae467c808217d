// projeto: lstmforecast
// file: src/services/training.rs
// Background training supervisor: search -> final fit -> evaluation -> persistence

use chrono::Utc;
use crossbeam::channel::{self, Receiver, Sender};
use log::{error, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::AppConfig;
use crate::neural::data::{SequencePreprocessor, load_stock_series};
use crate::neural::metrics::{EarlyStopping, TrainingMetrics, TrainingProgress};
use crate::neural::model::LstmForecaster;
use crate::neural::search::{HyperParameters, HyperbandSearch, SearchSpace};
use crate::neural::storage::{ModelArtifact, artifact_path, remove_artifact, save_artifact};
use crate::neural::utils::{AdamOptimizer, ForecastError, generate_id};
use crate::services::metadata::{
    DataFile, FileStatus, MetadataStore, ModelStatus, PredictionModel, TaskStatus, TrainingTask,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrainRequest {
    pub data_file_id: String,
    pub model_name: String,
    pub prediction_days: usize,
    /// Overrides `training.seed` for this run.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusReport {
    pub status: TaskStatus,
    pub progress: TrainingProgress,
    pub result_model_id: Option<String>,
    pub error: Option<String>,
}

impl From<&TrainingTask> for TaskStatusReport {
    fn from(task: &TrainingTask) -> Self {
        TaskStatusReport {
            status: task.status,
            progress: task.progress,
            result_model_id: task.result_model_id.clone(),
            error: task.error.clone(),
        }
    }
}

struct TrainingJob {
    task_id: String,
    request: TrainRequest,
    data_file: DataFile,
}

/// Owns the single training worker. Jobs run one at a time in submission order.
pub struct TrainingSupervisor {
    store: Arc<MetadataStore>,
    config: Arc<AppConfig>,
    sender: Option<Sender<TrainingJob>>,
    worker: Option<JoinHandle<()>>,
}

impl TrainingSupervisor {
    pub fn new(store: Arc<MetadataStore>, config: Arc<AppConfig>) -> Result<Self, ForecastError> {
        fail_interrupted_tasks(&store)?;

        let (sender, receiver) = channel::unbounded::<TrainingJob>();
        let worker = TrainingWorker { store: Arc::clone(&store), config: Arc::clone(&config) };
        let handle = thread::Builder::new()
            .name("training-worker".into())
            .spawn(move || worker.run(receiver))?;

        Ok(TrainingSupervisor { store, config, sender: Some(sender), worker: Some(handle) })
    }

    /// Records a pending task and queues it. Returns immediately with the task id.
    pub fn submit(&self, request: TrainRequest) -> Result<String, ForecastError> {
        if request.model_name.trim().is_empty() {
            return Err(ForecastError::Validation("Model name must not be empty".into()));
        }
        let max_days = self.config.limits.max_prediction_days;
        if request.prediction_days == 0 || request.prediction_days > max_days {
            return Err(ForecastError::Validation(format!(
                "Prediction days must be between 1 and {}, got {}", max_days, request.prediction_days
            )));
        }
        let data_file = self.store.get_data_file(&request.data_file_id)?
            .ok_or_else(|| ForecastError::NotFound(format!("Data file {}", request.data_file_id)))?;
        if data_file.status != FileStatus::Valid {
            return Err(ForecastError::Validation(format!(
                "Data file {} is {:?} and cannot be used for training", data_file.file_id, data_file.status
            )));
        }
        let sender = self.sender.as_ref()
            .ok_or_else(|| ForecastError::Training("Training supervisor is shut down".into()))?;

        let task_id = generate_id("task");
        let task = TrainingTask::pending(
            task_id.clone(),
            request.model_name.clone(),
            request.data_file_id.clone(),
            request.prediction_days,
            self.config.training.final_epochs,
        );
        self.store.add_training_task(task)?;

        let job = TrainingJob { task_id: task_id.clone(), request, data_file };
        if sender.send(job).is_err() {
            let message = "Training worker is not running".to_string();
            self.store.update_training_task(&task_id, |t| {
                t.status = TaskStatus::Failed;
                t.completed_at = Some(Utc::now());
                t.error = Some(message.clone());
            })?;
            return Err(ForecastError::Training(message));
        }

        info!("📨 [Supervisor] Queued task {}", task_id);
        Ok(task_id)
    }

    pub fn task_status(&self, task_id: &str) -> Result<TaskStatusReport, ForecastError> {
        let task = self.store.get_training_task(task_id)?
            .ok_or_else(|| ForecastError::NotFound(format!("Training task {}", task_id)))?;
        Ok(TaskStatusReport::from(&task))
    }

    /// Polls until the task is terminal or `timeout` elapses, returning the
    /// latest snapshot either way.
    pub fn wait_for(&self, task_id: &str, timeout: Duration) -> Result<TaskStatusReport, ForecastError> {
        let deadline = Instant::now() + timeout;
        loop {
            let report = self.task_status(task_id)?;
            if report.status.is_terminal() || Instant::now() >= deadline {
                return Ok(report);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Closes the queue and waits for the running job to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("❌ [Supervisor] Training worker panicked");
            }
        }
    }
}

impl Drop for TrainingSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Tasks left pending or running by a previous process can never finish.
fn fail_interrupted_tasks(store: &MetadataStore) -> Result<(), ForecastError> {
    for task in store.list_training_tasks()? {
        if !task.status.is_terminal() {
            warn!("⚠️ [Supervisor] Task {} was interrupted while {:?}", task.task_id, task.status);
            store.update_training_task(&task.task_id, |t| {
                t.status = TaskStatus::Failed;
                t.completed_at = Some(Utc::now());
                t.error = Some("Interrupted by process restart".into());
            })?;
        }
    }
    Ok(())
}

struct TrainingWorker {
    store: Arc<MetadataStore>,
    config: Arc<AppConfig>,
}

struct TrainedModel {
    model: PredictionModel,
    artifact_path: PathBuf,
}

impl TrainingWorker {
    fn run(self, receiver: Receiver<TrainingJob>) {
        for job in receiver.iter() {
            self.process(job);
        }
        info!("🛑 [Supervisor] Worker stopped");
    }

    fn process(&self, job: TrainingJob) {
        let started = Instant::now();
        let task_id = job.task_id.clone();

        let claimed = self.store.update_training_task(&task_id, |t| {
            t.status = TaskStatus::Running;
            t.started_at = Some(Utc::now());
        });
        if let Err(e) = claimed {
            error!("❌ [Supervisor] Cannot claim task {}: {}", task_id, e);
            return;
        }
        info!(
            "🚀 [Supervisor] Training '{}' on {} for {} days (task {})",
            job.request.model_name, job.data_file.file_id, job.request.prediction_days, task_id
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.train(&job, started)))
            .unwrap_or_else(|_| Err(ForecastError::Training("Training worker panicked".into())));

        let result = outcome.and_then(|trained| {
            let duration = started.elapsed().as_secs_f64();
            let model_id = trained.model.model_id.clone();
            let completion = self.store.complete_training_task(&task_id, trained.model, Utc::now(), duration);
            if completion.is_err() {
                if let Err(e) = remove_artifact(&trained.artifact_path) {
                    warn!("⚠️ [Supervisor] Could not remove {}: {}", trained.artifact_path.display(), e);
                }
            }
            completion.map(|_| (model_id, duration))
        });

        match result {
            Ok((model_id, duration)) => {
                info!("✅ [Supervisor] Task {} completed in {:.2}s -> {}", task_id, duration, model_id);
            }
            Err(e) => {
                error!("❌ [Supervisor] Task {} failed: {}", task_id, e);
                let message = e.to_string();
                let duration = started.elapsed().as_secs_f64();
                let recorded = self.store.update_training_task(&task_id, |t| {
                    t.status = TaskStatus::Failed;
                    t.completed_at = Some(Utc::now());
                    t.duration = Some(duration);
                    t.error = Some(message);
                });
                if let Err(e) = recorded {
                    error!("❌ [Supervisor] Cannot record failure of {}: {}", task_id, e);
                }
            }
        }
    }

    fn train(&self, job: &TrainingJob, started: Instant) -> Result<TrainedModel, ForecastError> {
        let training = &self.config.training;
        let horizon = job.request.prediction_days;
        let lookback = training.lookback_window;
        let seed = job.request.seed.or(training.seed);

        let series = load_stock_series(&job.data_file.file_path)?;
        let preprocessor = SequencePreprocessor::new(lookback, horizon, training.validation_split)?;
        let prepared = preprocessor.prepare(&series)?;

        let space = SearchSpace::from_config(&self.config.search)?;
        let search = HyperbandSearch::new(space, training.dense_units, training.clip_norm, seed);
        let outcome = search.search(&prepared.train, &prepared.validation, prepared.feature_dim(), horizon, lookback)?;
        info!(
            "🏆 [Supervisor] Search done: {} trials, {} failed, best val_loss {:.6}",
            outcome.trials, outcome.failed, outcome.best_score
        );

        let best = outcome.best;
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s.wrapping_add(1)),
            None => StdRng::from_os_rng(),
        };
        let mut model = LstmForecaster::new(
            best.network_config(prepared.feature_dim(), training.dense_units, horizon),
            &mut rng,
        )?;
        let mut optimizer = AdamOptimizer::with_learning_rate(best.learning_rate);
        let mut early_stopping = EarlyStopping::new(training.early_stopping_patience, 0.0);
        let mut best_weights = model.weights().clone();
        let eval_set = prepared.evaluation_set();
        let mut epochs_run = 0;

        for epoch in 1..=training.final_epochs {
            let train_loss = model.train_epoch(&prepared.train, &mut optimizer, training.batch_size, training.clip_norm, &mut rng)?;
            let (val_loss, _) = model.evaluate(eval_set)?;
            epochs_run = epoch;

            let progress = TrainingProgress {
                current_epoch: epoch,
                total_epochs: training.final_epochs,
                current_loss: train_loss,
                current_val_loss: val_loss,
            };
            self.store.update_training_task(&job.task_id, |t| t.progress = progress)?;
            log::debug!("[Supervisor] epoch {}/{} loss {:.6} val_loss {:.6}", epoch, training.final_epochs, train_loss, val_loss);

            let stop = early_stopping.should_stop(val_loss, epoch);
            if early_stopping.improved_last() {
                best_weights = model.weights().clone();
            }
            if stop {
                info!("⏹️ [Supervisor] Early stop at epoch {}, restoring epoch {}", epoch, early_stopping.best_epoch);
                break;
            }
        }
        model.load_weights(&best_weights)?;

        let (train_loss, train_mae) = model.evaluate(&prepared.train)?;
        let (val_loss, val_mae) = model.evaluate(eval_set)?;
        let metrics = TrainingMetrics { train_loss, val_loss, train_mae, val_mae };

        let hyperparameters = HyperParameters::new(
            best.lstm_units_1,
            best.lstm_units_2,
            best.dropout,
            best.learning_rate,
            training.batch_size,
            epochs_run,
            lookback,
        )?;

        let model_id = generate_id("model");
        let path = artifact_path(&self.config.paths.models_dir, &model_id, &job.request.model_name);
        let trained_at = Utc::now();
        let artifact = ModelArtifact {
            model_id: model_id.clone(),
            weights: model.weights().clone(),
            scaler: prepared.scaler.clone(),
            hyperparameters: hyperparameters.clone(),
            prediction_days: horizon,
            created_at: trained_at,
        };
        save_artifact(&artifact, &path)?;

        Ok(TrainedModel {
            model: PredictionModel {
                model_id,
                model_name: job.request.model_name.clone(),
                model_path: path.clone(),
                trained_at,
                training_duration: started.elapsed().as_secs_f64(),
                data_file_id: job.data_file.file_id.clone(),
                prediction_days: horizon,
                metrics,
                hyperparameters,
                training_task_id: job.task_id.clone(),
                status: ModelStatus::Ready,
            },
            artifact_path: path,
        })
    }
}
