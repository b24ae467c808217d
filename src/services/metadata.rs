// projeto: lstmforecast
// file: src/services/metadata.rs
// JSON metadata store for data files, models and training tasks

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::neural::metrics::{TrainingMetrics, TrainingProgress};
use crate::neural::search::HyperParameters;
use crate::neural::utils::ForecastError;

pub const METADATA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Valid,
    Invalid,
    Deleted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Ready,
    Deleted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataFile {
    pub file_id: String,
    pub file_name: String,
    pub file_path: PathBuf,
    pub uploaded_at: DateTime<Utc>,
    pub date_range: DateRange,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub file_size: u64,
    pub status: FileStatus,
    #[serde(default)]
    pub validation_errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionModel {
    pub model_id: String,
    pub model_name: String,
    pub model_path: PathBuf,
    pub trained_at: DateTime<Utc>,
    /// Seconds.
    pub training_duration: f64,
    pub data_file_id: String,
    pub prediction_days: usize,
    pub metrics: TrainingMetrics,
    pub hyperparameters: HyperParameters,
    pub training_task_id: String,
    pub status: ModelStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrainingTask {
    pub task_id: String,
    pub model_name: String,
    pub data_file_id: String,
    pub prediction_days: usize,
    pub status: TaskStatus,
    pub progress: TrainingProgress,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub result_model_id: Option<String>,
    pub error: Option<String>,
}

impl TrainingTask {
    pub fn pending(task_id: String, model_name: String, data_file_id: String, prediction_days: usize, total_epochs: usize) -> Self {
        TrainingTask {
            task_id,
            model_name,
            data_file_id,
            prediction_days,
            status: TaskStatus::Pending,
            progress: TrainingProgress { total_epochs, ..TrainingProgress::default() },
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration: None,
            result_model_id: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataDocument {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub data_files: Vec<DataFile>,
    pub models: Vec<PredictionModel>,
    pub training_tasks: Vec<TrainingTask>,
}

impl MetadataDocument {
    pub fn empty() -> Self {
        MetadataDocument {
            version: METADATA_VERSION.to_string(),
            last_updated: Utc::now(),
            data_files: Vec::new(),
            models: Vec::new(),
            training_tasks: Vec::new(),
        }
    }
}

/// Single-file store. Every mutation is read-modify-write under one writer
/// lock, persisted through a temp file and a rename.
pub struct MetadataStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MetadataStore {
    pub fn open(path: &Path) -> Result<Self, ForecastError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let store = MetadataStore { path: path.to_path_buf(), write_lock: Mutex::new(()) };
        if store.tmp_path().exists() {
            warn!("⚠️ [MetadataStore] Ignoring stale {}", store.tmp_path().display());
        }
        // Surface corruption at start-up.
        let document = store.read()?;
        info!(
            "📂 [MetadataStore] {} (v{}): {} files, {} models, {} tasks",
            path.display(), document.version, document.data_files.len(),
            document.models.len(), document.training_tasks.len()
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = OsString::from(self.path.as_os_str());
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Full snapshot. A missing file is initialised with an empty document.
    pub fn read(&self) -> Result<MetadataDocument, ForecastError> {
        if !self.path.exists() {
            let _guard = self.lock();
            if !self.path.exists() {
                let mut document = MetadataDocument::empty();
                self.persist(&mut document)?;
                info!("🆕 [MetadataStore] Initialised {}", self.path.display());
                return Ok(document);
            }
        }
        self.load()
    }

    fn load(&self) -> Result<MetadataDocument, ForecastError> {
        let content = fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| ForecastError::StoreCorruption {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn write(&self, snapshot: MetadataDocument) -> Result<(), ForecastError> {
        let _guard = self.lock();
        let mut snapshot = snapshot;
        self.persist(&mut snapshot)
    }

    /// Caller must hold the writer lock.
    fn persist(&self, document: &mut MetadataDocument) -> Result<(), ForecastError> {
        document.last_updated = Utc::now();
        let data = serde_json::to_vec_pretty(document)?;
        let tmp = self.tmp_path();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!("💾 [MetadataStore] Wrote {} bytes to {}", data.len(), self.path.display());
        Ok(())
    }

    /// Re-reads the document, applies `f` and persists the result, all under
    /// the writer lock. Nothing is written when `f` fails.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut MetadataDocument) -> Result<T, ForecastError>,
    ) -> Result<T, ForecastError> {
        let _guard = self.lock();
        let mut document = if self.path.exists() { self.load()? } else { MetadataDocument::empty() };
        let result = f(&mut document)?;
        self.persist(&mut document)?;
        Ok(result)
    }

    // data files

    pub fn add_data_file(&self, data_file: DataFile) -> Result<(), ForecastError> {
        self.mutate(|doc| {
            if doc.data_files.iter().any(|f| f.file_id == data_file.file_id) {
                return Err(ForecastError::Validation(format!("Duplicate file id {}", data_file.file_id)));
            }
            doc.data_files.push(data_file);
            Ok(())
        })
    }

    pub fn get_data_file(&self, file_id: &str) -> Result<Option<DataFile>, ForecastError> {
        Ok(self.read()?.data_files.into_iter().find(|f| f.file_id == file_id))
    }

    pub fn list_data_files(&self, include_deleted: bool) -> Result<Vec<DataFile>, ForecastError> {
        Ok(self.read()?
            .data_files
            .into_iter()
            .filter(|f| include_deleted || f.status != FileStatus::Deleted)
            .collect())
    }

    pub fn update_data_file_status(&self, file_id: &str, status: FileStatus) -> Result<bool, ForecastError> {
        self.mutate(|doc| {
            Ok(match doc.data_files.iter_mut().find(|f| f.file_id == file_id) {
                Some(file) => {
                    file.status = status;
                    true
                }
                None => false,
            })
        })
    }

    // models

    pub fn add_model(&self, model: PredictionModel) -> Result<(), ForecastError> {
        self.mutate(|doc| {
            if doc.models.iter().any(|m| m.model_id == model.model_id) {
                return Err(ForecastError::Validation(format!("Duplicate model id {}", model.model_id)));
            }
            doc.models.push(model);
            Ok(())
        })
    }

    pub fn get_model(&self, model_id: &str) -> Result<Option<PredictionModel>, ForecastError> {
        Ok(self.read()?.models.into_iter().find(|m| m.model_id == model_id))
    }

    pub fn list_models(&self, include_deleted: bool) -> Result<Vec<PredictionModel>, ForecastError> {
        Ok(self.read()?
            .models
            .into_iter()
            .filter(|m| include_deleted || m.status != ModelStatus::Deleted)
            .collect())
    }

    pub fn soft_delete_model(&self, model_id: &str) -> Result<bool, ForecastError> {
        self.mutate(|doc| {
            Ok(match doc.models.iter_mut().find(|m| m.model_id == model_id) {
                Some(model) => {
                    model.status = ModelStatus::Deleted;
                    true
                }
                None => false,
            })
        })
    }

    pub fn hard_delete_model(&self, model_id: &str) -> Result<bool, ForecastError> {
        self.mutate(|doc| {
            let before = doc.models.len();
            doc.models.retain(|m| m.model_id != model_id);
            Ok(doc.models.len() < before)
        })
    }

    // training tasks

    pub fn add_training_task(&self, task: TrainingTask) -> Result<(), ForecastError> {
        self.mutate(|doc| {
            if doc.training_tasks.iter().any(|t| t.task_id == task.task_id) {
                return Err(ForecastError::Validation(format!("Duplicate task id {}", task.task_id)));
            }
            doc.training_tasks.push(task);
            Ok(())
        })
    }

    pub fn get_training_task(&self, task_id: &str) -> Result<Option<TrainingTask>, ForecastError> {
        Ok(self.read()?.training_tasks.into_iter().find(|t| t.task_id == task_id))
    }

    pub fn list_training_tasks(&self) -> Result<Vec<TrainingTask>, ForecastError> {
        Ok(self.read()?.training_tasks)
    }

    /// Applies `update` to a non-terminal task. Completed and failed tasks
    /// are final.
    pub fn update_training_task(
        &self,
        task_id: &str,
        update: impl FnOnce(&mut TrainingTask),
    ) -> Result<TrainingTask, ForecastError> {
        self.mutate(|doc| {
            let task = find_open_task(doc, task_id)?;
            update(task);
            Ok(task.clone())
        })
    }

    /// Registers the ready model and completes its task in one write.
    pub fn complete_training_task(
        &self,
        task_id: &str,
        model: PredictionModel,
        completed_at: DateTime<Utc>,
        duration: f64,
    ) -> Result<TrainingTask, ForecastError> {
        self.mutate(|doc| {
            if doc.models.iter().any(|m| m.model_id == model.model_id) {
                return Err(ForecastError::Validation(format!("Duplicate model id {}", model.model_id)));
            }
            let model_id = model.model_id.clone();
            let task = find_open_task(doc, task_id)?;
            task.status = TaskStatus::Completed;
            task.completed_at = Some(completed_at);
            task.duration = Some(duration);
            task.result_model_id = Some(model_id);
            task.error = None;
            let snapshot = task.clone();
            doc.models.push(model);
            Ok(snapshot)
        })
    }
}

fn find_open_task<'a>(doc: &'a mut MetadataDocument, task_id: &str) -> Result<&'a mut TrainingTask, ForecastError> {
    let task = doc.training_tasks.iter_mut()
        .find(|t| t.task_id == task_id)
        .ok_or_else(|| ForecastError::NotFound(format!("Training task {}", task_id)))?;
    if task.status.is_terminal() {
        return Err(ForecastError::Validation(format!(
            "Training task {} is already {:?}", task_id, task.status
        )));
    }
    Ok(task)
}
