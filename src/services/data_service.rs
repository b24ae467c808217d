// projeto: lstmforecast
// file: src/services/data_service.rs
// CSV ingestion, listing and deletion of uploaded price files

use chrono::Utc;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::LimitsConfig;
use crate::neural::data::CsvValidator;
use crate::neural::utils::{ForecastError, create_safe_filename, generate_id};
use crate::services::metadata::{DataFile, DateRange, FileStatus, MetadataStore, ModelStatus};

pub struct DataService {
    store: Arc<MetadataStore>,
    uploads_dir: PathBuf,
    limits: LimitsConfig,
}

impl DataService {
    pub fn new(store: Arc<MetadataStore>, uploads_dir: &Path, limits: LimitsConfig) -> Result<Self, ForecastError> {
        fs::create_dir_all(uploads_dir)?;
        Ok(DataService { store, uploads_dir: uploads_dir.to_path_buf(), limits })
    }

    /// Copies a local CSV into the upload area.
    pub fn upload_path(&self, source: &Path, name: Option<&str>) -> Result<DataFile, ForecastError> {
        let size = fs::metadata(source)
            .map_err(|e| ForecastError::Validation(format!("Cannot read {}: {}", source.display(), e)))?
            .len();
        self.check_size(size)?;
        let original_name = match name {
            Some(n) => n.to_string(),
            None => source.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| ForecastError::Validation(format!("{} has no file name", source.display())))?,
        };
        let content = fs::read(source)?;
        self.upload(&content, &original_name)
    }

    /// Stores `content` under a fresh id. Nothing is kept when the CSV
    /// fails validation.
    pub fn upload(&self, content: &[u8], original_name: &str) -> Result<DataFile, ForecastError> {
        self.check_size(content.len() as u64)?;
        if original_name.trim().is_empty() {
            return Err(ForecastError::Validation("File name must not be empty".into()));
        }

        let file_id = generate_id("file");
        let safe_name = create_safe_filename(&file_id, original_name);
        let file_path = self.uploads_dir.join(&safe_name);
        let tmp_path = self.uploads_dir.join(format!("{}.tmp", safe_name));
        fs::write(&tmp_path, content)?;

        let validator = CsvValidator::new(self.limits.min_rows, self.limits.max_rows);
        let series = match validator.validate(&tmp_path) {
            Ok(series) => series,
            Err(e) => {
                discard(&tmp_path);
                warn!("❌ [DataService] Rejected {}: {}", original_name, e);
                return Err(e);
            }
        };
        let (start, end) = series.date_range()
            .ok_or_else(|| ForecastError::Validation("Unable to determine date range".into()))?;

        fs::rename(&tmp_path, &file_path)?;

        let data_file = DataFile {
            file_id: file_id.clone(),
            file_name: original_name.to_string(),
            file_path: file_path.clone(),
            uploaded_at: Utc::now(),
            date_range: DateRange { start, end },
            row_count: series.len(),
            columns: series.columns.clone(),
            file_size: content.len() as u64,
            status: FileStatus::Valid,
            validation_errors: Vec::new(),
        };
        if let Err(e) = self.store.add_data_file(data_file.clone()) {
            discard(&file_path);
            return Err(e);
        }

        info!(
            "📥 [DataService] Stored {} as {} ({} rows, {} .. {})",
            original_name, file_id, data_file.row_count, start, end
        );
        Ok(data_file)
    }

    fn check_size(&self, size: u64) -> Result<(), ForecastError> {
        if size == 0 {
            return Err(ForecastError::Validation("File content must not be empty".into()));
        }
        if size > self.limits.max_file_size_bytes {
            return Err(ForecastError::Validation(format!(
                "File size {:.2}MB exceeds the {:.0}MB limit",
                size as f64 / 1024.0 / 1024.0,
                self.limits.max_file_size_bytes as f64 / 1024.0 / 1024.0
            )));
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<DataFile>, ForecastError> {
        self.store.list_data_files(false)
    }

    pub fn get(&self, file_id: &str) -> Result<DataFile, ForecastError> {
        self.store.get_data_file(file_id)?
            .ok_or_else(|| ForecastError::NotFound(format!("Data file {}", file_id)))
    }

    /// Refused while a live model was trained on the file.
    pub fn delete(&self, file_id: &str) -> Result<(), ForecastError> {
        let data_file = self.get(file_id)?;
        if data_file.status == FileStatus::Deleted {
            return Err(ForecastError::NotFound(format!("Data file {}", file_id)));
        }

        let users: Vec<String> = self.store.list_models(false)?
            .into_iter()
            .filter(|m| m.data_file_id == file_id && m.status == ModelStatus::Ready)
            .map(|m| m.model_name)
            .collect();
        if !users.is_empty() {
            return Err(ForecastError::Validation(format!(
                "Data file {} is used by model(s) {}", file_id, users.join(", ")
            )));
        }

        discard(&data_file.file_path);
        self.store.update_data_file_status(file_id, FileStatus::Deleted)?;
        info!("🗑️ [DataService] Deleted data file {}", file_id);
        Ok(())
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("⚠️ [DataService] Could not remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::neural::data::tests::write_series_csv;
    use crate::services::metadata::tests::sample_model;
    use tempfile::tempdir;

    fn service(root: &Path) -> (DataService, Arc<MetadataStore>) {
        let config = AppConfig::default().rooted_at(root);
        let store = Arc::new(MetadataStore::open(&config.paths.metadata_file).unwrap());
        let service = DataService::new(Arc::clone(&store), &config.paths.uploads_dir, config.limits.clone()).unwrap();
        (service, store)
    }

    #[test]
    fn test_upload_registers_valid_file() {
        let dir = tempdir().unwrap();
        let (service, _) = service(dir.path());
        let csv_path = dir.path().join("prices.csv");
        write_series_csv(&csv_path, 100, true);

        let data_file = service.upload_path(&csv_path, None).unwrap();
        assert!(data_file.file_id.starts_with("file_"));
        assert_eq!(data_file.file_name, "prices.csv");
        assert_eq!(data_file.row_count, 100);
        assert_eq!(data_file.status, FileStatus::Valid);
        assert!(data_file.file_path.exists());
        assert!(data_file.columns.contains(&"SMA5".to_string()));
        assert_eq!(data_file.date_range.start.to_string(), "2023-01-01");
        assert_eq!(service.list().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_upload_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let (service, store) = service(dir.path());
        let csv_path = dir.path().join("short.csv");
        write_series_csv(&csv_path, 10, false);

        let err = service.upload_path(&csv_path, Some("short.csv")).unwrap_err();
        assert!(matches!(err, ForecastError::Validation(_)));
        assert!(store.list_data_files(true).unwrap().is_empty());
        let leftovers = fs::read_dir(dir.path().join("data/uploaded")).unwrap().count();
        assert_eq!(leftovers, 0);

        assert!(service.upload(b"", "empty.csv").is_err());
    }

    #[test]
    fn test_delete_refused_while_model_uses_file() {
        let dir = tempdir().unwrap();
        let (service, store) = service(dir.path());
        let csv_path = dir.path().join("prices.csv");
        write_series_csv(&csv_path, 70, false);
        let data_file = service.upload_path(&csv_path, None).unwrap();

        store.add_model(sample_model("model_00000001", &data_file.file_id, 0.1)).unwrap();
        assert!(matches!(service.delete(&data_file.file_id), Err(ForecastError::Validation(_))));

        store.soft_delete_model("model_00000001").unwrap();
        service.delete(&data_file.file_id).unwrap();
        assert!(!data_file.file_path.exists());
        assert!(service.list().unwrap().is_empty());
        assert_eq!(service.get(&data_file.file_id).unwrap().status, FileStatus::Deleted);
        assert!(matches!(service.delete("file_missing"), Err(ForecastError::NotFound(_))));
    }
}
