// projeto: lstmforecast
// file: src/services/model_service.rs
// Trained model listing, lookup and removal

use log::info;
use std::sync::Arc;

use crate::neural::storage::remove_artifact;
use crate::neural::utils::ForecastError;
use crate::services::metadata::{MetadataStore, ModelStatus, PredictionModel};

pub struct ModelService {
    store: Arc<MetadataStore>,
}

impl ModelService {
    pub fn new(store: Arc<MetadataStore>) -> Self {
        ModelService { store }
    }

    pub fn list(&self) -> Result<Vec<PredictionModel>, ForecastError> {
        self.store.list_models(false)
    }

    pub fn get(&self, model_id: &str) -> Result<PredictionModel, ForecastError> {
        self.store.get_model(model_id)?
            .ok_or_else(|| ForecastError::NotFound(format!("Model {}", model_id)))
    }

    /// Soft delete; `delete_artifact` also removes the weights file.
    pub fn delete(&self, model_id: &str, delete_artifact: bool) -> Result<(), ForecastError> {
        let model = self.get(model_id)?;
        if model.status == ModelStatus::Deleted {
            return Err(ForecastError::NotFound(format!("Model {}", model_id)));
        }
        self.store.soft_delete_model(model_id)?;
        if delete_artifact {
            remove_artifact(&model.model_path)?;
        }
        info!("🗑️ [ModelService] Deleted model {} ({})", model.model_name, model_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::metadata::tests::sample_model;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_delete_hides_model_and_optionally_removes_artifact() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MetadataStore::open(&dir.path().join("metadata.json")).unwrap());
        let service = ModelService::new(Arc::clone(&store));

        let mut kept = sample_model("model_00000001", "file_00000001", 0.1);
        kept.model_path = dir.path().join("kept.json");
        fs::write(&kept.model_path, b"{}").unwrap();
        let mut purged = sample_model("model_00000002", "file_00000001", 0.2);
        purged.model_path = dir.path().join("purged.json");
        fs::write(&purged.model_path, b"{}").unwrap();
        store.add_model(kept.clone()).unwrap();
        store.add_model(purged.clone()).unwrap();

        service.delete("model_00000001", false).unwrap();
        service.delete("model_00000002", true).unwrap();
        assert!(kept.model_path.exists());
        assert!(!purged.model_path.exists());
        assert!(service.list().unwrap().is_empty());
        assert_eq!(service.get("model_00000001").unwrap().status, ModelStatus::Deleted);

        assert!(matches!(service.delete("model_00000001", true), Err(ForecastError::NotFound(_))));
        assert!(matches!(service.get("model_missing"), Err(ForecastError::NotFound(_))));
    }
}
