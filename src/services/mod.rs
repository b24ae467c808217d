// projeto: lstmforecast
// file: src/services/mod.rs
// Stateful services built on the metadata store

pub mod metadata;        // Atomic JSON store for files, models and tasks
pub mod data_service;    // CSV upload, listing and deletion
pub mod model_service;   // Model lookup and soft delete
pub mod training;        // Background training supervisor
pub mod prediction;      // Autoregressive forecast engine
pub mod comparison;      // Model comparison

pub use comparison::ComparisonService;
pub use data_service::DataService;
pub use metadata::MetadataStore;
pub use model_service::ModelService;
pub use prediction::{ForecastEngine, PredictionRequest};
pub use training::{TrainRequest, TrainingSupervisor};
