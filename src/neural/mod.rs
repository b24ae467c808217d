// projeto: lstmforecast
// file: src/neural/mod.rs
// Module declarations for the forecasting model pipeline

pub mod utils;    // Error taxonomy, optimizer, activations and numeric helpers
pub mod data;     // CSV validation, feature selection, scaling and windowing
pub mod model;    // Stacked LSTM forecaster with backpropagation through time
pub mod metrics;  // Training metrics, progress snapshots and early stopping
pub mod search;   // Hyperband search over network configurations
pub mod storage;  // Model artifact persistence

// Re-export commonly used items for convenience
pub use data::{FeatureScaler, PreparedData, SequencePreprocessor, StockSeries, WindowSet};
pub use metrics::{EarlyStopping, TrainingMetrics, TrainingProgress};
pub use model::{LstmForecaster, ModelWeights, NetworkConfig};
pub use search::{HyperParameters, HyperbandSearch, SearchSpace};
pub use storage::ModelArtifact;
pub use utils::{AdamOptimizer, ForecastError};
