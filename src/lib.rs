// projeto: lstmforecast
// file: src/lib.rs

pub mod config;
pub mod neural;
pub mod services;

pub use config::AppConfig;
pub use neural::ForecastError;
