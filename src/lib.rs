//! IoT Anomaly Service Library
//!
//! Per-device incremental anomaly detection with on-disk model persistence,
//! a multi-feature ensemble detector, usage forecasting, predictive
//! maintenance and schedule optimization, served over HTTP.

pub mod api;
pub mod config;
pub mod detector;
pub mod error;
pub mod feature_extractor;
pub mod forecast;
pub mod maintenance;
pub mod metrics;
pub mod models;
pub mod schedule;
pub mod types;

pub use api::{router, AppState, Capabilities};
pub use config::AppConfig;
pub use detector::{AnomalyDetector, DetectorRegistry};
pub use feature_extractor::FeatureExtractor;
pub use metrics::ServiceMetrics;
pub use models::ModelStore;
