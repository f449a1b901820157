//! Configuration management for the anomaly service

use crate::models::ForestParams;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable overriding the configuration file path
pub const CONFIG_PATH_ENV: &str = "IOT_ANOMALY_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8002,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Model persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Directory holding one file per (device, model kind)
    pub models_dir: PathBuf,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
        }
    }
}

/// Per-device incremental detector configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Observations required before a detector trains
    pub min_observations: usize,
    /// Maximum length of the rolling baseline
    pub baseline_capacity: usize,
    /// Normal observations appended between retrains
    pub retrain_interval: usize,
    /// Isolation forest size
    pub n_estimators: usize,
    /// Rows sampled per tree
    pub max_samples: usize,
    /// Expected share of outliers
    pub contamination: f64,
    /// Seed for reproducible fitting
    pub seed: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_observations: 10,
            baseline_capacity: 1000,
            retrain_interval: 100,
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

impl DetectionConfig {
    pub fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_estimators: self.n_estimators,
            max_samples: self.max_samples,
            contamination: self.contamination,
            seed: self.seed,
        }
    }
}

/// Multi-feature ensemble configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Neighbours for the k-NN distance member
    pub knn_neighbors: usize,
    /// Neighbours for the local outlier factor member
    pub lof_neighbors: usize,
    /// Member weights for score averaging
    pub weights: HashMap<String, f64>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            knn_neighbors: 5,
            lof_neighbors: 20,
            weights: default_member_weights(),
        }
    }
}

fn default_member_weights() -> HashMap<String, f64> {
    let mut weights = HashMap::new();
    weights.insert("isolation_forest".to_string(), 1.0);
    weights.insert("knn".to_string(), 1.0);
    weights.insert("lof".to_string(), 1.0);
    weights
}

/// Capability flags for optional endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub advanced_anomaly: bool,
    pub forecasting: bool,
    pub scheduling: bool,
    pub predictive_maintenance: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            advanced_anomaly: true,
            forecasting: true,
            scheduling: true,
            predictive_maintenance: true,
        }
    }
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Seconds between logged summaries, 0 disables the reporter
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 300,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `$IOT_ANOMALY_CONFIG` or `config/config.toml`
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .with_context(|| format!("Failed to build configuration from {}", path.as_ref().display()))?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            models: ModelsConfig::default(),
            detection: DetectionConfig::default(),
            ensemble: EnsembleConfig::default(),
            features: FeatureFlags::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
