//! Response bodies produced by the HTTP API

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::forecast::ForecastModel;
use crate::maintenance::MaintenancePriority;
use crate::metrics::MetricsSnapshot;
use crate::schedule::WeeklySchedule;

/// RFC 3339 timestamp used in every response
pub fn timestamp() -> String {
    rfc3339(Utc::now())
}

pub fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyResponse {
    pub device_id: String,
    pub anomalies: Vec<usize>,
    pub scores: Vec<f64>,
    /// 10th percentile of `scores`
    pub threshold: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvancedAnomalyResponse {
    pub device_id: String,
    pub device_type: String,
    pub anomalies: Vec<usize>,
    pub scores: Vec<f64>,
    pub member_scores: HashMap<String, Vec<f64>>,
    /// Decision threshold of each member on its raw score
    pub member_thresholds: HashMap<String, f64>,
    pub threshold: f64,
    pub anomaly_rate: f64,
    pub features: Vec<String>,
    pub retrained: bool,
    /// When the model in use was fitted, and on how many rows
    pub trained_at: String,
    pub training_rows: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastResponse {
    pub device_id: String,
    pub forecast: Vec<f64>,
    pub confidence: Vec<f64>,
    pub timestamp: String,
    pub model_type: ForecastModel,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleResponse {
    pub device_id: String,
    pub schedule: WeeklySchedule,
    pub energy_savings: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceResponse {
    pub device_id: String,
    pub device_type: String,
    pub failure_probability: f64,
    pub maintenance_priority: MaintenancePriority,
    pub days_to_maintenance: u32,
    pub recommendations: Vec<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
    pub device_id: String,
    pub models: Vec<String>,
    pub in_memory: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub device_id: String,
    pub cleared: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub capabilities: BTreeMap<&'static str, bool>,
    pub models_dir: String,
    pub cached_devices: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
