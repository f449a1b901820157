//! Request bodies accepted by the HTTP API

use serde::Deserialize;

use crate::feature_extractor::Record;
use crate::forecast::DEFAULT_PERIODS;
use crate::schedule::ScheduleConstraints;

/// Batch of readings for the per-device detector
#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyRequest {
    pub device_id: String,
    pub values: Vec<f64>,
}

/// Multi-feature records for the ensemble detector
#[derive(Debug, Clone, Deserialize)]
pub struct AdvancedAnomalyRequest {
    pub device_id: String,
    pub data: Vec<Record>,
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default)]
    pub retrain: bool,
}

fn default_device_type() -> String {
    "generic".to_string()
}

/// Device history for the maintenance predictor
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceRequest {
    pub device_id: String,
    pub historical_data: Vec<Record>,
    #[serde(default = "default_device_type")]
    pub device_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastRequest {
    pub device_id: String,
    pub history: Vec<f64>,
    #[serde(default = "default_periods")]
    pub periods: usize,
}

fn default_periods() -> usize {
    DEFAULT_PERIODS
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub device_id: String,
    #[serde(default)]
    pub constraints: Option<ScheduleConstraints>,
    #[serde(default)]
    pub historical_usage: Option<Vec<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advanced_request_defaults() {
        let request: AdvancedAnomalyRequest =
            serde_json::from_str(r#"{"device_id": "fan-1", "data": [{"rpm": 1200}]}"#).unwrap();
        assert_eq!(request.device_type, "generic");
        assert!(!request.retrain);
        assert_eq!(request.data.len(), 1);
    }

    #[test]
    fn test_forecast_request_default_periods() {
        let request: ForecastRequest =
            serde_json::from_str(r#"{"device_id": "meter", "history": [1, 2, 3]}"#).unwrap();
        assert_eq!(request.periods, 5);
    }

    #[test]
    fn test_schedule_request_constraints() {
        let request: ScheduleRequest = serde_json::from_str(
            r#"{"device_id": "lab", "constraints": {"class_schedule": {"weekends": true}, "energy_budget": 40}}"#,
        )
        .unwrap();
        let constraints = request.constraints.unwrap();
        assert!(constraints.class_schedule.unwrap().weekends);
        assert_eq!(constraints.energy_budget, Some(40.0));
        assert!(request.historical_usage.is_none());
    }
}
