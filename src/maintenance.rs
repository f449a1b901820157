//! Predictive maintenance
//!
//! A device's history is turned into failure features: every numeric column
//! together with its rolling mean, rolling standard deviation and rate of
//! change. An isolation forest fitted on that history tells how abnormal the
//! most recent window looks against the device's own past, which is read as
//! the probability of an upcoming failure.

use serde::Serialize;
use tracing::debug;

use crate::config::DetectionConfig;
use crate::error::MaintenanceError;
use crate::feature_extractor::{FeatureExtractor, FeatureMatrix, Record};
use crate::models::stats::{mean, std_dev};
use crate::models::{ForestParams, IsolationForest, StandardScaler};

/// Rows covered by the rolling statistics
pub const ROLLING_WINDOW: usize = 24;

/// Upper bound on the rows treated as "recent"
pub const RECENT_WINDOW: usize = 24;

/// Probability above which maintenance is medium priority
const MEDIUM_RISK: f64 = 0.3;
/// Probability above which maintenance is high priority
const HIGH_RISK: f64 = 0.7;

/// Standard deviations of drift before a column is called out
const DRIFT_LIMIT: f64 = 2.0;
/// Growth of the standard deviation before a column is called unstable
const VOLATILITY_LIMIT: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenancePriority {
    Low,
    Medium,
    High,
}

impl MaintenancePriority {
    /// Bins `(0, 0.3]`, `(0.3, 0.7]` and `(0.7, 1]`.
    pub fn from_probability(probability: f64) -> Self {
        if probability > HIGH_RISK {
            MaintenancePriority::High
        } else if probability > MEDIUM_RISK {
            MaintenancePriority::Medium
        } else {
            MaintenancePriority::Low
        }
    }

    pub fn days_to_maintenance(self) -> u32 {
        match self {
            MaintenancePriority::High => 7,
            MaintenancePriority::Medium => 30,
            MaintenancePriority::Low => 90,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MaintenancePriority::Low => "low",
            MaintenancePriority::Medium => "medium",
            MaintenancePriority::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaintenancePrediction {
    pub failure_probability: f64,
    pub priority: MaintenancePriority,
    pub days_to_maintenance: u32,
    pub recommendations: Vec<String>,
}

pub struct MaintenanceEngine {
    extractor: FeatureExtractor,
    params: ForestParams,
    min_observations: usize,
}

impl MaintenanceEngine {
    pub fn new(detection: &DetectionConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(),
            params: detection.forest_params(),
            min_observations: detection.min_observations,
        }
    }

    /// Estimate the maintenance needs of a device from its history.
    pub fn predict(&self, device_type: &str, records: &[Record]) -> Result<MaintenancePrediction, MaintenanceError> {
        let history = self.extractor.extract(records)?;
        if history.len() < self.min_observations {
            return Err(MaintenanceError::InsufficientHistory {
                required: self.min_observations,
                got: history.len(),
            });
        }

        let features = failure_features(&history);
        let scaler = StandardScaler::fit(&features.rows);
        let scaled = scaler.transform(&features.rows);
        let forest = IsolationForest::fit(self.params.clone(), &scaled);

        // score_samples is the negated anomaly score in (0, 1]
        let abnormality: Vec<f64> = forest.score_samples(&scaled).iter().map(|s| -s).collect();
        let recent = recent_len(history.len());
        let recent_abnormality = mean(&abnormality[abnormality.len() - recent..]);

        let failure_probability = (2.0 * (recent_abnormality - 0.5)).clamp(0.0, 1.0);
        let priority = MaintenancePriority::from_probability(failure_probability);

        let mut recommendations = vec![priority_advice(priority).to_string()];
        recommendations.extend(column_advice(&history, recent));

        debug!(
            device_type = %device_type,
            rows = history.len(),
            recent,
            failure_probability,
            priority = priority.as_str(),
            "Maintenance prediction computed"
        );

        Ok(MaintenancePrediction {
            failure_probability,
            priority,
            days_to_maintenance: priority.days_to_maintenance(),
            recommendations,
        })
    }
}

/// Each column followed by its rolling mean, rolling std and rate of change.
pub fn failure_features(history: &FeatureMatrix) -> FeatureMatrix {
    let names = history
        .names
        .iter()
        .flat_map(|name| {
            [
                name.clone(),
                format!("{}_rolling_mean", name),
                format!("{}_rolling_std", name),
                format!("{}_rate_of_change", name),
            ]
        })
        .collect();

    let rows = (0..history.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(ROLLING_WINDOW);
            (0..history.width())
                .flat_map(|column| {
                    let window: Vec<f64> = history.rows[start..=i].iter().map(|row| row[column]).collect();
                    let value = history.rows[i][column];
                    let change = if i == 0 {
                        0.0
                    } else {
                        value - history.rows[i - 1][column]
                    };
                    [value, mean(&window), std_dev(&window), change]
                })
                .collect()
        })
        .collect();

    FeatureMatrix { names, rows }
}

/// A quarter of the history, capped at `RECENT_WINDOW`.
fn recent_len(rows: usize) -> usize {
    (rows / 4).clamp(1, RECENT_WINDOW)
}

fn priority_advice(priority: MaintenancePriority) -> &'static str {
    match priority {
        MaintenancePriority::High => "Schedule maintenance within 7 days",
        MaintenancePriority::Medium => "Plan an inspection within the next 30 days",
        MaintenancePriority::Low => "No action needed, keep routine monitoring",
    }
}

/// Columns whose recent readings drifted or became unstable.
fn column_advice(history: &FeatureMatrix, recent: usize) -> Vec<String> {
    let split = history.len() - recent;
    let mut advice = Vec::new();

    for (column, name) in history.names.iter().enumerate() {
        let past: Vec<f64> = history.rows[..split].iter().map(|row| row[column]).collect();
        let latest: Vec<f64> = history.rows[split..].iter().map(|row| row[column]).collect();
        let (past_std, latest_std) = (std_dev(&past), std_dev(&latest));
        let shift = (mean(&latest) - mean(&past)).abs();

        if exceeds(shift, past_std, DRIFT_LIMIT) {
            advice.push(format!("Inspect {}: recent readings drifted from the usual range", name));
        }
        if exceeds(latest_std, past_std, VOLATILITY_LIMIT) {
            advice.push(format!("Check {}: readings have become unstable", name));
        }
    }
    advice
}

/// `value > limit * scale`, where any positive value exceeds a zero scale.
fn exceeds(value: f64, scale: f64, limit: f64) -> bool {
    if scale > 0.0 {
        value > limit * scale
    } else {
        value > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> MaintenanceEngine {
        MaintenanceEngine::new(&DetectionConfig::default())
    }

    fn records(values: impl Iterator<Item = (f64, f64)>) -> Vec<Record> {
        values
            .filter_map(|(power, temperature)| {
                json!({"device_id": "pump-1", "power": power, "temperature": temperature})
                    .as_object()
                    .cloned()
            })
            .collect()
    }

    fn stable(n: usize) -> Vec<Record> {
        records((0..n).map(|i| (100.0 + (i % 6) as f64, 40.0 + (i % 3) as f64 * 0.5)))
    }

    #[test]
    fn test_priority_bins() {
        assert_eq!(MaintenancePriority::from_probability(0.0), MaintenancePriority::Low);
        assert_eq!(MaintenancePriority::from_probability(0.3), MaintenancePriority::Low);
        assert_eq!(MaintenancePriority::from_probability(0.31), MaintenancePriority::Medium);
        assert_eq!(MaintenancePriority::from_probability(0.7), MaintenancePriority::Medium);
        assert_eq!(MaintenancePriority::from_probability(0.71), MaintenancePriority::High);

        assert_eq!(MaintenancePriority::High.days_to_maintenance(), 7);
        assert_eq!(MaintenancePriority::Medium.days_to_maintenance(), 30);
        assert_eq!(MaintenancePriority::Low.days_to_maintenance(), 90);
    }

    #[test]
    fn test_failure_features() {
        let history = FeatureMatrix {
            names: vec!["power".to_string()],
            rows: vec![vec![1.0], vec![3.0], vec![8.0]],
        };
        let features = failure_features(&history);

        assert_eq!(
            features.names,
            vec!["power", "power_rolling_mean", "power_rolling_std", "power_rate_of_change"]
        );
        assert_eq!(features.rows[0], vec![1.0, 1.0, 0.0, 0.0]);
        assert_eq!(features.rows[1], vec![3.0, 2.0, 1.0, 2.0]);
        assert_eq!(features.rows[2][0], 8.0);
        assert_eq!(features.rows[2][1], 4.0);
        assert_eq!(features.rows[2][3], 5.0);
    }

    #[test]
    fn test_rolling_window_is_bounded() {
        let history = FeatureMatrix {
            names: vec!["x".to_string()],
            rows: (0..30).map(|i| vec![if i < 6 { 1000.0 } else { 1.0 }]).collect(),
        };
        let features = failure_features(&history);

        // rows 6..=29 fill the last window, so the early spike is gone
        assert_eq!(features.rows[29][1], 1.0);
        assert_eq!(features.rows[29][2], 0.0);
    }

    #[test]
    fn test_rejects_short_history() {
        let result = engine().predict("pump", &stable(5));
        assert!(matches!(
            result,
            Err(MaintenanceError::InsufficientHistory { required: 10, got: 5 })
        ));
    }

    #[test]
    fn test_stable_history_is_low_priority() {
        let prediction = engine().predict("pump", &stable(200)).unwrap();

        assert_eq!(prediction.priority, MaintenancePriority::Low);
        assert_eq!(prediction.days_to_maintenance, 90);
        assert_eq!(
            prediction.recommendations,
            vec!["No action needed, keep routine monitoring".to_string()]
        );
    }

    #[test]
    fn test_degrading_device_scores_higher() {
        let mut history = stable(176);
        history.extend(records((0..24).map(|k| (150.0 + 40.0 * k as f64, 40.0 + 3.0 * k as f64))));

        let stable_prediction = engine().predict("pump", &stable(200)).unwrap();
        let degraded = engine().predict("pump", &history).unwrap();

        assert!(degraded.failure_probability > stable_prediction.failure_probability);
        assert!(degraded
            .recommendations
            .iter()
            .any(|r| r.starts_with("Inspect power")));
        assert!(degraded
            .recommendations
            .iter()
            .any(|r| r.starts_with("Check temperature")));
    }
}
