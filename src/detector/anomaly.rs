//! Per-device incremental anomaly detector
//!
//! Each device owns one isolation forest trained on a rolling baseline of its
//! own readings. Readings labelled normal feed back into the baseline, and the
//! forest is refitted once enough new normal readings have accumulated.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::DetectionConfig;
use crate::models::{IsolationForest, ModelKind, ModelStore, OutlierModel};

/// Persisted state of one device detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorState {
    device_id: String,
    model: IsolationForest,
    trained: bool,
    baseline: VecDeque<f64>,
    appended_since_training: usize,
}

impl DetectorState {
    fn untrained(device_id: &str, config: &DetectionConfig) -> Self {
        Self {
            device_id: device_id.to_string(),
            model: IsolationForest::unfitted(config.forest_params()),
            trained: false,
            baseline: VecDeque::new(),
            appended_since_training: 0,
        }
    }
}

/// Result of scoring one batch of observations.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Indices of observations labelled outlier
    pub anomalies: Vec<usize>,
    /// Decision score per observation (negative = outlier)
    pub scores: Vec<f64>,
    /// Whether the call (re)trained the model
    pub retrained: bool,
}

pub struct AnomalyDetector {
    state: DetectorState,
    config: DetectionConfig,
    store: Option<Arc<ModelStore>>,
    retired: bool,
}

impl AnomalyDetector {
    /// Fresh untrained detector. Without a store nothing is persisted.
    pub fn new(device_id: &str, config: DetectionConfig, store: Option<Arc<ModelStore>>) -> Self {
        Self {
            state: DetectorState::untrained(device_id, &config),
            config,
            store,
            retired: false,
        }
    }

    /// Rebuild a detector from persisted state.
    pub fn from_state(
        state: DetectorState,
        config: DetectionConfig,
        store: Option<Arc<ModelStore>>,
    ) -> Self {
        Self {
            state,
            config,
            store,
            retired: false,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.state.trained
    }

    pub fn baseline_len(&self) -> usize {
        self.state.baseline.len()
    }

    pub fn baseline(&self) -> impl Iterator<Item = f64> + '_ {
        self.state.baseline.iter().copied()
    }

    pub fn appended_since_training(&self) -> usize {
        self.state.appended_since_training
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Stop persisting this instance; used once its device has been cleared.
    pub fn retire(&mut self) {
        self.retired = true;
    }

    /// Fit a new forest on `observations` and make them the baseline.
    ///
    /// Returns `false` without touching the state when there are fewer than
    /// `min_observations` points.
    pub fn train(&mut self, observations: &[f64]) -> bool {
        if observations.len() < self.config.min_observations {
            debug!(
                device_id = %self.state.device_id,
                observations = observations.len(),
                required = self.config.min_observations,
                "Not enough observations to train, deferring"
            );
            return false;
        }

        let model = IsolationForest::fit(self.config.forest_params(), &as_rows(observations));
        let keep_from = observations.len().saturating_sub(self.config.baseline_capacity);

        self.state.model = model;
        self.state.baseline = observations[keep_from..].iter().copied().collect();
        self.state.appended_since_training = 0;
        self.state.trained = true;

        info!(
            device_id = %self.state.device_id,
            observations = observations.len(),
            baseline = self.state.baseline.len(),
            trees = self.state.model.tree_count(),
            "Trained anomaly detector"
        );

        self.persist();
        true
    }

    /// Score `observations`, growing the baseline with the normal ones.
    pub fn predict(&mut self, observations: &[f64]) -> Detection {
        let rows = as_rows(observations);

        if !self.state.trained {
            let retrained = self.train(observations);
            return Detection {
                anomalies: Vec::new(),
                scores: self.state.model.decision_function(&rows),
                retrained,
            };
        }

        let scores = self.state.model.decision_function(&rows);
        let mut anomalies = Vec::new();

        for (index, (&value, &score)) in observations.iter().zip(&scores).enumerate() {
            if score < 0.0 {
                anomalies.push(index);
            } else {
                self.state.baseline.push_back(value);
                self.state.appended_since_training += 1;
            }
        }

        while self.state.baseline.len() > self.config.baseline_capacity {
            self.state.baseline.pop_front();
        }

        let retrained = if self.state.appended_since_training >= self.config.retrain_interval.max(1) {
            debug!(
                device_id = %self.state.device_id,
                appended = self.state.appended_since_training,
                "Retrain interval reached"
            );
            let buffer: Vec<f64> = self.state.baseline.iter().copied().collect();
            self.train(&buffer)
        } else {
            false
        };

        Detection {
            anomalies,
            scores,
            retrained,
        }
    }

    fn persist(&self) {
        if self.retired {
            debug!(device_id = %self.state.device_id, "Detector retired, skipping save");
            return;
        }
        let Some(store) = &self.store else {
            return;
        };

        if let Err(e) = store.save(&self.state.device_id, ModelKind::Anomaly, &self.state) {
            error!(
                device_id = %self.state.device_id,
                error = %e,
                "Failed to persist anomaly detector"
            );
        }
    }
}

fn as_rows(observations: &[f64]) -> Vec<Vec<f64>> {
    observations.iter().map(|&value| vec![value]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DetectionConfig {
        DetectionConfig::default()
    }

    fn normal_series(n: usize) -> Vec<f64> {
        (0..n).map(|i| 20.0 + (i % 7) as f64 * 0.5).collect()
    }

    #[test]
    fn test_untrained_with_few_points_defers() {
        let mut detector = AnomalyDetector::new("dev", config(), None);
        let detection = detector.predict(&[1.0, 2.0, 3.0]);

        assert!(detection.anomalies.is_empty());
        assert_eq!(detection.scores, vec![0.0; 3]);
        assert!(!detection.retrained);
        assert!(!detector.is_trained());
        assert_eq!(detector.baseline_len(), 0);
    }

    #[test]
    fn test_first_predict_trains() {
        let mut detector = AnomalyDetector::new("dev", config(), None);
        let values = normal_series(20);
        let detection = detector.predict(&values);

        assert!(detection.anomalies.is_empty());
        assert_eq!(detection.scores.len(), 20);
        assert!(detection.retrained);
        assert!(detector.is_trained());
        assert_eq!(detector.baseline_len(), 20);
    }

    #[test]
    fn test_constant_baseline_flags_spike() {
        let mut detector = AnomalyDetector::new("dev", config(), None);
        assert!(detector.train(&[5.0; 10]));

        let detection = detector.predict(&[5.0, 5.0, 5.0, 5.0, 5.0, 100.0]);
        assert_eq!(detection.anomalies, vec![5]);
        assert_eq!(detector.baseline_len(), 15);
    }

    #[test]
    fn test_train_rejects_short_input() {
        let mut detector = AnomalyDetector::new("dev", config(), None);
        assert!(!detector.train(&[1.0; 9]));
        assert!(!detector.is_trained());
    }

    #[test]
    fn test_train_keeps_most_recent_capacity() {
        let mut detector = AnomalyDetector::new("dev", config(), None);
        let values: Vec<f64> = (0..1500).map(|i| i as f64).collect();
        assert!(detector.train(&values));

        assert_eq!(detector.baseline_len(), 1000);
        assert_eq!(detector.baseline().next(), Some(500.0));
    }

    #[test]
    fn test_baseline_bounded_and_retrain_counter() {
        let cfg = DetectionConfig {
            retrain_interval: 50,
            ..config()
        };
        let mut detector = AnomalyDetector::new("dev", cfg, None);
        detector.predict(&normal_series(30));

        let mut retrains = 0;
        for _ in 0..40 {
            let detection = detector.predict(&normal_series(40));
            if detection.retrained {
                retrains += 1;
            }
            assert!(detector.baseline_len() <= 1000);
            assert!(detector.appended_since_training() < 50);
        }
        assert!(retrains > 0);
    }
}
