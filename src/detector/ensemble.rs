//! Multi-feature ensemble detector
//!
//! Three outlier models fitted on standard-scaled device records. Their
//! decision scores are averaged with configurable weights and their labels
//! combined by majority vote.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{DetectionConfig, EnsembleConfig};
use crate::error::DetectorError;
use crate::feature_extractor::FeatureMatrix;
use crate::models::{
    IsolationForest, KnnDetector, Label, LofDetector, OutlierModel, ScoreAggregator, StandardScaler,
};

/// Output of one ensemble run.
#[derive(Debug, Clone)]
pub struct EnsembleDetection {
    /// Rows a majority of members labelled outlier
    pub anomalies: Vec<usize>,
    /// Weighted mean decision score per row
    pub scores: Vec<f64>,
    /// Decision scores per member name
    pub member_scores: HashMap<String, Vec<f64>>,
    /// Share of rows flagged
    pub anomaly_rate: f64,
    /// Whether the model was fitted by this request
    pub refitted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleDetector {
    device_id: String,
    device_type: String,
    feature_names: Vec<String>,
    scaler: StandardScaler,
    forest: IsolationForest,
    knn: KnnDetector,
    lof: LofDetector,
    weights: HashMap<String, f64>,
    trained_at: DateTime<Utc>,
    training_rows: usize,
}

impl EnsembleDetector {
    /// Fit all members on `features`.
    pub fn fit(
        device_id: &str,
        device_type: &str,
        features: &FeatureMatrix,
        detection: &DetectionConfig,
        ensemble: &EnsembleConfig,
    ) -> Result<Self, DetectorError> {
        if features.len() < detection.min_observations {
            return Err(DetectorError::InsufficientData {
                required: detection.min_observations,
                got: features.len(),
            });
        }

        let scaler = StandardScaler::fit(&features.rows);
        let scaled = scaler.transform(&features.rows);
        let contamination = detection.contamination;

        let forest = IsolationForest::fit(detection.forest_params(), &scaled);
        let knn = KnnDetector::fit(&scaled, ensemble.knn_neighbors, contamination);
        let lof = LofDetector::fit(&scaled, ensemble.lof_neighbors, contamination);

        info!(
            device_id = %device_id,
            device_type = %device_type,
            rows = features.len(),
            features = features.width(),
            "Fitted ensemble detector"
        );

        Ok(Self {
            device_id: device_id.to_string(),
            device_type: device_type.to_string(),
            feature_names: features.names.clone(),
            scaler,
            forest,
            knn,
            lof,
            weights: ensemble.weights.clone(),
            trained_at: Utc::now(),
            training_rows: features.len(),
        })
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn training_rows(&self) -> usize {
        self.training_rows
    }

    /// Decision threshold of each member on its own raw score.
    pub fn thresholds(&self) -> HashMap<String, f64> {
        HashMap::from([
            (self.forest.name().to_string(), self.forest.offset()),
            (self.knn.name().to_string(), self.knn.threshold()),
            (self.lof.name().to_string(), self.lof.threshold()),
        ])
    }

    fn members(&self) -> [&dyn OutlierModel; 3] {
        [&self.forest, &self.knn, &self.lof]
    }

    /// Score `features` with every member and combine the results.
    pub fn detect(&self, features: &FeatureMatrix) -> Result<EnsembleDetection, DetectorError> {
        if features.names != self.feature_names {
            return Err(DetectorError::FeatureMismatch {
                expected: self.feature_names.clone(),
                got: features.names.clone(),
            });
        }

        let scaled = self.scaler.transform(&features.rows);
        let member_scores: HashMap<String, Vec<f64>> = self
            .members()
            .iter()
            .map(|member| (member.name().to_string(), member.decision_function(&scaled)))
            .collect();

        let aggregator = ScoreAggregator::new(self.weights.clone());
        let scores = aggregator.aggregate_rows(&member_scores, features.len());

        let anomalies: Vec<usize> = (0..features.len())
            .filter(|&row| {
                let labels: HashMap<String, Label> = member_scores
                    .iter()
                    .map(|(name, scores)| (name.clone(), label_of(scores[row])))
                    .collect();
                ScoreAggregator::majority_label(&labels) == Label::Outlier
            })
            .collect();

        let anomaly_rate = if features.is_empty() {
            0.0
        } else {
            anomalies.len() as f64 / features.len() as f64
        };

        Ok(EnsembleDetection {
            anomalies,
            scores,
            member_scores,
            anomaly_rate,
            refitted: false,
        })
    }
}

fn label_of(score: f64) -> Label {
    if score < 0.0 {
        Label::Outlier
    } else {
        Label::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: Vec<Vec<f64>>) -> FeatureMatrix {
        FeatureMatrix {
            names: vec!["power".to_string(), "temperature".to_string()],
            rows,
        }
    }

    fn training_rows() -> Vec<Vec<f64>> {
        (0..60)
            .map(|i| {
                let jitter = (i % 6) as f64;
                vec![100.0 + jitter * 2.0, 21.0 + jitter * 0.2]
            })
            .collect()
    }

    fn fitted() -> EnsembleDetector {
        EnsembleDetector::fit(
            "hvac-1",
            "hvac",
            &matrix(training_rows()),
            &DetectionConfig::default(),
            &EnsembleConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_flags_gross_outlier() {
        let detector = fitted();
        let detection = detector
            .detect(&matrix(vec![vec![104.0, 21.4], vec![900.0, 65.0]]))
            .unwrap();

        assert!(detection.anomalies.contains(&1));
        assert!(!detection.anomalies.contains(&0));
        assert_eq!(detection.scores.len(), 2);
        assert!(detection.scores[1] < detection.scores[0]);
        assert_eq!(detection.member_scores.len(), 3);
        assert!((detection.anomaly_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_too_few_rows() {
        let result = EnsembleDetector::fit(
            "d",
            "generic",
            &matrix(training_rows()[..5].to_vec()),
            &DetectionConfig::default(),
            &EnsembleConfig::default(),
        );
        assert!(matches!(
            result,
            Err(DetectorError::InsufficientData { required: 10, got: 5 })
        ));
    }

    #[test]
    fn test_feature_mismatch() {
        let detector = fitted();
        let other = FeatureMatrix {
            names: vec!["power".to_string()],
            rows: vec![vec![1.0]],
        };
        assert!(matches!(
            detector.detect(&other),
            Err(DetectorError::FeatureMismatch { .. })
        ));
    }

    #[test]
    fn test_metadata() {
        let detector = fitted();
        assert_eq!(detector.device_type(), "hvac");
        assert_eq!(detector.training_rows(), 60);
        assert_eq!(detector.feature_names(), ["power", "temperature"]);
        assert!(detector.trained_at() <= Utc::now());

        let thresholds = detector.thresholds();
        assert_eq!(thresholds.len(), 3);
        assert!(thresholds["isolation_forest"] < 0.0);
        assert!(thresholds["knn"] >= 0.0);
        assert!(thresholds["lof"] > 0.0);
    }
}
