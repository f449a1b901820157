//! Outlier models, score aggregation and model persistence

pub mod aggregator;
pub mod isolation_forest;
pub mod knn;
pub mod lof;
pub mod scaler;
pub mod stats;
pub mod store;

pub use aggregator::ScoreAggregator;
pub use isolation_forest::{ForestParams, IsolationForest};
pub use knn::KnnDetector;
pub use lof::LofDetector;
pub use scaler::StandardScaler;
pub use store::{ModelKind, ModelStore};

use serde::{Deserialize, Serialize};

/// Binary label assigned to a scored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Normal,
    Outlier,
}

/// Common surface of the fitted outlier models.
///
/// Decision scores share one convention across models: higher means more
/// normal, and a negative score marks an outlier.
pub trait OutlierModel {
    /// Stable model name, used as the key in per-member score maps
    fn name(&self) -> &'static str;

    /// Whether the model has been fitted on data
    fn is_fitted(&self) -> bool;

    /// Decision score per row
    fn decision_function(&self, rows: &[Vec<f64>]) -> Vec<f64>;

    /// Label per row derived from the decision score
    fn predict(&self, rows: &[Vec<f64>]) -> Vec<Label> {
        self.decision_function(rows)
            .into_iter()
            .map(|score| {
                if score < 0.0 {
                    Label::Outlier
                } else {
                    Label::Normal
                }
            })
            .collect()
    }
}
