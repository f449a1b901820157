//! k-nearest-neighbour distance outlier model

use serde::{Deserialize, Serialize};

use super::stats::{euclidean, percentile};
use super::OutlierModel;

/// Scores a row by the distance to its k-th nearest training row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnDetector {
    n_neighbors: usize,
    training: Vec<Vec<f64>>,
    /// Outlier-score cut-off at the `1 - contamination` quantile
    threshold: f64,
}

impl KnnDetector {
    /// Fit on (already scaled) rows. Needs at least two rows to be useful.
    pub fn fit(rows: &[Vec<f64>], n_neighbors: usize, contamination: f64) -> Self {
        if rows.len() < 2 {
            return Self {
                n_neighbors,
                training: Vec::new(),
                threshold: 0.0,
            };
        }

        let k = n_neighbors.clamp(1, rows.len() - 1);
        let training_scores: Vec<f64> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let distances = rows
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, other)| euclidean(row, other))
                    .collect();
                kth_smallest(distances, k)
            })
            .collect();

        let threshold = percentile(&training_scores, (1.0 - contamination) * 100.0);

        Self {
            n_neighbors: k,
            training: rows.to_vec(),
            threshold,
        }
    }

    /// Raw outlier score (k-th neighbour distance); higher is more abnormal.
    pub fn outlier_score(&self, row: &[f64]) -> f64 {
        let distances = self
            .training
            .iter()
            .map(|other| euclidean(row, other))
            .collect();
        kth_smallest(distances, self.n_neighbors)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl OutlierModel for KnnDetector {
    fn name(&self) -> &'static str {
        "knn"
    }

    fn is_fitted(&self) -> bool {
        !self.training.is_empty()
    }

    fn decision_function(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        if !self.is_fitted() {
            return vec![0.0; rows.len()];
        }
        rows.iter()
            .map(|row| self.threshold - self.outlier_score(row))
            .collect()
    }
}

/// k-th smallest value (1-based `k`), or the largest when fewer are given.
pub(crate) fn kth_smallest(mut values: Vec<f64>, k: usize) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let idx = k.saturating_sub(1).min(values.len() - 1);
    let (_, kth, _) = values.select_nth_unstable_by(idx, |a, b| a.total_cmp(b));
    *kth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Label;

    fn grid() -> Vec<Vec<f64>> {
        (0..5)
            .flat_map(|x| (0..5).map(move |y| vec![x as f64, y as f64]))
            .collect()
    }

    #[test]
    fn test_kth_smallest() {
        assert_eq!(kth_smallest(vec![4.0, 1.0, 3.0, 2.0], 1), 1.0);
        assert_eq!(kth_smallest(vec![4.0, 1.0, 3.0, 2.0], 3), 3.0);
        assert_eq!(kth_smallest(vec![4.0, 1.0], 5), 4.0);
        assert_eq!(kth_smallest(Vec::new(), 2), 0.0);
    }

    #[test]
    fn test_far_point_is_outlier() {
        let knn = KnnDetector::fit(&grid(), 5, 0.1);
        let labels = knn.predict(&[vec![2.0, 2.0], vec![40.0, 40.0]]);
        assert_eq!(labels, vec![Label::Normal, Label::Outlier]);
    }

    #[test]
    fn test_too_few_rows_unfitted() {
        let knn = KnnDetector::fit(&[vec![1.0]], 5, 0.1);
        assert!(!knn.is_fitted());
        assert_eq!(knn.decision_function(&[vec![3.0]]), vec![0.0]);
    }
}
