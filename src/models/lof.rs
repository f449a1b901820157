//! Local Outlier Factor model
//!
//! Compares the local reachability density of a row with the density of its
//! neighbours. Values near 1 are inliers; clearly larger values are outliers.

use serde::{Deserialize, Serialize};

use super::stats::{euclidean, percentile};
use super::OutlierModel;

/// Guards the reachability density against duplicated rows.
const DENSITY_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LofDetector {
    n_neighbors: usize,
    training: Vec<Vec<f64>>,
    k_distances: Vec<f64>,
    densities: Vec<f64>,
    threshold: f64,
}

impl LofDetector {
    pub fn fit(rows: &[Vec<f64>], n_neighbors: usize, contamination: f64) -> Self {
        if rows.len() < 2 {
            return Self {
                n_neighbors,
                training: Vec::new(),
                k_distances: Vec::new(),
                densities: Vec::new(),
                threshold: 0.0,
            };
        }

        let k = n_neighbors.clamp(1, rows.len() - 1);
        let neighbourhoods: Vec<Vec<(usize, f64)>> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| nearest(rows, row, k, Some(i)))
            .collect();

        let k_distances: Vec<f64> = neighbourhoods
            .iter()
            .map(|n| n.last().map_or(0.0, |(_, d)| *d))
            .collect();

        let densities: Vec<f64> = neighbourhoods
            .iter()
            .map(|n| reachability_density(n, &k_distances))
            .collect();

        let factors: Vec<f64> = neighbourhoods
            .iter()
            .zip(&densities)
            .map(|(n, &density)| outlier_factor(n, density, &densities))
            .collect();

        let threshold = percentile(&factors, (1.0 - contamination) * 100.0);

        Self {
            n_neighbors: k,
            training: rows.to_vec(),
            k_distances,
            densities,
            threshold,
        }
    }

    /// Local outlier factor of a new row against the training rows.
    pub fn outlier_score(&self, row: &[f64]) -> f64 {
        let neighbourhood = nearest(&self.training, row, self.n_neighbors, None);
        let density = reachability_density(&neighbourhood, &self.k_distances);
        outlier_factor(&neighbourhood, density, &self.densities)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl OutlierModel for LofDetector {
    fn name(&self) -> &'static str {
        "lof"
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

/// The `k` nearest training rows as `(index, distance)`, closest first.
fn nearest(training: &[Vec<f64>], row: &[f64], k: usize, skip: Option<usize>) -> Vec<(usize, f64)> {
    let mut distances: Vec<(usize, f64)> = training
        .iter()
        .enumerate()
        .filter(|(j, _)| Some(*j) != skip)
        .map(|(j, other)| (j, euclidean(row, other)))
        .collect();
    distances.sort_by(|a, b| a.1.total_cmp(&b.1));
    distances.truncate(k);
    distances
}

fn reachability_density(neighbourhood: &[(usize, f64)], k_distances: &[f64]) -> f64 {
    if neighbourhood.is_empty() {
        return 0.0;
    }
    let mean_reach = neighbourhood
        .iter()
        .map(|&(j, d)| k_distances[j].max(d))
        .sum::<f64>()
        / neighbourhood.len() as f64;
    1.0 / (mean_reach + DENSITY_EPSILON)
}

fn outlier_factor(neighbourhood: &[(usize, f64)], density: f64, densities: &[f64]) -> f64 {
    if neighbourhood.is_empty() || density <= 0.0 {
        return 1.0;
    }
    let neighbour_density = neighbourhood.iter().map(|&(j, _)| densities[j]).sum::<f64>()
        / neighbourhood.len() as f64;
    neighbour_density / density
}
