//! Isolation Forest outlier model
//!
//! Anomalies are easier to isolate and thus end up on shorter paths in
//! randomly grown trees. Scores follow the usual convention: the decision
//! function is positive for inliers and negative for outliers, with the
//! boundary placed at the `contamination` quantile of the training scores.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::stats::percentile;
use super::OutlierModel;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Hyper-parameters of an isolation forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of trees
    pub n_estimators: usize,
    /// Rows drawn (without replacement) to grow each tree
    pub max_samples: usize,
    /// Expected share of outliers in the training data
    pub contamination: f64,
    /// Seed for reproducible fitting
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

/// Isolation Forest model.
///
/// A fitted forest is immutable: retraining produces a new instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    params: ForestParams,
    trees: Vec<IsolationTree>,
    /// Rows used per tree (ψ)
    sample_size: usize,
    /// Decision boundary on `score_samples`
    offset: f64,
}

impl IsolationForest {
    /// Create a forest that has not seen any data.
    pub fn unfitted(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            sample_size: 0,
            offset: 0.0,
        }
    }

    /// Grow a new forest on `rows`.
    pub fn fit(params: ForestParams, rows: &[Vec<f64>]) -> Self {
        if rows.is_empty() {
            return Self::unfitted(params);
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let n = rows.len();
        let sample_size = params.max_samples.clamp(1, n);
        let max_depth = if sample_size > 1 {
            (sample_size as f64).log2().ceil() as usize
        } else {
            0
        };

        let trees = (0..params.n_estimators.max(1))
            .map(|_| {
                let sample: Vec<&[f64]> = index::sample(&mut rng, n, sample_size)
                    .iter()
                    .map(|i| rows[i].as_slice())
                    .collect();
                IsolationTree::grow(&sample, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            params,
            trees,
            sample_size,
            offset: 0.0,
        };

        let training_scores = forest.score_samples(rows);
        forest.offset = percentile(&training_scores, forest.params.contamination * 100.0);
        forest
    }

    /// Raw scores `-2^(-E[h(x)] / c(ψ))`; lower means more abnormal.
    pub fn score_samples(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        if self.trees.is_empty() {
            return vec![-0.5; rows.len()];
        }

        let mut normalizer = average_path_length(self.sample_size);
        if normalizer <= 0.0 {
            normalizer = 1.0;
        }

        rows.iter()
            .map(|row| {
                let total: f64 = self.trees.iter().map(|tree| tree.path_length(row)).sum();
                let mean_depth = total / self.trees.len() as f64;
                -(2.0_f64.powf(-mean_depth / normalizer))
            })
            .collect()
    }

    /// Decision threshold applied to `score_samples`.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

impl OutlierModel for IsolationForest {
    fn name(&self) -> &'static str {
        "isolation_forest"
    }

    fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    fn decision_function(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        if !self.is_fitted() {
            return vec![0.0; rows.len()];
        }
        self.score_samples(rows)
            .into_iter()
            .map(|score| score - self.offset)
            .collect()
    }
}

/// Average path length of an unsuccessful BST search, `c(n)`.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[inline]
fn value_at(row: &[f64], feature: usize) -> f64 {
    row.get(feature).copied().unwrap_or(0.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IsolationTree {
    root: Node,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
        /// Per-feature bounds of the rows that ended here
        lower: Vec<f64>,
        upper: Vec<f64>,
    },
}

/// Point in `[lower, upper)` at fraction `u` of the way up, for any finite
/// bounds. Both sides of a `<=` partition stay non-empty.
fn split_point(lower: f64, upper: f64, u: f64) -> f64 {
    // Interpolating avoids `upper - lower`, which overflows for opposite extremes.
    let point = (lower * (1.0 - u) + upper * u).max(lower);
    if point < upper {
        point
    } else {
        lower
    }
}

impl IsolationTree {
    fn grow<R: Rng>(rows: &[&[f64]], max_depth: usize, rng: &mut R) -> Self {
        Self {
            root: Self::grow_node(rows, 0, max_depth, rng),
        }
    }

    fn grow_node<R: Rng>(rows: &[&[f64]], depth: usize, max_depth: usize, rng: &mut R) -> Node {
        let width = rows.first().map_or(0, |row| row.len());
        let mut lower = vec![f64::INFINITY; width];
        let mut upper = vec![f64::NEG_INFINITY; width];
        for row in rows {
            for feature in 0..width {
                let v = value_at(row, feature);
                lower[feature] = lower[feature].min(v);
                upper[feature] = upper[feature].max(v);
            }
        }

        let splittable: Vec<usize> = (0..width).filter(|&f| upper[f] > lower[f]).collect();

        if rows.len() <= 1 || depth >= max_depth || splittable.is_empty() {
            return Node::Leaf {
                size: rows.len(),
                lower,
                upper,
            };
        }

        let feature = splittable[rng.gen_range(0..splittable.len())];
        let threshold = split_point(lower[feature], upper[feature], rng.gen::<f64>());

        let (left, right): (Vec<&[f64]>, Vec<&[f64]>) = rows
            .iter()
            .copied()
            .partition(|row| value_at(row, feature) <= threshold);

        Node::Split {
            feature,
            threshold,
            left: Box::new(Self::grow_node(&left, depth + 1, max_depth, rng)),
            right: Box::new(Self::grow_node(&right, depth + 1, max_depth, rng)),
        }
    }

    fn path_length(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;

        loop {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if value_at(row, *feature) <= *threshold {
                        &**left
                    } else {
                        &**right
                    };
                    depth += 1;
                }
                Node::Leaf { size, lower, upper } => {
                    let expected = average_path_length(*size);
                    let inside = lower
                        .iter()
                        .zip(upper)
                        .enumerate()
                        .all(|(f, (lo, hi))| {
                            let v = value_at(row, f);
                            v >= *lo && v <= *hi
                        });
                    // Outside the leaf's range one more cut isolates the point.
                    let adjustment = if inside { expected } else { expected.min(1.0) };
                    return depth as f64 + adjustment;
                }
            }
        }
    }
}
