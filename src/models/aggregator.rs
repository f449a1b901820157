//! Score aggregation for the multi-model ensemble

use std::collections::HashMap;

use super::Label;

/// Aggregates per-member decision scores into a single ensemble score.
#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    /// Member weights for the weighted average
    weights: HashMap<String, f64>,
    /// Weight for members missing from the weights map
    default_weight: f64,
}

impl ScoreAggregator {
    /// Create a new score aggregator with member weights.
    pub fn new(weights: HashMap<String, f64>) -> Self {
        Self {
            weights,
            default_weight: 1.0,
        }
    }

    /// Create aggregator with equal weights for all members.
    pub fn equal_weights() -> Self {
        Self {
            weights: HashMap::new(),
            default_weight: 1.0,
        }
    }

    /// Weighted average of member scores for one row.
    ///
    /// Decision scores are centred on zero, so zero is the neutral result.
    pub fn aggregate(&self, member_scores: &HashMap<String, f64>) -> f64 {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        for (member, &score) in member_scores {
            let weight = self.weight_of(member);
            weighted_sum += score * weight;
            total_weight += weight;
        }

        if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            0.0
        }
    }

    /// Aggregate column-wise: `member -> scores per row` into one score per row.
    pub fn aggregate_rows(&self, member_scores: &HashMap<String, Vec<f64>>, rows: usize) -> Vec<f64> {
        (0..rows)
            .map(|i| {
                let row: HashMap<String, f64> = member_scores
                    .iter()
                    .filter_map(|(member, scores)| scores.get(i).map(|s| (member.clone(), *s)))
                    .collect();
                self.aggregate(&row)
            })
            .collect()
    }

    /// Fraction of members voting outlier.
    pub fn voting_score(member_labels: &HashMap<String, Label>) -> f64 {
        if member_labels.is_empty() {
            return 0.0;
        }

        let votes_for_outlier = member_labels
            .values()
            .filter(|&&label| label == Label::Outlier)
            .count();

        votes_for_outlier as f64 / member_labels.len() as f64
    }

    /// Majority vote; ties go to outlier.
    pub fn majority_label(member_labels: &HashMap<String, Label>) -> Label {
        if !member_labels.is_empty() && Self::voting_score(member_labels) >= 0.5 {
            Label::Outlier
        } else {
            Label::Normal
        }
    }

    fn weight_of(&self, member: &str) -> f64 {
        self.weights
            .get(member)
            .copied()
            .unwrap_or(self.default_weight)
    }
}

impl Default for ScoreAggregator {
    fn default() -> Self {
        Self::equal_weights()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_aggregation() {
        let mut weights = HashMap::new();
        weights.insert("isolation_forest".to_string(), 2.0);
        weights.insert("knn".to_string(), 1.0);
        weights.insert("lof".to_string(), 1.0);
        let aggregator = ScoreAggregator::new(weights);

        let mut scores = HashMap::new();
        scores.insert("isolation_forest".to_string(), 0.4);
        scores.insert("knn".to_string(), -0.2);
        scores.insert("lof".to_string(), 0.2);

        // (0.8 - 0.2 + 0.2) / 4 = 0.2
        assert!((aggregator.aggregate(&scores) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_equal_weights() {
        let aggregator = ScoreAggregator::equal_weights();

        let mut scores = HashMap::new();
        scores.insert("model1".to_string(), 0.8);
        scores.insert("model2".to_string(), -0.6);

        assert!((aggregator.aggregate(&scores) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_rows() {
        let aggregator = ScoreAggregator::equal_weights();
        let mut members = HashMap::new();
        members.insert("a".to_string(), vec![1.0, -1.0]);
        members.insert("b".to_string(), vec![0.0, -3.0]);

        assert_eq!(aggregator.aggregate_rows(&members, 2), vec![0.5, -2.0]);
    }

    #[test]
    fn test_majority_vote() {
        let mut labels = HashMap::new();
        labels.insert("isolation_forest".to_string(), Label::Outlier);
        labels.insert("knn".to_string(), Label::Outlier);
        labels.insert("lof".to_string(), Label::Normal);
        assert_eq!(ScoreAggregator::majority_label(&labels), Label::Outlier);

        labels.insert("knn".to_string(), Label::Normal);
        assert_eq!(ScoreAggregator::majority_label(&labels), Label::Normal);
        assert!((ScoreAggregator::voting_score(&labels) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_scores() {
        let aggregator = ScoreAggregator::default();
        let scores = HashMap::new();

        assert_eq!(aggregator.aggregate(&scores), 0.0);
        assert_eq!(
            ScoreAggregator::majority_label(&HashMap::new()),
            Label::Normal
        );
    }
}
