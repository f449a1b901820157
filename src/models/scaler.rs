//! Per-feature standardization

use serde::{Deserialize, Serialize};

use super::stats::{mean, std_dev};

/// Zero-mean, unit-variance scaler fitted column by column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    /// Fit on row-major data. Constant columns get a scale of 1.
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map_or(0, |row| row.len());
        let mut means = Vec::with_capacity(width);
        let mut scales = Vec::with_capacity(width);

        for feature in 0..width {
            let column: Vec<f64> = rows
                .iter()
                .map(|row| row.get(feature).copied().unwrap_or(0.0))
                .collect();
            let (center, std) = (mean(&column), std_dev(&column));
            means.push(if center.is_finite() { center } else { 0.0 });
            scales.push(if std.is_finite() && std > 0.0 { std } else { 1.0 });
        }

        Self { means, scales }
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(f, &v)| match (self.means.get(f), self.scales.get(f)) {
                        (Some(m), Some(s)) => (v - m) / s,
                        _ => v,
                    })
                    .collect()
            })
            .collect()
    }

}
