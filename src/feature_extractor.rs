//! Feature extraction for the multi-feature ensemble.
//!
//! Device records arrive as loose JSON objects. This module selects the
//! numeric columns and lays them out as a dense matrix in a stable order, so a
//! model fitted on one batch can score the next one.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::FeatureError;

/// One device record as received over HTTP.
pub type Record = Map<String, Value>;

/// Keys that never become features.
pub const EXCLUDED_COLUMNS: [&str; 3] = ["timestamp", "device_id", "anomaly_label"];

/// Dense numeric view of a batch of records.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    /// Column names, sorted
    pub names: Vec<String>,
    /// One row per record, aligned with `names`
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.names.len()
    }
}

/// Feature extractor that turns records into model input features.
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Create a new feature extractor.
    pub fn new() -> Self {
        Self
    }

    /// Extract the numeric feature matrix of `records`.
    ///
    /// A column is kept when every present value is a number, a boolean or
    /// null. Booleans map to 1/0; null and missing values map to 0.
    pub fn extract(&self, records: &[Record]) -> Result<FeatureMatrix, FeatureError> {
        if records.is_empty() {
            return Err(FeatureError::NoRecords);
        }

        let names = Self::numeric_columns(records);
        if names.is_empty() {
            return Err(FeatureError::NoNumericFeatures);
        }

        let mut rows = Vec::with_capacity(records.len());
        for (row, record) in records.iter().enumerate() {
            let mut features = Vec::with_capacity(names.len());
            for name in &names {
                let value = match record.get(name) {
                    Some(value) => Self::to_feature(value),
                    None => Some(0.0),
                };
                match value {
                    Some(v) if v.is_finite() => features.push(v),
                    _ => {
                        return Err(FeatureError::NonFinite {
                            row,
                            column: name.clone(),
                        })
                    }
                }
            }
            rows.push(features);
        }

        Ok(FeatureMatrix { names, rows })
    }

    /// Sorted names of the columns usable as features.
    pub fn numeric_columns(records: &[Record]) -> Vec<String> {
        // column -> (all values numeric, at least one non-null value)
        let mut columns: BTreeMap<&str, (bool, bool)> = BTreeMap::new();

        for record in records {
            for (key, value) in record {
                if EXCLUDED_COLUMNS.contains(&key.as_str()) {
                    continue;
                }
                let entry = columns.entry(key.as_str()).or_insert((true, false));
                match value {
                    Value::Number(_) | Value::Bool(_) => entry.1 = true,
                    Value::Null => {}
                    _ => entry.0 = false,
                }
            }
        }

        columns
            .into_iter()
            .filter(|(_, (numeric, seen))| *numeric && *seen)
            .map(|(name, _)| name.to_string())
            .collect()
    }

    fn to_feature(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::Bool(true) => Some(1.0),
            Value::Bool(false) | Value::Null => Some(0.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(values: Vec<Value>) -> Vec<Record> {
        values
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect()
    }

    #[test]
    fn test_selects_sorted_numeric_columns() {
        let batch = records(vec![
            json!({"timestamp": "2024-01-01T00:00:00Z", "device_id": "d", "temperature": 21.5, "power": 120, "on": true, "room": "A"}),
            json!({"timestamp": "2024-01-01T00:01:00Z", "device_id": "d", "temperature": 21.7, "power": 118, "on": false, "room": "A"}),
        ]);

        let matrix = FeatureExtractor::new().extract(&batch).unwrap();
        assert_eq!(matrix.names, vec!["on", "power", "temperature"]);
        assert_eq!(matrix.rows[0], vec![1.0, 120.0, 21.5]);
        assert_eq!(matrix.rows[1], vec![0.0, 118.0, 21.7]);
    }

    #[test]
    fn test_missing_values_become_zero() {
        let batch = records(vec![
            json!({"power": 100.0, "humidity": 40.0}),
            json!({"power": 90.0}),
            json!({"power": 95.0, "humidity": null}),
        ]);

        let matrix = FeatureExtractor::new().extract(&batch).unwrap();
        assert_eq!(matrix.names, vec!["humidity", "power"]);
        assert_eq!(matrix.rows[1], vec![0.0, 90.0]);
        assert_eq!(matrix.rows[2], vec![0.0, 95.0]);
    }

    #[test]
    fn test_mixed_column_is_dropped() {
        let batch = records(vec![json!({"a": 1, "b": 2}), json!({"a": "high", "b": 3})]);
        let matrix = FeatureExtractor::new().extract(&batch).unwrap();
        assert_eq!(matrix.names, vec!["b"]);
    }

    #[test]
    fn test_excluded_label_column() {
        let batch = records(vec![json!({"anomaly_label": 1, "load": 0.5})]);
        let matrix = FeatureExtractor::new().extract(&batch).unwrap();
        assert_eq!(matrix.names, vec!["load"]);
    }

    #[test]
    fn test_errors() {
        let extractor = FeatureExtractor::new();
        assert!(matches!(extractor.extract(&[]), Err(FeatureError::NoRecords)));

        let batch = records(vec![json!({"device_id": "d", "status": "ok"})]);
        assert!(matches!(
            extractor.extract(&batch),
            Err(FeatureError::NoNumericFeatures)
        ));
    }
}
