//! Error types of the library layer

use std::path::PathBuf;

use thiserror::Error;

/// Model persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid device id {id:?}: {reason}")]
    InvalidDeviceId { id: String, reason: &'static str },

    #[error("Model store I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Model serialization failed: {0}")]
    Codec(#[from] bincode::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Turning JSON records into a numeric feature matrix.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("No records supplied")]
    NoRecords,

    #[error("Records contain no numeric feature columns")]
    NoNumericFeatures,

    #[error("Value of {column:?} in record {row} is not a finite number")]
    NonFinite { row: usize, column: String },
}

/// Errors surfaced by detectors and the detector registry.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Need at least {required} data points for anomaly detection, got {got}")]
    InsufficientData { required: usize, got: usize },

    #[error("Value at index {index} is not a finite number")]
    NonFiniteValue { index: usize },

    #[error("Feature set {got:?} does not match the trained model ({expected:?}); resend with retrain=true")]
    FeatureMismatch {
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("Detector state for device {0} is poisoned")]
    LockPoisoned(String),

    #[error(transparent)]
    Features(#[from] FeatureError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DetectorError {
    /// Whether the error was caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        match self {
            DetectorError::InsufficientData { .. }
            | DetectorError::NonFiniteValue { .. }
            | DetectorError::FeatureMismatch { .. }
            | DetectorError::Features(_) => true,
            DetectorError::Store(StoreError::InvalidDeviceId { .. }) => true,
            DetectorError::Store(_) | DetectorError::LockPoisoned(_) => false,
        }
    }
}

/// Predictive maintenance errors.
#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("Need at least {required} records for maintenance prediction, got {got}")]
    InsufficientHistory { required: usize, got: usize },

    #[error(transparent)]
    Features(#[from] FeatureError),
}

/// Usage forecasting errors.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Need at least {required} data points for forecasting, got {got}")]
    InsufficientHistory { required: usize, got: usize },

    #[error("Periods must be between 1 and {max}, got {got}")]
    InvalidPeriods { max: usize, got: usize },

    #[error("History value at index {index} is not a finite number")]
    NonFiniteValue { index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_display() {
        let error = DetectorError::InsufficientData {
            required: 10,
            got: 3,
        };
        assert_eq!(
            error.to_string(),
            "Need at least 10 data points for anomaly detection, got 3"
        );
        assert!(error.is_client_error());
    }

    #[test]
    fn test_store_errors_classified() {
        let invalid = DetectorError::Store(StoreError::InvalidDeviceId {
            id: "../x".to_string(),
            reason: "contains a path separator",
        });
        assert!(invalid.is_client_error());

        let io = DetectorError::Store(StoreError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        ));
        assert!(!io.is_client_error());
        assert!(!DetectorError::LockPoisoned("dev".to_string()).is_client_error());
    }
}
