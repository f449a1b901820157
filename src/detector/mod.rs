//! Per-device detectors and the registry that owns them

pub mod anomaly;
pub mod ensemble;
pub mod registry;

pub use anomaly::{AnomalyDetector, Detection, DetectorState};
pub use ensemble::{EnsembleDetection, EnsembleDetector};
pub use registry::{DetectorRegistry, EnsembleOutcome};
