//! HTTP API
//!
//! Routes, shared state and error mapping. Handlers stay thin: they validate,
//! hand detector work to the blocking pool and shape the response.

pub mod error;
pub mod routes;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::FeatureFlags;
use crate::detector::DetectorRegistry;
use crate::metrics::ServiceMetrics;

pub use error::ApiError;

/// Optional capabilities, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub advanced_anomaly: bool,
    pub forecasting: bool,
    pub scheduling: bool,
    pub predictive_maintenance: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            advanced_anomaly: true,
            forecasting: true,
            scheduling: true,
            predictive_maintenance: true,
        }
    }

    /// Capability name to availability, the basic detector included.
    pub fn as_map(&self) -> BTreeMap<&'static str, bool> {
        BTreeMap::from([
            ("anomaly", true),
            ("advanced_anomaly", self.advanced_anomaly),
            ("forecasting", self.forecasting),
            ("scheduling", self.scheduling),
            ("predictive_maintenance", self.predictive_maintenance),
        ])
    }
}

impl From<&FeatureFlags> for Capabilities {
    fn from(flags: &FeatureFlags) -> Self {
        Self {
            advanced_anomaly: flags.advanced_anomaly,
            forecasting: flags.forecasting,
            scheduling: flags.scheduling,
            predictive_maintenance: flags.predictive_maintenance,
        }
    }
}

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DetectorRegistry>,
    pub metrics: Arc<ServiceMetrics>,
    pub capabilities: Capabilities,
}

impl AppState {
    pub fn new(registry: Arc<DetectorRegistry>, metrics: Arc<ServiceMetrics>, capabilities: Capabilities) -> Self {
        Self {
            registry,
            metrics,
            capabilities,
        }
    }

    /// Record latency and outcome of a handled request.
    pub(crate) fn finish<T>(&self, endpoint: &str, started: Instant, result: Result<T, ApiError>) -> Result<T, ApiError> {
        self.metrics.record_request(endpoint, started.elapsed());
        if let Err(e) = &result {
            if e.status().is_server_error() {
                self.metrics.record_server_error();
            } else {
                self.metrics.record_client_error();
            }
        }
        result
    }
}

/// Build the service router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .route("/anomaly", post(routes::detect_anomalies))
        .route("/anomaly-detection/advanced", post(routes::detect_advanced))
        .route("/forecast", post(routes::forecast_usage))
        .route("/schedule", post(routes::optimize_schedule))
        .route("/predictive-maintenance", post(routes::predict_maintenance))
        .route(
            "/models/{device_id}",
            get(routes::model_info).delete(routes::clear_models),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
