//! Request handlers

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use tracing::{debug, info};

use super::{ApiError, AppState};
use crate::error::DetectorError;
use crate::forecast;
use crate::maintenance::MaintenanceEngine;
use crate::models::stats::percentile;
use crate::models::store::validate_device_id;
use crate::schedule;
use crate::types::response::{rfc3339, timestamp};
use crate::types::{
    AdvancedAnomalyRequest, AdvancedAnomalyResponse, AnomalyRequest, AnomalyResponse, ClearResponse,
    ForecastRequest, ForecastResponse, HealthResponse, MaintenanceRequest, MaintenanceResponse,
    MetricsResponse, ModelsResponse, ScheduleRequest, ScheduleResponse,
};

/// Percentile of the scores reported as `threshold`
const THRESHOLD_PERCENTILE: f64 = 10.0;

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        capabilities: state.capabilities.as_map(),
        models_dir: state.registry.store().dir().display().to_string(),
        cached_devices: state.registry.cached_devices(),
        timestamp: timestamp(),
    })
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        metrics: state.metrics.snapshot(),
        timestamp: timestamp(),
    })
}

/// POST /anomaly
pub async fn detect_anomalies(
    State(state): State<AppState>,
    payload: Result<Json<AnomalyRequest>, JsonRejection>,
) -> Result<Json<AnomalyResponse>, ApiError> {
    let started = Instant::now();
    let result = anomaly(&state, payload).await.map(Json);
    state.finish("anomaly", started, result)
}

async fn anomaly(
    state: &AppState,
    payload: Result<Json<AnomalyRequest>, JsonRejection>,
) -> Result<AnomalyResponse, ApiError> {
    let Json(request) = payload?;
    let AnomalyRequest { device_id, values } = request;

    let registry = Arc::clone(&state.registry);
    let (device_id, detection) = tokio::task::spawn_blocking(move || {
        let detection = registry.detect(&device_id, &values);
        (device_id, detection)
    })
    .await?;
    let detection = detection?;

    state.metrics.record_detection(
        detection.scores.len(),
        detection.anomalies.len(),
        detection.retrained,
    );
    if !detection.anomalies.is_empty() {
        info!(
            device_id = %device_id,
            anomalies = detection.anomalies.len(),
            observations = detection.scores.len(),
            "Anomalies detected"
        );
    }

    Ok(AnomalyResponse {
        threshold: percentile(&detection.scores, THRESHOLD_PERCENTILE),
        device_id,
        anomalies: detection.anomalies,
        scores: detection.scores,
        timestamp: timestamp(),
    })
}

/// POST /anomaly-detection/advanced
pub async fn detect_advanced(
    State(state): State<AppState>,
    payload: Result<Json<AdvancedAnomalyRequest>, JsonRejection>,
) -> Result<Json<AdvancedAnomalyResponse>, ApiError> {
    let started = Instant::now();
    let result = advanced(&state, payload).await.map(Json);
    state.finish("anomaly_advanced", started, result)
}

async fn advanced(
    state: &AppState,
    payload: Result<Json<AdvancedAnomalyRequest>, JsonRejection>,
) -> Result<AdvancedAnomalyResponse, ApiError> {
    if !state.capabilities.advanced_anomaly {
        return Err(ApiError::Unavailable("Advanced anomaly detection"));
    }
    let Json(request) = payload?;
    let AdvancedAnomalyRequest {
        device_id,
        data,
        device_type,
        retrain,
    } = request;

    let registry = Arc::clone(&state.registry);
    let (device_id, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = registry.detect_ensemble(&device_id, &device_type, &data, retrain);
        (device_id, outcome)
    })
    .await?;
    let outcome = outcome?;
    let detection = outcome.detection;

    state.metrics.record_detection(
        detection.scores.len(),
        detection.anomalies.len(),
        detection.refitted,
    );
    debug!(
        device_id = %device_id,
        anomalies = detection.anomalies.len(),
        refitted = detection.refitted,
        "Ensemble detection finished"
    );

    Ok(AdvancedAnomalyResponse {
        threshold: percentile(&detection.scores, THRESHOLD_PERCENTILE),
        device_id,
        device_type: outcome.device_type,
        anomalies: detection.anomalies,
        scores: detection.scores,
        member_scores: detection.member_scores,
        member_thresholds: outcome.thresholds,
        anomaly_rate: detection.anomaly_rate,
        features: outcome.features,
        retrained: detection.refitted,
        trained_at: rfc3339(outcome.trained_at),
        training_rows: outcome.training_rows,
        timestamp: timestamp(),
    })
}

/// POST /forecast
pub async fn forecast_usage(
    State(state): State<AppState>,
    payload: Result<Json<ForecastRequest>, JsonRejection>,
) -> Result<Json<ForecastResponse>, ApiError> {
    let started = Instant::now();
    let result = forecast_request(&state, payload).map(Json);
    state.finish("forecast", started, result)
}

fn forecast_request(
    state: &AppState,
    payload: Result<Json<ForecastRequest>, JsonRejection>,
) -> Result<ForecastResponse, ApiError> {
    if !state.capabilities.forecasting {
        return Err(ApiError::Unavailable("Forecasting"));
    }
    let Json(request) = payload?;
    let result = forecast::forecast(&request.history, request.periods)?;

    debug!(
        device_id = %request.device_id,
        history = request.history.len(),
        periods = request.periods,
        model = ?result.model_type,
        "Forecast computed"
    );

    Ok(ForecastResponse {
        device_id: request.device_id,
        forecast: result.values,
        confidence: result.confidence,
        timestamp: timestamp(),
        model_type: result.model_type,
    })
}

/// POST /schedule
pub async fn optimize_schedule(
    State(state): State<AppState>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let started = Instant::now();
    let result = schedule_request(&state, payload).map(Json);
    state.finish("schedule", started, result)
}

fn schedule_request(
    state: &AppState,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<ScheduleResponse, ApiError> {
    if !state.capabilities.scheduling {
        return Err(ApiError::Unavailable("Schedule optimization"));
    }
    let Json(request) = payload?;
    let constraints = request.constraints.unwrap_or_default();
    let usage = request.historical_usage.unwrap_or_default();

    let weekly = schedule::optimize(&constraints);
    let energy_savings = weekly.energy_savings(&usage);

    Ok(ScheduleResponse {
        device_id: request.device_id,
        schedule: weekly,
        energy_savings,
        timestamp: timestamp(),
    })
}

/// POST /predictive-maintenance
pub async fn predict_maintenance(
    State(state): State<AppState>,
    payload: Result<Json<MaintenanceRequest>, JsonRejection>,
) -> Result<Json<MaintenanceResponse>, ApiError> {
    let started = Instant::now();
    let result = maintenance(&state, payload).await.map(Json);
    state.finish("maintenance", started, result)
}

async fn maintenance(
    state: &AppState,
    payload: Result<Json<MaintenanceRequest>, JsonRejection>,
) -> Result<MaintenanceResponse, ApiError> {
    if !state.capabilities.predictive_maintenance {
        return Err(ApiError::Unavailable("Predictive maintenance"));
    }
    let Json(request) = payload?;
    validate_device_id(&request.device_id).map_err(DetectorError::from)?;

    let engine = MaintenanceEngine::new(state.registry.detection_config());
    let MaintenanceRequest {
        device_id,
        historical_data,
        device_type,
    } = request;
    let (device_type, prediction) = tokio::task::spawn_blocking(move || {
        let prediction = engine.predict(&device_type, &historical_data);
        (device_type, prediction)
    })
    .await?;
    let prediction = prediction?;

    if prediction.days_to_maintenance <= 7 {
        info!(
            device_id = %device_id,
            failure_probability = prediction.failure_probability,
            "Maintenance due soon"
        );
    }

    Ok(MaintenanceResponse {
        device_id,
        device_type,
        failure_probability: prediction.failure_probability,
        maintenance_priority: prediction.priority,
        days_to_maintenance: prediction.days_to_maintenance,
        recommendations: prediction.recommendations,
        timestamp: timestamp(),
    })
}

/// GET /models/{device_id}
pub async fn model_info(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<ModelsResponse>, ApiError> {
    let started = Instant::now();
    let result = models(&state, device_id).await.map(Json);
    state.finish("models", started, result)
}

async fn models(state: &AppState, device_id: String) -> Result<ModelsResponse, ApiError> {
    let registry = Arc::clone(&state.registry);
    let (device_id, models) = tokio::task::spawn_blocking(move || {
        let models = registry.persisted_models(&device_id);
        (device_id, models)
    })
    .await?;

    Ok(ModelsResponse {
        models: models?,
        in_memory: state.registry.is_cached(&device_id),
        device_id,
        timestamp: timestamp(),
    })
}

/// DELETE /models/{device_id}
pub async fn clear_models(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<ClearResponse>, ApiError> {
    let started = Instant::now();
    let result = clear(&state, device_id).await.map(Json);
    state.finish("models_clear", started, result)
}

async fn clear(state: &AppState, device_id: String) -> Result<ClearResponse, ApiError> {
    let registry = Arc::clone(&state.registry);
    let (device_id, cleared) = tokio::task::spawn_blocking(move || {
        let cleared = registry.clear(&device_id);
        (device_id, cleared)
    })
    .await?;

    Ok(ClearResponse {
        cleared: cleared?,
        device_id,
        timestamp: timestamp(),
    })
}
