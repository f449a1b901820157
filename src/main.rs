//! IoT Anomaly Service - Main Entry Point
//!
//! Loads configuration, opens the model store and serves the HTTP API.

use std::sync::Arc;

use anyhow::{Context, Result};
use iot_anomaly_service::{
    api::{self, AppState, Capabilities},
    config::{AppConfig, LoggingConfig},
    detector::DetectorRegistry,
    metrics::{MetricsReporter, ServiceMetrics},
    models::ModelStore,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let (config, config_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    init_logging(&config.logging)?;
    info!("Starting IoT Anomaly Service");

    match config_error {
        None => info!("Configuration loaded successfully"),
        Some(e) => warn!(error = %format!("{:#}", e), "Configuration not loaded, using defaults"),
    }
    info!(
        min_observations = config.detection.min_observations,
        baseline_capacity = config.detection.baseline_capacity,
        retrain_interval = config.detection.retrain_interval,
        contamination = config.detection.contamination,
        "Detector settings"
    );

    // Initialize model store and registry
    let store = Arc::new(
        ModelStore::open(&config.models.models_dir).context("Failed to open the models directory")?,
    );
    let registry = Arc::new(DetectorRegistry::new(
        store,
        config.detection.clone(),
        config.ensemble.clone(),
    ));

    let capabilities = Capabilities::from(&config.features);
    info!(
        advanced_anomaly = capabilities.advanced_anomaly,
        forecasting = capabilities.forecasting,
        predictive_maintenance = capabilities.predictive_maintenance,
        scheduling = capabilities.scheduling,
        "Capabilities resolved"
    );

    // Initialize metrics
    let metrics = Arc::new(ServiceMetrics::new());
    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    let app = api::router(AppState::new(registry, metrics.clone(), capabilities));

    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!(address = %address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");
    metrics.print_summary();

    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level))
        .add_directive(format!("iot_anomaly_service={}", logging.level).parse()?);

    if logging.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
