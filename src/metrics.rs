//! Request and detection metrics for the anomaly service.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

/// Latency samples kept per endpoint
const LATENCY_WINDOW: usize = 1000;

/// Metrics collector shared by all handlers
pub struct ServiceMetrics {
    /// Observations scored by per-device detectors
    pub observations_scored: AtomicU64,
    /// Observations and records flagged as anomalous
    pub anomalies_flagged: AtomicU64,
    /// Detector trainings, initial ones included
    pub retrains: AtomicU64,
    /// Requests rejected as invalid
    pub client_errors: AtomicU64,
    /// Requests that failed internally
    pub server_errors: AtomicU64,
    /// Requests by endpoint
    requests: RwLock<HashMap<String, u64>>,
    /// Latencies by endpoint (in microseconds)
    latencies: RwLock<HashMap<String, Vec<u64>>>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            observations_scored: AtomicU64::new(0),
            anomalies_flagged: AtomicU64::new(0),
            retrains: AtomicU64::new(0),
            client_errors: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
            requests: RwLock::new(HashMap::new()),
            latencies: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a handled request
    pub fn record_request(&self, endpoint: &str, latency: Duration) {
        if let Ok(mut requests) = self.requests.write() {
            *requests.entry(endpoint.to_string()).or_insert(0) += 1;
        }

        if let Ok(mut latencies) = self.latencies.write() {
            let samples = latencies.entry(endpoint.to_string()).or_default();
            samples.push(latency.as_micros() as u64);
            if samples.len() > LATENCY_WINDOW {
                samples.drain(0..LATENCY_WINDOW / 2);
            }
        }
    }

    /// Record the outcome of one detection call
    pub fn record_detection(&self, observations: usize, anomalies: usize, retrained: bool) {
        self.observations_scored
            .fetch_add(observations as u64, Ordering::Relaxed);
        self.anomalies_flagged
            .fetch_add(anomalies as u64, Ordering::Relaxed);
        if retrained {
            self.retrains.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_client_error(&self) {
        self.client_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_server_error(&self) {
        self.server_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Latency statistics per endpoint
    pub fn latency_stats(&self) -> BTreeMap<String, LatencyStats> {
        let Ok(latencies) = self.latencies.read() else {
            return BTreeMap::new();
        };

        latencies
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(endpoint, samples)| (endpoint.clone(), LatencyStats::from_samples(samples)))
            .collect()
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests: BTreeMap<String, u64> = self
            .requests
            .read()
            .map(|r| r.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();

        MetricsSnapshot {
            uptime_secs: self.uptime().as_secs(),
            requests_total: requests.values().sum(),
            requests,
            observations_scored: self.observations_scored.load(Ordering::Relaxed),
            anomalies_flagged: self.anomalies_flagged.load(Ordering::Relaxed),
            retrains: self.retrains.load(Ordering::Relaxed),
            client_errors: self.client_errors.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            latency: self.latency_stats(),
        }
    }

    /// Log summary statistics
    pub fn print_summary(&self) {
        let snapshot = self.snapshot();
        let anomaly_rate = if snapshot.observations_scored > 0 {
            (snapshot.anomalies_flagged as f64 / snapshot.observations_scored as f64) * 100.0
        } else {
            0.0
        };

        info!(
            uptime_secs = snapshot.uptime_secs,
            requests = snapshot.requests_total,
            observations = snapshot.observations_scored,
            anomalies = snapshot.anomalies_flagged,
            anomaly_pct = anomaly_rate,
            retrains = snapshot.retrains,
            client_errors = snapshot.client_errors,
            server_errors = snapshot.server_errors,
            "Service metrics summary"
        );

        for (endpoint, stats) in &snapshot.latency {
            info!(
                endpoint = %endpoint,
                calls = stats.count,
                mean_us = stats.mean_us,
                p50_us = stats.p50_us,
                p95_us = stats.p95_us,
                p99_us = stats.p99_us,
                "Endpoint latency"
            );
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics of one endpoint
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl LatencyStats {
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        Self {
            count: count as u64,
            mean_us: sorted.iter().sum::<u64>() / count as u64,
            p50_us: sorted[count / 2],
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }
}

/// JSON view served on `GET /metrics`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub requests_total: u64,
    pub requests: BTreeMap<String, u64>,
    pub observations_scored: u64,
    pub anomalies_flagged: u64,
    pub retrains: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub latency: BTreeMap<String, LatencyStats>,
}

/// Periodic metrics reporter
pub struct MetricsReporter {
    metrics: Arc<ServiceMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServiceMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = ServiceMetrics::new();

        metrics.record_request("anomaly", Duration::from_micros(100));
        metrics.record_request("anomaly", Duration::from_micros(300));
        metrics.record_request("forecast", Duration::from_micros(50));
        metrics.record_detection(20, 2, true);
        metrics.record_detection(10, 0, false);
        metrics.record_client_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 3);
        assert_eq!(snapshot.requests.get("anomaly"), Some(&2));
        assert_eq!(snapshot.observations_scored, 30);
        assert_eq!(snapshot.anomalies_flagged, 2);
        assert_eq!(snapshot.retrains, 1);
        assert_eq!(snapshot.client_errors, 1);
        assert_eq!(snapshot.server_errors, 0);
        assert_eq!(snapshot.latency["anomaly"].mean_us, 200);
        assert_eq!(snapshot.latency["anomaly"].max_us, 300);
    }

    #[test]
    fn test_latency_window_bounded() {
        let metrics = ServiceMetrics::new();
        for i in 0..(LATENCY_WINDOW as u64 + 10) {
            metrics.record_request("health", Duration::from_micros(i));
        }

        let stats = &metrics.latency_stats()["health"];
        assert!(stats.count as usize <= LATENCY_WINDOW);
        assert_eq!(metrics.snapshot().requests["health"], LATENCY_WINDOW as u64 + 10);
    }
}
