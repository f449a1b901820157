//! Synthetic Reading Generator
//!
//! Generates sensor readings for a handful of devices and posts them to the
//! anomaly endpoint, injecting occasional spikes.
//!
//! Usage: `reading-generator [base_url] [devices] [batches] [spike_rate] [delay_ms]`

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Readings posted per request
const BATCH_SIZE: usize = 20;

#[derive(Debug, Clone, Serialize)]
struct AnomalyRequest {
    device_id: String,
    values: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct AnomalyResponse {
    anomalies: Vec<usize>,
    threshold: f64,
}

/// One simulated sensor
struct Device {
    id: String,
    level: f64,
    noise: f64,
}

struct ReadingGenerator {
    rng: StdRng,
    devices: Vec<Device>,
    spike_rate: f64,
}

impl ReadingGenerator {
    fn new(device_count: usize, spike_rate: f64) -> Self {
        let mut rng = StdRng::from_entropy();
        let devices = (0..device_count)
            .map(|i| Device {
                id: format!("sensor_{:03}", i + 1),
                level: rng.gen_range(18.0..30.0),
                noise: rng.gen_range(0.1..1.0),
            })
            .collect();

        Self {
            rng,
            devices,
            spike_rate,
        }
    }

    /// Next batch for device `index`; returns the request and the spike positions.
    fn batch(&mut self, index: usize) -> (AnomalyRequest, Vec<usize>) {
        let device = &self.devices[index];
        let mut spikes = Vec::new();
        let values = (0..BATCH_SIZE)
            .map(|i| {
                let reading = device.level + self.rng.gen_range(-device.noise..device.noise);
                if self.rng.gen_bool(self.spike_rate) {
                    spikes.push(i);
                    reading * self.rng.gen_range(3.0..6.0)
                } else {
                    reading
                }
            })
            .collect();

        (
            AnomalyRequest {
                device_id: device.id.clone(),
                values,
            },
            spikes,
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reading_generator=info".parse()?),
        )
        .init();

    info!("Starting Synthetic Reading Generator");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let base_url = args.get(1).map(|s| s.as_str()).unwrap_or("http://localhost:8002");
    let devices: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(5);
    let batches: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(50);
    let spike_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.02);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(200);

    info!(
        base_url = %base_url,
        devices = devices,
        batches = batches,
        spike_rate = spike_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let mut generator = ReadingGenerator::new(devices.max(1), spike_rate.clamp(0.0, 1.0));
    let client = reqwest::Client::new();

    let health_url = format!("{}/health", base_url);
    if let Err(e) = client.get(&health_url).send().await.and_then(|r| r.error_for_status()) {
        warn!(error = %e, "Service not reachable. Running in dry-run mode.");
        return run_dry_mode(&mut generator, batches, delay_ms).await;
    }
    info!("Connected to {}", base_url);

    let anomaly_url = format!("{}/anomaly", base_url);
    let mut injected = 0usize;
    let mut flagged = 0usize;

    for batch in 0..batches {
        for index in 0..generator.devices.len() {
            let (request, spikes) = generator.batch(index);
            injected += spikes.len();

            let response = client.post(&anomaly_url).json(&request).send().await?;
            if !response.status().is_success() {
                warn!(
                    device_id = %request.device_id,
                    status = %response.status(),
                    "Request rejected"
                );
                continue;
            }

            let body: AnomalyResponse = response.json().await?;
            flagged += body.anomalies.len();
            if !body.anomalies.is_empty() || !spikes.is_empty() {
                info!(
                    device_id = %request.device_id,
                    injected = ?spikes,
                    flagged = ?body.anomalies,
                    threshold = body.threshold,
                    "Batch scored"
                );
            }
        }

        if (batch + 1) % 10 == 0 {
            info!(
                "Posted {}/{} batches ({} spikes injected, {} flagged)",
                batch + 1,
                batches,
                injected,
                flagged
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(
        "Completed! {} spikes injected, {} readings flagged",
        injected, flagged
    );

    Ok(())
}

async fn run_dry_mode(generator: &mut ReadingGenerator, batches: u64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no service connection)");

    for batch in 0..batches {
        let (request, spikes) = generator.batch(batch as usize % generator.devices.len());

        if (batch + 1) % 10 == 0 || batch == 0 {
            let json = serde_json::to_string_pretty(&request)?;
            info!("Sample batch {} (spikes at {:?}):\n{}", batch + 1, spikes, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
