//! Short-horizon usage forecasting
//!
//! Short histories get a recursive moving average. Longer ones get Holt's
//! linear trend method with a residual-based confidence per step.

use serde::Serialize;

use crate::error::ForecastError;
use crate::models::stats::mean;

/// Fewest history points accepted
pub const MIN_HISTORY: usize = 3;
/// History length from which the trend model is used
pub const TREND_HISTORY: usize = 7;
pub const DEFAULT_PERIODS: usize = 5;
pub const MAX_PERIODS: usize = 168;

const LEVEL_SMOOTHING: f64 = 0.5;
const TREND_SMOOTHING: f64 = 0.1;
const MOVING_AVERAGE_WINDOW: usize = 3;
const MOVING_AVERAGE_CONFIDENCE: f64 = 0.5;
const Z_95: f64 = 1.96;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastModel {
    MovingAverage,
    HoltLinear,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub values: Vec<f64>,
    pub confidence: Vec<f64>,
    pub model_type: ForecastModel,
}

/// Forecast `periods` steps ahead of `history`.
pub fn forecast(history: &[f64], periods: usize) -> Result<Forecast, ForecastError> {
    if history.len() < MIN_HISTORY {
        return Err(ForecastError::InsufficientHistory {
            required: MIN_HISTORY,
            got: history.len(),
        });
    }
    if periods == 0 || periods > MAX_PERIODS {
        return Err(ForecastError::InvalidPeriods {
            max: MAX_PERIODS,
            got: periods,
        });
    }
    if let Some(index) = history.iter().position(|v| !v.is_finite()) {
        return Err(ForecastError::NonFiniteValue { index });
    }

    if history.len() < TREND_HISTORY {
        Ok(moving_average(history, periods))
    } else {
        Ok(holt_linear(history, periods))
    }
}

fn moving_average(history: &[f64], periods: usize) -> Forecast {
    let mut window: Vec<f64> = history[history.len().saturating_sub(MOVING_AVERAGE_WINDOW)..].to_vec();
    let mut values = Vec::with_capacity(periods);

    for _ in 0..periods {
        let next = mean(&window);
        values.push(next);
        window.remove(0);
        window.push(next);
    }

    Forecast {
        values,
        confidence: vec![MOVING_AVERAGE_CONFIDENCE; periods],
        model_type: ForecastModel::MovingAverage,
    }
}

fn holt_linear(history: &[f64], periods: usize) -> Forecast {
    let mut level = history[0];
    let mut trend = history[1] - history[0];
    let mut residuals = Vec::with_capacity(history.len() - 1);

    for &observed in &history[1..] {
        let predicted = level + trend;
        residuals.push(observed - predicted);

        let previous_level = level;
        level = LEVEL_SMOOTHING * observed + (1.0 - LEVEL_SMOOTHING) * predicted;
        trend = TREND_SMOOTHING * (level - previous_level) + (1.0 - TREND_SMOOTHING) * trend;
    }

    let sigma = (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt();

    let (values, confidence) = (1..=periods)
        .map(|h| {
            let prediction = (level + h as f64 * trend).clamp(0.0, 100.0);
            let width = Z_95 * sigma * (h as f64).sqrt();
            let confidence = (1.0 - width / (prediction.abs() + 0.001)).clamp(0.1, 0.95);
            (prediction, confidence)
        })
        .unzip();

    Forecast {
        values,
        confidence,
        model_type: ForecastModel::HoltLinear,
    }
}
