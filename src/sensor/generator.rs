//! Simulated vitals generator
//!
//! Each metric drifts within its normal band and occasionally spikes toward
//! its critical band. Counters only ever increase.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{BloodPressure, Metric, VitalsReading};

use super::clock::Clock;

/// Probability that a single metric spikes on a single tick
pub const SPIKE_PROBABILITY: f64 = 0.05;

/// Produce the next reading from `previous`, or from the baseline when there is none.
pub fn generate<R: Rng + ?Sized>(
    previous: Option<&VitalsReading>,
    rng: &mut R,
    now: DateTime<Utc>,
) -> VitalsReading {
    let baseline;
    let prev = match previous {
        Some(reading) => reading,
        None => {
            baseline = VitalsReading::baseline(now);
            &baseline
        }
    };

    let mut next_value = |metric: Metric| {
        let drifted = drift(&mut *rng, prev.value(metric), metric);
        round_to(maybe_spike(&mut *rng, drifted, metric), metric.precision())
    };

    let heart_rate = next_value(Metric::HeartRate);
    let hrv = next_value(Metric::Hrv);
    let systolic = next_value(Metric::Systolic);
    let diastolic = next_value(Metric::Diastolic);
    let spo2 = next_value(Metric::SpO2);
    let temperature = next_value(Metric::Temperature);
    let respiratory_rate = next_value(Metric::RespiratoryRate);

    let steps = prev.steps + rng.gen_range(0..20u64);
    let calories = round_to(prev.calories + round_to(rng.gen::<f64>() * 5.0, 1), 1);

    VitalsReading {
        heart_rate,
        hrv,
        blood_pressure: BloodPressure {
            systolic,
            diastolic,
        },
        spo2,
        temperature,
        respiratory_rate,
        steps,
        calories,
        timestamp: next_timestamp(previous, now),
    }
}

/// Small random walk, clamped to the normal band
fn drift<R: Rng + ?Sized>(rng: &mut R, base: f64, metric: Metric) -> f64 {
    let t = metric.threshold();
    let range = t.max - t.min;
    let delta = (rng.gen::<f64>() - 0.5) * 2.0 * range * metric.volatility();
    (base + delta).clamp(t.min, t.max)
}

/// Rare excursion past the normal band, clamped to the critical band
fn maybe_spike<R: Rng + ?Sized>(rng: &mut R, value: f64, metric: Metric) -> f64 {
    if rng.gen::<f64>() > SPIKE_PROBABILITY {
        return value;
    }
    let t = metric.threshold();
    let target = if rng.gen::<f64>() > 0.5 {
        t.max + (t.critical_max - t.max) * rng.gen::<f64>() * 0.5
    } else {
        t.min - (t.min - t.critical_min) * rng.gen::<f64>() * 0.5
    };
    target.clamp(t.critical_min, t.critical_max)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn next_timestamp(previous: Option<&VitalsReading>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now <= prev.timestamp => prev.timestamp + Duration::milliseconds(1),
        _ => now,
    }
}

/// Stateful wrapper that remembers the previous reading between ticks.
pub struct VitalsGenerator {
    previous: Option<VitalsReading>,
    rng: StdRng,
    clock: Arc<dyn Clock>,
}

impl VitalsGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            previous: None,
            rng: StdRng::from_entropy(),
            clock,
        }
    }

    /// Create a generator whose sequence is reproducible for a given seed
    pub fn seeded(clock: Arc<dyn Clock>, seed: u64) -> Self {
        Self {
            previous: None,
            rng: StdRng::seed_from_u64(seed),
            clock,
        }
    }

    pub fn next_reading(&mut self) -> VitalsReading {
        let now = self.clock.now();
        let reading = generate(self.previous.as_ref(), &mut self.rng, now);
        self.previous = Some(reading.clone());
        reading
    }

    pub fn previous(&self) -> Option<&VitalsReading> {
        self.previous.as_ref()
    }

    /// Forget the previous reading; the next one starts from the baseline
    pub fn reset(&mut self) {
        self.previous = None;
    }
}
