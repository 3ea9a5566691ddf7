//! types/vitals.rs
//!
//! Defines the VitalsReading value object, the per-metric threshold table and
//! the normal/warning/critical classification used by every consumer of the
//! realtime feed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Blood pressure pair in mmHg
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BloodPressure {
    pub systolic: f64,
    pub diastolic: f64,
}

/// One timestamped vitals sample.
///
/// Readings are immutable once generated. Field names serialize in the
/// camelCase shape the dashboard consumes (`heartRate`, `spO2`, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsReading {
    /// Beats per minute
    pub heart_rate: f64,

    /// Heart rate variability (milliseconds)
    pub hrv: f64,

    pub blood_pressure: BloodPressure,

    /// Oxygen saturation (percent)
    #[serde(rename = "spO2")]
    pub spo2: f64,

    /// Body temperature (°C)
    pub temperature: f64,

    /// Breaths per minute
    pub respiratory_rate: f64,

    /// Monotonic step counter
    pub steps: u64,

    /// Monotonic calorie counter
    pub calories: f64,

    /// When this sample was taken
    pub timestamp: DateTime<Utc>,
}

impl VitalsReading {
    /// The fixed reading the generator starts from when there is no previous sample.
    pub fn baseline(timestamp: DateTime<Utc>) -> Self {
        Self {
            heart_rate: 72.0,
            hrv: 45.0,
            blood_pressure: BloodPressure {
                systolic: 120.0,
                diastolic: 80.0,
            },
            spo2: 98.0,
            temperature: 36.6,
            respiratory_rate: 16.0,
            steps: 0,
            calories: 0.0,
            timestamp,
        }
    }

    /// Value of a single banded metric
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::HeartRate => self.heart_rate,
            Metric::Hrv => self.hrv,
            Metric::Systolic => self.blood_pressure.systolic,
            Metric::Diastolic => self.blood_pressure.diastolic,
            Metric::SpO2 => self.spo2,
            Metric::Temperature => self.temperature,
            Metric::RespiratoryRate => self.respiratory_rate,
        }
    }

    /// Classify a single metric of this reading
    pub fn status(&self, metric: Metric) -> VitalStatus {
        metric.classify(self.value(metric))
    }

    /// The worst classification across all banded metrics
    pub fn overall_status(&self) -> VitalStatus {
        Metric::ALL
            .iter()
            .map(|metric| self.status(*metric))
            .max()
            .unwrap_or(VitalStatus::Normal)
    }
}

/// Threshold record for a single metric.
///
/// `min..=max` is the normal band the generator drifts within; values outside
/// `critical_min..=critical_max` never occur.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VitalThreshold {
    pub min: f64,
    pub max: f64,
    pub critical_min: f64,
    pub critical_max: f64,
    pub unit: &'static str,
}

/// Metrics that carry a threshold band. Steps and calories are counters and
/// have none.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    HeartRate,
    Hrv,
    Systolic,
    Diastolic,
    #[serde(rename = "spO2")]
    SpO2,
    Temperature,
    RespiratoryRate,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::HeartRate,
        Metric::Hrv,
        Metric::Systolic,
        Metric::Diastolic,
        Metric::SpO2,
        Metric::Temperature,
        Metric::RespiratoryRate,
    ];

    pub fn threshold(self) -> VitalThreshold {
        match self {
            Metric::HeartRate => VitalThreshold {
                min: 60.0,
                max: 100.0,
                critical_min: 50.0,
                critical_max: 120.0,
                unit: "bpm",
            },
            Metric::Hrv => VitalThreshold {
                min: 20.0,
                max: 80.0,
                critical_min: 10.0,
                critical_max: 100.0,
                unit: "ms",
            },
            Metric::Systolic => VitalThreshold {
                min: 90.0,
                max: 140.0,
                critical_min: 80.0,
                critical_max: 180.0,
                unit: "mmHg",
            },
            Metric::Diastolic => VitalThreshold {
                min: 60.0,
                max: 90.0,
                critical_min: 50.0,
                critical_max: 110.0,
                unit: "mmHg",
            },
            Metric::SpO2 => VitalThreshold {
                min: 95.0,
                max: 100.0,
                critical_min: 90.0,
                critical_max: 100.0,
                unit: "%",
            },
            Metric::Temperature => VitalThreshold {
                min: 36.1,
                max: 37.2,
                critical_min: 35.0,
                critical_max: 38.5,
                unit: "°C",
            },
            Metric::RespiratoryRate => VitalThreshold {
                min: 12.0,
                max: 20.0,
                critical_min: 8.0,
                critical_max: 30.0,
                unit: "/min",
            },
        }
    }

    /// Fraction of the normal band a single tick may drift by
    pub fn volatility(self) -> f64 {
        match self {
            Metric::SpO2 | Metric::Temperature => 0.01,
            Metric::RespiratoryRate => 0.02,
            _ => 0.03,
        }
    }

    /// Decimal places kept when a generated value is rounded
    pub fn precision(self) -> i32 {
        match self {
            Metric::Systolic | Metric::Diastolic | Metric::RespiratoryRate => 0,
            Metric::Temperature => 2,
            _ => 1,
        }
    }

    pub fn classify(self, value: f64) -> VitalStatus {
        let t = self.threshold();
        if value < t.critical_min || value > t.critical_max {
            VitalStatus::Critical
        } else if value < t.min || value > t.max {
            VitalStatus::Warning
        } else {
            VitalStatus::Normal
        }
    }
}

/// Classification of a metric value against its threshold band
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VitalStatus {
    Normal,
    Warning,
    Critical,
}

impl fmt::Display for VitalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VitalStatus::Normal => "normal",
            VitalStatus::Warning => "warning",
            VitalStatus::Critical => "critical",
        };
        f.write_str(label)
    }
}
