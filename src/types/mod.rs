//! Value types shared across the pipeline

pub mod vitals;

pub use vitals::{BloodPressure, Metric, VitalStatus, VitalThreshold, VitalsReading};
