//! Simulated sensor: timestamp clock and vitals generator

pub mod clock;
pub mod generator;

pub use clock::{Clock, ManualClock, SystemClock};
pub use generator::{generate, VitalsGenerator, SPIKE_PROBABILITY};
