//! Bounded history of recent readings
//!
//! The buffer keeps the last `capacity` readings in insertion order and evicts
//! from the head on overflow. [`SharedHistory`] is the single writer; any
//! number of [`HistoryView`]s may read from it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::types::VitalsReading;

/// One hour of readings at the default 2 s tick
pub const DEFAULT_HISTORY_CAPACITY: usize = 1800;

/// Chart window presets, measured in trailing readings
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1m")]
    OneMinute,
    #[default]
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
}

impl TimeRange {
    pub const ALL: [TimeRange; 5] = [
        TimeRange::OneMinute,
        TimeRange::FiveMinutes,
        TimeRange::FifteenMinutes,
        TimeRange::ThirtyMinutes,
        TimeRange::OneHour,
    ];

    /// Number of trailing points shown for this range
    pub fn points(self) -> usize {
        match self {
            TimeRange::OneMinute => 30,
            TimeRange::FiveMinutes => 150,
            TimeRange::FifteenMinutes => 450,
            TimeRange::ThirtyMinutes => 900,
            TimeRange::OneHour => 1800,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeRange::OneMinute => "1m",
            TimeRange::FiveMinutes => "5m",
            TimeRange::FifteenMinutes => "15m",
            TimeRange::ThirtyMinutes => "30m",
            TimeRange::OneHour => "1h",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Bounded FIFO of readings
#[derive(Clone, Debug)]
pub struct HistoryBuffer {
    readings: VecDeque<VitalsReading>,
    capacity: usize,
}

impl HistoryBuffer {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, reading: VitalsReading) {
        self.readings.push_back(reading);
        while self.readings.len() > self.capacity {
            self.readings.pop_front();
        }
    }

    pub fn extend<I>(&mut self, readings: I)
    where
        I: IntoIterator<Item = VitalsReading>,
    {
        for reading in readings {
            self.append(reading);
        }
    }

    /// Owned copy of the current sequence, oldest first
    pub fn snapshot(&self) -> Vec<VitalsReading> {
        self.readings.iter().cloned().collect()
    }

    /// Reset to exactly `readings`, keeping the newest `capacity` of them.
    pub fn replace_all(&mut self, readings: Vec<VitalsReading>) {
        let skip = readings.len().saturating_sub(self.capacity);
        self.readings.clear();
        self.readings.extend(readings.into_iter().skip(skip));
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }

    /// The current vitals
    pub fn latest(&self) -> Option<&VitalsReading> {
        self.readings.back()
    }

    /// The last `n` readings, oldest first
    pub fn tail(&self, n: usize) -> Vec<VitalsReading> {
        let skip = self.readings.len().saturating_sub(n);
        self.readings.iter().skip(skip).cloned().collect()
    }

    pub fn window(&self, range: TimeRange) -> Vec<VitalsReading> {
        self.tail(range.points())
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Writer half of the process-wide history. Deliberately not `Clone`.
#[derive(Debug)]
pub struct SharedHistory {
    inner: Arc<RwLock<HistoryBuffer>>,
}

impl SharedHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HistoryBuffer::new(capacity))),
        }
    }

    /// A read-only handle onto the same buffer
    pub fn view(&self) -> HistoryView {
        HistoryView {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn append(&mut self, reading: VitalsReading) {
        self.write().append(reading);
    }

    pub fn extend<I>(&mut self, readings: I)
    where
        I: IntoIterator<Item = VitalsReading>,
    {
        self.write().extend(readings);
    }

    pub fn replace_all(&mut self, readings: Vec<VitalsReading>) {
        self.write().replace_all(readings);
    }

    pub fn clear(&mut self) {
        self.write().clear();
    }

    pub fn snapshot(&self) -> Vec<VitalsReading> {
        read(&self.inner).snapshot()
    }

    pub fn len(&self) -> usize {
        read(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.inner).is_empty()
    }

    fn write(&mut self) -> RwLockWriteGuard<'_, HistoryBuffer> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SharedHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Read-only handle onto a [`SharedHistory`]
#[derive(Clone, Debug)]
pub struct HistoryView {
    inner: Arc<RwLock<HistoryBuffer>>,
}

impl HistoryView {
    pub fn snapshot(&self) -> Vec<VitalsReading> {
        read(&self.inner).snapshot()
    }

    pub fn latest(&self) -> Option<VitalsReading> {
        read(&self.inner).latest().cloned()
    }

    pub fn tail(&self, n: usize) -> Vec<VitalsReading> {
        read(&self.inner).tail(n)
    }

    pub fn window(&self, range: TimeRange) -> Vec<VitalsReading> {
        read(&self.inner).window(range)
    }

    pub fn len(&self) -> usize {
        read(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.inner).is_empty()
    }

    pub fn capacity(&self) -> usize {
        read(&self.inner).capacity()
    }
}

fn read(inner: &RwLock<HistoryBuffer>) -> RwLockReadGuard<'_, HistoryBuffer> {
    inner.read().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn reading_at(seconds: i64) -> VitalsReading {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let mut reading = VitalsReading::baseline(start + Duration::seconds(seconds));
        reading.steps = seconds as u64;
        reading
    }

    fn steps(readings: &[VitalsReading]) -> Vec<u64> {
        readings.iter().map(|r| r.steps).collect()
    }

    #[test]
    fn test_append_past_capacity_keeps_newest_in_order() {
        let capacity = 10;
        let k = 7;
        let mut buffer = HistoryBuffer::new(capacity);

        for i in 0..(capacity + k) as i64 {
            buffer.append(reading_at(i));
            assert!(buffer.len() <= capacity);
        }

        let expected: Vec<u64> = (k as u64..(capacity + k) as u64).collect();
        assert_eq!(steps(&buffer.snapshot()), expected);
        assert_eq!(buffer.latest().map(|r| r.steps), Some((capacity + k - 1) as u64));
    }

    #[test]
    fn test_replace_all_keeps_tail() {
        let mut buffer = HistoryBuffer::new(3);
        buffer.append(reading_at(100));

        buffer.replace_all((0..5).map(reading_at).collect());
        assert_eq!(steps(&buffer.snapshot()), vec![2, 3, 4]);

        buffer.replace_all(vec![reading_at(9)]);
        assert_eq!(steps(&buffer.snapshot()), vec![9]);
    }

    #[test]
    fn test_window_and_tail() {
        let mut buffer = HistoryBuffer::default();
        buffer.extend((0..200).map(reading_at));

        assert_eq!(buffer.window(TimeRange::OneMinute).len(), 30);
        assert_eq!(buffer.window(TimeRange::default()).len(), 150);
        assert_eq!(buffer.window(TimeRange::OneHour).len(), 200);
        assert_eq!(steps(&buffer.tail(2)), vec![198, 199]);
        assert!(HistoryBuffer::new(5).tail(3).is_empty());
    }

    #[test]
    fn test_clear() {
        let mut buffer = HistoryBuffer::new(4);
        buffer.extend((0..3).map(reading_at));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.latest().is_none());
    }

    #[test]
    fn test_view_sees_writer_updates() {
        let mut history = SharedHistory::new(2);
        let view = history.view();
        let other = view.clone();

        history.append(reading_at(1));
        history.append(reading_at(2));
        history.append(reading_at(3));

        assert_eq!(steps(&view.snapshot()), vec![2, 3]);
        assert_eq!(other.latest().map(|r| r.steps), Some(3));
        assert_eq!(view.capacity(), 2);

        history.clear();
        assert!(other.is_empty());
    }

    #[test]
    fn test_time_range_labels() {
        let labels: Vec<String> = TimeRange::ALL.iter().map(|r| r.to_string()).collect();
        assert_eq!(labels, vec!["1m", "5m", "15m", "30m", "1h"]);
        assert_eq!(
            serde_json::to_string(&TimeRange::FifteenMinutes).unwrap(),
            "\"15m\""
        );
    }
}
