//! Fire-and-forget metrics sink.
//!
//! Drivers report retry counts, error counts and operation timings through a
//! [`MetricsSink`]. Reporting never affects the result of an operation, and
//! [`NoopMetrics`] is always a valid substitute.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Receiver of counter and timer events.
pub trait MetricsSink: Send + Sync {
    /// Increments the named counter by one.
    fn counter_inc(&self, name: &str);

    /// Records one timed operation that moved `bytes` bytes.
    fn timer_record(&self, name: &str, elapsed: Duration, bytes: u64);
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn counter_inc(&self, _name: &str) {}

    fn timer_record(&self, _name: &str, _elapsed: Duration, _bytes: u64) {}
}

/// Shared handle to a sink.
pub type SharedMetrics = Arc<dyn MetricsSink>;

/// Returns the default no-op sink.
pub fn noop() -> SharedMetrics {
    Arc::new(NoopMetrics)
}

/// In-process sink that keeps counters and timer totals in memory.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    counters: Mutex<HashMap<String, u64>>,
    timers: Mutex<HashMap<String, (u64, u64)>>,
}

impl MetricsRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter (0 if never incremented).
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Number of timer events and total bytes recorded under `name`.
    pub fn timer(&self, name: &str) -> (u64, u64) {
        self.timers.lock().get(name).copied().unwrap_or((0, 0))
    }
}

impl MetricsSink for MetricsRecorder {
    fn counter_inc(&self, name: &str) {
        *self.counters.lock().entry(name.to_string()).or_default() += 1;
    }

    fn timer_record(&self, name: &str, _elapsed: Duration, bytes: u64) {
        let mut timers = self.timers.lock();
        let entry = timers.entry(name.to_string()).or_default();
        entry.0 += 1;
        entry.1 += bytes;
    }
}

/// Times an operation and reports it when stopped or dropped.
pub struct TimerGuard<'a> {
    sink: &'a dyn MetricsSink,
    name: String,
    started: Instant,
    bytes: u64,
    stopped: bool,
}

impl<'a> TimerGuard<'a> {
    /// Starts timing `name`.
    pub fn start(sink: &'a dyn MetricsSink, name: impl Into<String>) -> Self {
        Self {
            sink,
            name: name.into(),
            started: Instant::now(),
            bytes: 0,
            stopped: false,
        }
    }

    /// Stops the timer and records `bytes` moved.
    pub fn stop(mut self, bytes: u64) {
        self.bytes = bytes;
        self.record();
    }

    fn record(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.sink
                .timer_record(&self.name, self.started.elapsed(), self.bytes);
        }
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.record();
    }
}
