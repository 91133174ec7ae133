//! Internal diagnostics instruments.
//!
//! The core emits a small, fixed set of counters and gauges describing its
//! own health (spans dropped, sampler updates, queue depth). The host
//! application supplies a [`MetricsFactory`] wired to its metrics backend;
//! by default everything is a no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A monotonically increasing counter.
pub trait Counter: Send + Sync + fmt::Debug {
    /// Increment the counter by `delta`.
    fn incr(&self, delta: u64);
}

/// A gauge reporting the latest observed value.
pub trait Gauge: Send + Sync + fmt::Debug {
    /// Record the current value.
    fn update(&self, value: i64);
}

/// A duration recorder.
pub trait Timer: Send + Sync + fmt::Debug {
    /// Record a single duration observation.
    fn record(&self, duration: Duration);
}

/// Creates the instruments the core reports its own health through.
pub trait MetricsFactory: Send + Sync + fmt::Debug {
    /// Create a counter with the given name and tags.
    fn create_counter(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Counter>;
    /// Create a gauge with the given name and tags.
    fn create_gauge(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Gauge>;
    /// Create a timer with the given name and tags.
    fn create_timer(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Timer>;
}

/// A [`MetricsFactory`] that produces instruments which discard every
/// observation.
#[derive(Clone, Debug, Default)]
pub struct NoopMetricsFactory;

#[derive(Debug)]
struct NoopInstrument;

impl Counter for NoopInstrument {
    fn incr(&self, _delta: u64) {}
}

impl Gauge for NoopInstrument {
    fn update(&self, _value: i64) {}
}

impl Timer for NoopInstrument {
    fn record(&self, _duration: Duration) {}
}

impl MetricsFactory for NoopMetricsFactory {
    fn create_counter(&self, _name: &str, _tags: &[(&str, &str)]) -> Box<dyn Counter> {
        Box::new(NoopInstrument)
    }

    fn create_gauge(&self, _name: &str, _tags: &[(&str, &str)]) -> Box<dyn Gauge> {
        Box::new(NoopInstrument)
    }

    fn create_timer(&self, _name: &str, _tags: &[(&str, &str)]) -> Box<dyn Timer> {
        Box::new(NoopInstrument)
    }
}

/// The instrument bundle shared by the reporter and the remote sampler.
///
/// Gauge updates are opportunistic (on flush), not continuous, to keep
/// metric emission off the hot path.
#[derive(Debug)]
pub struct TracerMetrics {
    /// Spans successfully handed to the wire by the sender.
    pub reporter_success: Box<dyn Counter>,
    /// Spans the sender failed to transmit.
    pub reporter_failure: Box<dyn Counter>,
    /// Spans dropped because the reporter queue was full or closed.
    pub reporter_dropped: Box<dyn Counter>,
    /// Reporter queue depth, sampled when a flush executes.
    pub reporter_queue_length: Box<dyn Gauge>,
    /// Successful sampling-strategy queries.
    pub sampler_retrieved: Box<dyn Counter>,
    /// Failed sampling-strategy queries.
    pub sampler_query_failure: Box<dyn Counter>,
    /// Strategy responses that changed the active sampler.
    pub sampler_updated: Box<dyn Counter>,
    /// Strategy responses that could not be applied.
    pub sampler_update_failure: Box<dyn Counter>,
}

impl TracerMetrics {
    /// Create the instrument bundle from the given factory.
    pub fn new(factory: &dyn MetricsFactory) -> Self {
        TracerMetrics {
            reporter_success: factory.create_counter("jaeger.reporter-spans", &[("result", "ok")]),
            reporter_failure: factory.create_counter("jaeger.reporter-spans", &[("result", "err")]),
            reporter_dropped: factory
                .create_counter("jaeger.reporter-spans", &[("result", "dropped")]),
            reporter_queue_length: factory.create_gauge("jaeger.reporter-queue-length", &[]),
            sampler_retrieved: factory.create_counter("jaeger.sampler-queries", &[("result", "ok")]),
            sampler_query_failure: factory
                .create_counter("jaeger.sampler-queries", &[("result", "err")]),
            sampler_updated: factory.create_counter("jaeger.sampler-updates", &[("result", "ok")]),
            sampler_update_failure: factory
                .create_counter("jaeger.sampler-updates", &[("result", "err")]),
        }
    }

    /// An instrument bundle that discards everything.
    pub fn noop() -> Self {
        TracerMetrics::new(&NoopMetricsFactory)
    }
}

impl Default for TracerMetrics {
    fn default() -> Self {
        TracerMetrics::noop()
    }
}

/// A [`MetricsFactory`] that records observations in memory.
///
/// Useful for testing and debugging. Counters and gauges can be read back
/// with [`counter_value`](InMemoryMetricsFactory::counter_value) and
/// [`gauge_value`](InMemoryMetricsFactory::gauge_value); clones share
/// storage.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMetricsFactory {
    counters: Arc<Mutex<HashMap<String, u64>>>,
    gauges: Arc<Mutex<HashMap<String, i64>>>,
}

fn instrument_key(name: &str, tags: &[(&str, &str)]) -> String {
    let mut key = name.to_string();
    let mut tags: Vec<_> = tags.to_vec();
    tags.sort_unstable();
    for (tag, value) in tags {
        key.push_str(&format!("|{}={}", tag, value));
    }
    key
}

impl InMemoryMetricsFactory {
    /// Create a new in-memory factory with empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// The accumulated value of a counter, zero if never incremented.
    pub fn counter_value(&self, name: &str, tags: &[(&str, &str)]) -> u64 {
        self.counters
            .lock()
            .map(|counters| {
                counters
                    .get(&instrument_key(name, tags))
                    .copied()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// The last recorded value of a gauge, if any.
    pub fn gauge_value(&self, name: &str, tags: &[(&str, &str)]) -> Option<i64> {
        self.gauges
            .lock()
            .ok()
            .and_then(|gauges| gauges.get(&instrument_key(name, tags)).copied())
    }
}

#[derive(Debug)]
struct InMemoryCounter {
    key: String,
    counters: Arc<Mutex<HashMap<String, u64>>>,
}

impl Counter for InMemoryCounter {
    fn incr(&self, delta: u64) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(self.key.clone()).or_insert(0) += delta;
        }
    }
}

#[derive(Debug)]
struct InMemoryGauge {
    key: String,
    gauges: Arc<Mutex<HashMap<String, i64>>>,
}

impl Gauge for InMemoryGauge {
    fn update(&self, value: i64) {
        if let Ok(mut gauges) = self.gauges.lock() {
            gauges.insert(self.key.clone(), value);
        }
    }
}

impl MetricsFactory for InMemoryMetricsFactory {
    fn create_counter(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Counter> {
        Box::new(InMemoryCounter {
            key: instrument_key(name, tags),
            counters: self.counters.clone(),
        })
    }

    fn create_gauge(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Gauge> {
        Box::new(InMemoryGauge {
            key: instrument_key(name, tags),
            gauges: self.gauges.clone(),
        })
    }

    fn create_timer(&self, _name: &str, _tags: &[(&str, &str)]) -> Box<dyn Timer> {
        Box::new(NoopInstrument)
    }
}
