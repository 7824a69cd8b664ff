use std::sync::Arc;

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};

use crate::client::StatsdClient;

/// A [`metrics`] recorder that forwards every update to a StatsD server.
///
/// Nothing is aggregated locally: each counter increment, gauge update, or histogram sample is sent as it happens.
/// Counters map to StatsD counters, gauges to StatsD gauges, and histograms to StatsD timers. Plain StatsD has no
/// notion of tags, so labels on metric keys are ignored.
pub struct StatsdRecorder {
    client: StatsdClient,
}

impl StatsdRecorder {
    /// Creates a new `StatsdRecorder` that sends through the given client.
    pub fn new(client: StatsdClient) -> Self {
        StatsdRecorder { client }
    }

    fn handle(&self, key: &Key) -> Arc<StatsdHandle> {
        Arc::new(StatsdHandle { client: self.client.clone(), aspect: key.name().to_string() })
    }
}

impl Recorder for StatsdRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        Counter::from_arc(self.handle(key))
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(self.handle(key))
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(self.handle(key))
    }
}

struct StatsdHandle {
    client: StatsdClient,
    aspect: String,
}

impl CounterFn for StatsdHandle {
    fn increment(&self, value: u64) {
        self.client.count(&self.aspect, i64::try_from(value).unwrap_or(i64::MAX));
    }

    // StatsD counters are reset on every flush, so an absolute value is only meaningful as a gauge.
    fn absolute(&self, value: u64) {
        self.client.gauge(&self.aspect, i64::try_from(value).unwrap_or(i64::MAX));
    }
}

impl GaugeFn for StatsdHandle {
    fn increment(&self, value: f64) {
        self.client.gauge_delta(&self.aspect, value);
    }

    fn decrement(&self, value: f64) {
        self.client.gauge_delta(&self.aspect, -value);
    }

    fn set(&self, value: f64) {
        self.client.gauge(&self.aspect, value);
    }
}

impl HistogramFn for StatsdHandle {
    fn record(&self, value: f64) {
        self.client.time_float(&self.aspect, value);
    }
}
