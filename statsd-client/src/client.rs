use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use crate::{
    dispatcher::Dispatcher,
    error::ClientError,
    format::{Formatter, GaugeLines, GaugeValue, WireLine},
};

struct Inner {
    formatter: Formatter,
    dispatcher: Dispatcher,
}

/// A non-blocking StatsD client.
///
/// Every recording method formats the metric on the calling thread and hands it to a background worker, which sends
/// it to the StatsD server as a single UDP datagram. Recording methods never block on I/O and never fail: anything
/// that goes wrong after the client was built is passed to the configured error handler instead.
///
/// The client is cheap to clone, and clones share the same background worker. The worker stops when [`close`] is
/// called, or once the last clone is dropped.
///
/// [`close`]: StatsdClient::close
#[derive(Clone)]
pub struct StatsdClient {
    inner: Arc<Inner>,
}

impl StatsdClient {
    pub(crate) fn new(formatter: Formatter, dispatcher: Dispatcher) -> Self {
        Self { inner: Arc::new(Inner { formatter, dispatcher }) }
    }

    /// Returns the normalized key prefix applied to every metric.
    pub fn prefix(&self) -> &str {
        self.inner.formatter.prefix()
    }

    /// Adjusts the specified counter by the given delta.
    pub fn count(&self, aspect: &str, delta: i64) {
        self.count_with_rate(aspect, delta, 1.0);
    }

    /// Adjusts the specified counter by the given delta, sampled at the given rate.
    ///
    /// A rate of `0.1` tells the server that this counter is only being sent a tenth of the time.
    pub fn count_with_rate(&self, aspect: &str, delta: i64, sample_rate: f64) {
        self.submit(self.inner.formatter.counter(aspect, delta, sample_rate));
    }

    /// Increments the specified counter by one.
    pub fn increment(&self, aspect: &str) {
        self.count(aspect, 1);
    }

    /// Decrements the specified counter by one.
    pub fn decrement(&self, aspect: &str) {
        self.count(aspect, -1);
    }

    /// Records the latest absolute value of the specified gauge.
    pub fn gauge<V: Into<GaugeValue>>(&self, aspect: &str, value: V) {
        self.submit_gauge(self.inner.formatter.gauge(aspect, value.into(), false));
    }

    /// Adjusts the value of the specified gauge by the given signed delta.
    pub fn gauge_delta<V: Into<GaugeValue>>(&self, aspect: &str, delta: V) {
        self.submit_gauge(self.inner.formatter.gauge(aspect, delta.into(), true));
    }

    /// Records an occurrence of the named event in the specified set.
    ///
    /// The server counts unique events between flushes.
    pub fn set(&self, aspect: &str, event_name: &str) {
        self.submit(self.inner.formatter.set(aspect, event_name));
    }

    /// Records a timing, in milliseconds, for the specified operation.
    pub fn time(&self, aspect: &str, millis: u64) {
        self.time_with_rate(aspect, millis, 1.0);
    }

    /// Records a timing, in milliseconds, for the specified operation, sampled at the given rate.
    pub fn time_with_rate(&self, aspect: &str, millis: u64, sample_rate: f64) {
        self.submit(self.inner.formatter.timer(aspect, millis, sample_rate));
    }

    /// Records a timing for the specified operation.
    ///
    /// The duration is truncated to whole milliseconds.
    pub fn time_duration(&self, aspect: &str, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.time(aspect, millis);
    }

    /// Records the time elapsed since `start_millis` for the specified operation.
    ///
    /// `start_millis` is a wall-clock time in milliseconds since the UNIX epoch. Start times in the future are recorded
    /// as zero.
    pub fn time_since(&self, aspect: &str, start_millis: u64) {
        self.time(aspect, current_time_millis().saturating_sub(start_millis));
    }

    /// Records a timing with a fractional number of milliseconds.
    pub(crate) fn time_float(&self, aspect: &str, millis: f64) {
        self.submit(self.inner.formatter.timer_float(aspect, millis));
    }

    /// Closes the client.
    ///
    /// Recording calls made after this are ignored. Metrics already queued are sent for up to the configured drain
    /// timeout, which bounds how long this call can block. Once it returns, no further queued metrics are sent, though
    /// a datagram that was already being written when the timeout expired may still complete.
    pub fn close(&self) {
        self.inner.dispatcher.close();
    }

    fn submit(&self, line: Result<WireLine, ClientError>) {
        match line {
            Ok(line) => self.inner.dispatcher.send(line),
            Err(e) => self.inner.dispatcher.report(e),
        }
    }

    fn submit_gauge(&self, lines: Result<GaugeLines, ClientError>) {
        match lines {
            Ok(GaugeLines::Single(line)) => self.inner.dispatcher.send(line),
            Ok(GaugeLines::Primed(reset, line)) => self.inner.dispatcher.send_pair(reset, line),
            Err(e) => self.inner.dispatcher.report(e),
        }
    }
}

/// Returns the current wall-clock time in milliseconds since the UNIX epoch.
///
/// This is the clock used by [`StatsdClient::time_since`].
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
