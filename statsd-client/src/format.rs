use std::fmt;

use crate::error::ClientError;

/// Maximum number of fractional digits rendered for floating-point values.
const MAX_FRACTION_DIGITS: usize = 19;

/// Characters that would split an aspect into more than one field on the wire.
const RESERVED_ASPECT_CHARS: &[char] = &[':', '|', '@', '\n', '\r'];

/// Characters that would split a value into more than one field on the wire.
const RESERVED_VALUE_CHARS: &[char] = &['|', '\n', '\r'];

/// The type of a metric, as understood by the StatsD server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricType {
    /// A counter, adjusted by a delta.
    Counter,

    /// A gauge, either set to an absolute value or adjusted by a signed delta.
    Gauge,

    /// A timer, in milliseconds.
    Timer,

    /// A set, counting unique values between flushes.
    Set,
}

impl MetricType {
    /// Returns the type tag used on the wire for this metric type.
    pub const fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Gauge => "g",
            MetricType::Timer => "ms",
            MetricType::Set => "s",
        }
    }
}

/// A single metric observation about to be formatted.
#[derive(Clone, Copy, Debug)]
pub struct MetricSample<'a> {
    /// Dot-delimited metric name.
    pub aspect: &'a str,

    /// Pre-rendered value or event token.
    pub value: &'a str,

    /// Metric type.
    pub metric_type: MetricType,

    /// Fraction of events this sample represents, in `(0, 1]`.
    pub sample_rate: f64,
}

impl<'a> MetricSample<'a> {
    /// Creates a sample with a sample rate of `1.0`.
    pub const fn new(aspect: &'a str, value: &'a str, metric_type: MetricType) -> Self {
        Self { aspect, value, metric_type, sample_rate: 1.0 }
    }

    /// Sets the sample rate of this sample.
    #[must_use]
    pub const fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }
}

/// A fully-formatted metric line, ready to be sent as a single datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireLine(String);

impl WireLine {
    /// Returns the line as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the length of the line, in bytes.
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// Consumes the line, returning its UTF-8 encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0.into_bytes()
    }
}

impl fmt::Display for WireLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The lines produced for a single gauge observation.
///
/// Negative absolute values can't be expressed directly, since a leading `-` means "subtract" to the server. Those
/// are written as a reset to zero followed by the actual value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GaugeLines {
    /// A single line.
    Single(WireLine),

    /// A zero-reset line followed by the value line.
    Primed(WireLine, WireLine),
}

/// A numeric value recorded against a gauge.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GaugeValue {
    /// A signed integer value.
    Integer(i64),

    /// A floating-point value.
    FloatingPoint(f64),
}

impl GaugeValue {
    fn render(self) -> Result<String, ClientError> {
        match self {
            GaugeValue::Integer(v) => Ok(itoa::Buffer::new().format(v).to_owned()),
            GaugeValue::FloatingPoint(v) => render_float(v)
                .ok_or_else(|| ClientError::invalid_metric(format!("non-finite gauge value: {v}"))),
        }
    }
}

impl From<i64> for GaugeValue {
    fn from(value: i64) -> Self {
        GaugeValue::Integer(value)
    }
}

impl From<i32> for GaugeValue {
    fn from(value: i32) -> Self {
        GaugeValue::Integer(i64::from(value))
    }
}

impl From<u32> for GaugeValue {
    fn from(value: u32) -> Self {
        GaugeValue::Integer(i64::from(value))
    }
}

impl From<f64> for GaugeValue {
    fn from(value: f64) -> Self {
        GaugeValue::FloatingPoint(value)
    }
}

impl From<f32> for GaugeValue {
    fn from(value: f32) -> Self {
        GaugeValue::FloatingPoint(f64::from(value))
    }
}

/// Renders a floating-point value for the wire.
///
/// The output always uses `.` as the decimal separator, has no digit grouping, never uses scientific notation, and
/// carries at most 19 fractional digits with trailing zeros removed. Returns `None` for NaN and infinities, which
/// have no representation in the protocol.
pub fn render_float(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }

    // `Display` for floats is the shortest representation that round-trips and never switches to an exponent.
    let shortest = value.to_string();
    let fraction_len = shortest.split_once('.').map_or(0, |(_, fraction)| fraction.len());
    let rendered = if fraction_len <= MAX_FRACTION_DIGITS {
        shortest
    } else {
        let rounded = format!("{:.*}", MAX_FRACTION_DIGITS, value);
        rounded.trim_end_matches('0').trim_end_matches('.').to_owned()
    };

    // Negative zero, and negatives too small to survive rounding, would otherwise read as a delta on the wire.
    if rendered == "-0" {
        return Some("0".to_owned());
    }

    Some(rendered)
}

/// Formats metric observations into wire lines.
///
/// The formatter holds the normalized key prefix and is otherwise stateless: every call produces fresh lines, and no
/// call ever panics. Inputs that would produce a malformed line are rejected with [`ClientError::InvalidMetric`].
#[derive(Clone, Debug, Default)]
pub struct Formatter {
    prefix: String,
}

impl Formatter {
    /// Creates a new `Formatter` with the given key prefix.
    ///
    /// The prefix is trimmed, and if non-empty, has a `.` appended so that it joins cleanly with aspects.
    pub fn new(prefix: Option<&str>) -> Self {
        let prefix = match prefix.map(str::trim) {
            None | Some("") => String::new(),
            Some(prefix) => format!("{prefix}."),
        };

        Self { prefix }
    }

    /// Returns the normalized prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Formats a single sample into a wire line.
    ///
    /// # Errors
    ///
    /// If the aspect or value contain characters reserved by the protocol, or the sample rate is outside of `(0, 1]`,
    /// an error is returned.
    pub fn format(&self, sample: &MetricSample<'_>) -> Result<WireLine, ClientError> {
        validate_aspect(sample.aspect)?;
        validate_value(sample.value)?;

        // Write the sample rate only if it's not 1.0, as that is the implied default.
        let rate = if sample.sample_rate == 1.0 {
            None
        } else if sample.sample_rate > 0.0 && sample.sample_rate < 1.0 {
            render_float(sample.sample_rate)
        } else {
            return Err(ClientError::invalid_metric(format!(
                "sample rate must be in (0, 1], got {}",
                sample.sample_rate
            )));
        };

        let type_tag = sample.metric_type.as_str();
        let mut line = String::with_capacity(
            self.prefix.len() + sample.aspect.len() + sample.value.len() + type_tag.len() + 2,
        );
        line.push_str(&self.prefix);
        line.push_str(sample.aspect);
        line.push(':');
        line.push_str(sample.value);
        line.push('|');
        line.push_str(type_tag);

        if let Some(rate) = rate {
            line.push_str("|@");
            line.push_str(&rate);
        }

        Ok(WireLine(line))
    }

    /// Formats a counter adjustment.
    ///
    /// # Errors
    ///
    /// See [`Formatter::format`].
    pub fn counter(&self, aspect: &str, delta: i64, sample_rate: f64) -> Result<WireLine, ClientError> {
        let mut buf = itoa::Buffer::new();
        let value = buf.format(delta);
        self.format(&MetricSample::new(aspect, value, MetricType::Counter).with_sample_rate(sample_rate))
    }

    /// Formats a timing, in milliseconds.
    ///
    /// # Errors
    ///
    /// See [`Formatter::format`].
    pub fn timer(&self, aspect: &str, millis: u64, sample_rate: f64) -> Result<WireLine, ClientError> {
        let mut buf = itoa::Buffer::new();
        let value = buf.format(millis);
        self.format(&MetricSample::new(aspect, value, MetricType::Timer).with_sample_rate(sample_rate))
    }

    /// Formats a timing with a fractional number of milliseconds.
    ///
    /// # Errors
    ///
    /// If the value is not finite, or see [`Formatter::format`].
    pub fn timer_float(&self, aspect: &str, millis: f64) -> Result<WireLine, ClientError> {
        let value = render_float(millis)
            .ok_or_else(|| ClientError::invalid_metric(format!("non-finite timer value: {millis}")))?;
        self.format(&MetricSample::new(aspect, &value, MetricType::Timer))
    }

    /// Formats a set event.
    ///
    /// # Errors
    ///
    /// See [`Formatter::format`].
    pub fn set(&self, aspect: &str, event_name: &str) -> Result<WireLine, ClientError> {
        self.format(&MetricSample::new(aspect, event_name, MetricType::Set))
    }

    /// Formats a gauge observation.
    ///
    /// When `delta` is `false`, the value replaces the gauge's current value, and negative values are primed with a
    /// reset to zero. When `delta` is `true`, the value adjusts the gauge, and non-negative values are prefixed with `+`
    /// so that the server does not mistake them for absolute values.
    ///
    /// # Errors
    ///
    /// If the value is not finite, or see [`Formatter::format`].
    pub fn gauge(&self, aspect: &str, value: GaugeValue, delta: bool) -> Result<GaugeLines, ClientError> {
        // The sign is taken from the rendered value, so that whatever renders as zero is never treated as negative.
        let mut rendered = value.render()?;
        let negative = rendered.starts_with('-');
        if delta && !negative {
            rendered.insert(0, '+');
        }

        let line = self.format(&MetricSample::new(aspect, &rendered, MetricType::Gauge))?;
        if !delta && negative {
            let reset = self.format(&MetricSample::new(aspect, "0", MetricType::Gauge))?;
            Ok(GaugeLines::Primed(reset, line))
        } else {
            Ok(GaugeLines::Single(line))
        }
    }
}

fn validate_aspect(aspect: &str) -> Result<(), ClientError> {
    if aspect.is_empty() {
        return Err(ClientError::invalid_metric("aspect must not be empty"));
    }

    if aspect.contains(RESERVED_ASPECT_CHARS) {
        return Err(ClientError::invalid_metric(format!(
            "aspect '{}' contains a reserved character",
            aspect.escape_debug()
        )));
    }

    Ok(())
}

fn validate_value(value: &str) -> Result<(), ClientError> {
    if value.is_empty() {
        return Err(ClientError::invalid_metric("value must not be empty"));
    }

    if value.contains(RESERVED_VALUE_CHARS) {
        return Err(ClientError::invalid_metric(format!(
            "value '{}' contains a reserved character",
            value.escape_debug()
        )));
    }

    Ok(())
}
