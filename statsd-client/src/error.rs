use std::{io, sync::Arc};

use thiserror::Error;

/// Errors that could occur while building a StatsD client, or installing it as the global recorder.
///
/// These are the only errors surfaced directly to the caller: once a client has been built, every failure is routed
/// to its [`ErrorHandler`] instead.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The remote port was zero.
    #[error("invalid remote port: port must be in 1..=65535")]
    InvalidPort,

    /// Failed to resolve the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the resolution failure.
        reason: String,
    },

    /// Failed to bind or connect the local UDP socket.
    #[error("failed to open socket to remote address")]
    Bind {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The executor failed to start the background worker.
    #[error("failed to spawn background worker for client")]
    Backend {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to install the recorder due to an existing global recorder already being installed.
    #[error("failed to install client as global recorder")]
    FailedToInstall,
}

/// Errors that occur while recording or transmitting metrics.
///
/// These are never returned to the code recording a metric. Instead, they are passed to the client's
/// [`ErrorHandler`], on the background worker.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The metric could not be formatted into a valid line.
    #[error("invalid metric: {reason}")]
    InvalidMetric {
        /// Details about why the metric was rejected.
        reason: String,
    },

    /// The formatted line was larger than the maximum payload length, and was dropped.
    #[error("payload of {len} bytes exceeds maximum payload length of {max} bytes")]
    PayloadTooLarge {
        /// Length of the dropped payload, in bytes.
        len: usize,

        /// Configured maximum payload length, in bytes.
        max: usize,
    },

    /// Sending a datagram failed, and the datagram was dropped.
    #[error("failed to send datagram")]
    Transmit {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Re-establishing the socket after a failed send did not succeed, and the datagram was dropped.
    #[error("failed to reopen socket to remote address")]
    Reconnect {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The bounded queue was full, and lines were dropped.
    #[error("queue full: {dropped} lines dropped")]
    QueueFull {
        /// Number of lines dropped since the last report.
        dropped: u64,
    },
}

impl ClientError {
    pub(crate) fn invalid_metric<S: Into<String>>(reason: S) -> Self {
        ClientError::InvalidMetric { reason: reason.into() }
    }
}

/// Callback invoked with every error encountered after the client was built.
pub type ErrorHandler = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// Returns an error handler that ignores all errors.
pub fn noop_handler() -> ErrorHandler {
    Arc::new(|_: &ClientError| {})
}
