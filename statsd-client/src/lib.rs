//! A non-blocking client for sending metrics to a [StatsD][statsd] server over UDP.
//!
//! [statsd]: https://github.com/statsd/statsd
//!
//! # Usage
//!
//! ```no_run
//! # use statsd_client::StatsdClientBuilder;
//! // Build a client, which resolves the server address, opens the socket, and starts the background worker.
//! let client = StatsdClientBuilder::default()
//!     .with_prefix("my.app")
//!     .with_remote_address("localhost", 8125)
//!     .with_error_handler(|e| eprintln!("failed to send metric: {e}"))
//!     .build()
//!     .expect("failed to build StatsD client");
//!
//! // Record metrics. None of these calls block on I/O, and none of them can fail.
//! client.increment("requests");
//! client.count_with_rate("bytes_in", 512, 0.1);
//! client.gauge("queue_depth", 17);
//! client.gauge_delta("connections", -1);
//! client.set("unique_users", "user-1234");
//! client.time("db.query", 42);
//!
//! // At shutdown, give queued metrics a (bounded) chance to be sent.
//! client.close();
//! ```
//!
//! The client can also be installed as the global [`metrics`] recorder with [`StatsdClientBuilder::install`].
//!
//! # Delivery
//!
//! Metrics are formatted on the calling thread, queued, and sent by a background worker, one datagram per metric. As
//! with StatsD itself, delivery is best effort: there are no acknowledgements and no retries, and datagrams may be
//! reordered or lost in transit.
//!
//! Once a client is built, nothing that goes wrong is reported to the code recording metrics. Invalid metrics,
//! oversized payloads, failed sends and dropped metrics are all passed to the error handler configured with
//! [`StatsdClientBuilder::with_error_handler`], on the background worker. By default, errors are ignored.
//!
//! ## Negative gauges
//!
//! A leading `-` on a gauge value tells the server to subtract from the current value, so a negative absolute value is
//! sent as two datagrams: a reset to zero, followed by the value. If only one of them arrives, or they arrive out of
//! order, the gauge is left at zero or at its previous value until the next update.
//!
//! # Executors
//!
//! By default, the background worker runs on a dedicated OS thread. Environments with their own scheduler can provide
//! one by implementing [`Executor`]. With the `tokio` feature enabled, [`TokioExecutor`] runs the worker on the blocking
//! thread pool of a Tokio runtime.
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::float_cmp)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::StatsdClientBuilder;

mod client;
pub use self::client::{current_time_millis, StatsdClient};

mod dispatcher;

mod error;
pub use self::error::{noop_handler, BuildError, ClientError, ErrorHandler};

pub mod executor;
#[cfg(feature = "tokio")]
pub use self::executor::TokioExecutor;
pub use self::executor::{Executor, ThreadExecutor};

mod format;
pub use self::format::{render_float, Formatter, GaugeLines, GaugeValue, MetricSample, MetricType, WireLine};

mod recorder;
pub use self::recorder::StatsdRecorder;
