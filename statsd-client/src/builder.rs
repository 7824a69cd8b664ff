use std::{
    net::{SocketAddr, ToSocketAddrs as _},
    sync::Arc,
    time::Duration,
};

use tracing::debug;

use crate::{
    client::StatsdClient,
    dispatcher::{
        transport::{UdpConfiguration, UdpTransport},
        Dispatcher, DispatcherConfiguration,
    },
    error::{noop_handler, BuildError, ClientError, ErrorHandler},
    executor::{Executor, ThreadExecutor},
    format::Formatter,
    recorder::StatsdRecorder,
};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8125;
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_PAYLOAD_LEN: usize = 1432;
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Builder for a [`StatsdClient`].
pub struct StatsdClientBuilder {
    prefix: Option<String>,
    host: String,
    port: u16,
    write_timeout: Duration,
    max_payload_len: usize,
    queue_capacity: Option<usize>,
    drain_timeout: Duration,
    error_handler: ErrorHandler,
    executor: Box<dyn Executor>,
}

impl StatsdClientBuilder {
    /// Set the prefix applied to every metric name.
    ///
    /// The prefix is trimmed of whitespace, and joined to metric names with a `.`. An empty prefix is the same as no
    /// prefix.
    ///
    /// Defaults to no prefix.
    #[must_use]
    pub fn with_prefix<P>(mut self, prefix: P) -> Self
    where
        P: Into<String>,
    {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the host and port of the StatsD server.
    ///
    /// The host can be an IP address or a hostname. It is resolved once, when the client is built.
    ///
    /// Defaults to `127.0.0.1:8125`.
    #[must_use]
    pub fn with_remote_address<H>(mut self, host: H, port: u16) -> Self
    where
        H: Into<String>,
    {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set the write timeout for sending datagrams.
    ///
    /// A zero timeout disables the timeout entirely.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the maximum payload length for a single datagram.
    ///
    /// Metrics that format to more than this many bytes are dropped, and reported to the error handler, rather than
    /// risking a fragmented datagram that the server can't reassemble.
    ///
    /// Defaults to 1432 bytes, which fits in a single packet on most networks.
    #[must_use]
    pub fn with_maximum_payload_length(mut self, max_payload_len: usize) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }

    /// Set the capacity of the queue between callers and the background worker.
    ///
    /// When the queue is full, new metrics are dropped, and the number dropped is reported to the error handler. `None`
    /// leaves the queue unbounded.
    ///
    /// Defaults to `None`.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set how long [`StatsdClient::close`] waits for queued metrics to be sent.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the handler invoked with every error that occurs after the client is built.
    ///
    /// The handler runs on the background worker, never on the thread recording the metric.
    ///
    /// Defaults to a handler that ignores all errors.
    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Set the executor used to run the background worker.
    ///
    /// Defaults to [`ThreadExecutor`], which runs the worker on a dedicated OS thread.
    #[must_use]
    pub fn with_executor<E>(mut self, executor: E) -> Self
    where
        E: Executor + 'static,
    {
        self.executor = Box::new(executor);
        self
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>, BuildError> {
        if self.port == 0 {
            return Err(BuildError::InvalidPort);
        }

        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| BuildError::InvalidRemoteAddress { reason: e.to_string() })?
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(BuildError::InvalidRemoteAddress {
                reason: format!("'{}' did not resolve to any addresses", self.host),
            });
        }

        Ok(addrs)
    }

    /// Builds the client.
    ///
    /// The remote address is resolved, a local socket is bound and connected to it, and the background worker is
    /// spawned.
    ///
    /// # Errors
    ///
    /// If the port is zero, the host cannot be resolved, the socket cannot be opened, or the executor fails to spawn
    /// the worker, an error is returned.
    pub fn build(self) -> Result<StatsdClient, BuildError> {
        let remote_addrs = self.resolve()?;

        let udp_config = UdpConfiguration {
            remote_addrs,
            write_timeout: Some(self.write_timeout).filter(|timeout| !timeout.is_zero()),
        };
        let transport = UdpTransport::open(udp_config).map_err(|source| BuildError::Bind { source })?;

        let dispatcher_config = DispatcherConfiguration {
            max_payload_len: self.max_payload_len,
            queue_capacity: self.queue_capacity,
            drain_timeout: self.drain_timeout,
            error_handler: self.error_handler,
        };
        let dispatcher = Dispatcher::spawn(dispatcher_config, transport, &*self.executor)
            .map_err(|source| BuildError::Backend { source })?;

        let formatter = Formatter::new(self.prefix.as_deref());
        debug!(host = %self.host, port = self.port, prefix = formatter.prefix(), "Built StatsD client.");

        Ok(StatsdClient::new(formatter, dispatcher))
    }

    /// Builds the client and installs it as the global [`metrics`] recorder.
    ///
    /// The returned client shares its background worker with the installed recorder, and can be used to record metrics
    /// directly, or to close the worker at shutdown.
    ///
    /// # Errors
    ///
    /// If the client fails to build, or if a global recorder is already installed, an error will be returned.
    pub fn install(self) -> Result<StatsdClient, BuildError> {
        let client = self.build()?;
        let recorder = StatsdRecorder::new(client.clone());

        metrics::set_global_recorder(recorder).map_err(|_| BuildError::FailedToInstall)?;
        Ok(client)
    }
}

impl Default for StatsdClientBuilder {
    fn default() -> Self {
        StatsdClientBuilder {
            prefix: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            queue_capacity: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            error_handler: noop_handler(),
            executor: Box::new(ThreadExecutor),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::StatsdClientBuilder;
    use crate::{
        error::BuildError,
        executor::{Executor, Task},
    };

    struct FailingExecutor;

    impl Executor for FailingExecutor {
        fn spawn(&self, _: &str, _: Task) -> io::Result<()> {
            Err(io::Error::other("no threads left"))
        }
    }

    #[test]
    fn zero_port() {
        let result = StatsdClientBuilder::default().with_remote_address("127.0.0.1", 0).build();
        assert!(matches!(result, Err(BuildError::InvalidPort)));
    }

    #[test]
    fn unresolvable_host() {
        let result = StatsdClientBuilder::default().with_remote_address("not a valid host name", 8125).build();
        assert!(matches!(result, Err(BuildError::InvalidRemoteAddress { .. })));
    }

    #[test]
    fn executor_failure() {
        let result = StatsdClientBuilder::default().with_executor(FailingExecutor).build();
        assert!(matches!(result, Err(BuildError::Backend { .. })));
    }

    #[test]
    fn prefix_is_normalized() {
        let client = StatsdClientBuilder::default().with_prefix("  my.app  ").build().unwrap();
        assert_eq!(client.prefix(), "my.app.");
        client.close();

        let client = StatsdClientBuilder::default().with_prefix(" ").build().unwrap();
        assert_eq!(client.prefix(), "");
        client.close();
    }
}
