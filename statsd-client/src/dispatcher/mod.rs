use std::{
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, error, trace};

use crate::{
    error::{ClientError, ErrorHandler},
    executor::Executor,
    format::WireLine,
};

pub(crate) mod transport;
mod worker;

use self::{transport::Transport, worker::Worker};

const WORKER_NAME: &str = "statsd-client-worker";

/// Work handed from callers to the background worker.
pub(crate) enum Command {
    /// Send a single line.
    Send(WireLine),

    /// Send two lines, back to back.
    SendPair(WireLine, WireLine),

    /// Pass an error to the error handler.
    Report(ClientError),

    /// Stop accepting work and drain.
    Shutdown,
}

/// Dispatcher lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum State {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => State::Open,
            1 => State::Closing,
            _ => State::Closed,
        }
    }
}

/// State shared between the dispatcher handle and its worker.
pub(crate) struct Shared {
    state: AtomicU8,
    dropped: AtomicU64,
    error_handler: ErrorHandler,
}

impl Shared {
    fn new(error_handler: ErrorHandler) -> Self {
        Self { state: AtomicU8::new(State::Open as u8), dropped: AtomicU64::new(0), error_handler }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: State, to: State) -> bool {
        self.state.compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    fn track_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes the number of lines dropped because the queue was full, resetting it to zero.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::AcqRel)
    }

    /// Passes the error to the error handler.
    ///
    /// A panicking handler is contained here, so that it can't take the worker down with it.
    pub fn report(&self, error: &ClientError) {
        debug!(%error, "Reporting client error.");

        let handler = &self.error_handler;
        if catch_unwind(AssertUnwindSafe(|| handler(error))).is_err() {
            error!(%error, "Error handler panicked while handling client error.");
        }
    }
}

/// Dispatcher configuration.
#[derive(Clone)]
pub(crate) struct DispatcherConfiguration {
    pub max_payload_len: usize,
    pub queue_capacity: Option<usize>,
    pub drain_timeout: Duration,
    pub error_handler: ErrorHandler,
}

/// Queues formatted lines and hands them to a background worker for delivery.
///
/// Every method is non-blocking except [`Dispatcher::close`], which waits a bounded amount of time for the worker to
/// drain. None of them fail: problems are passed to the error handler by the worker.
pub(crate) struct Dispatcher {
    tx: Sender<Command>,
    done_rx: Receiver<()>,
    shared: Arc<Shared>,
    drain_timeout: Duration,
}

impl Dispatcher {
    /// Creates a new `Dispatcher`, spawning its worker on the given executor.
    ///
    /// # Errors
    ///
    /// If the executor fails to spawn the worker, an error is returned.
    pub fn spawn<T, E>(config: DispatcherConfiguration, transport: T, executor: &E) -> io::Result<Self>
    where
        T: Transport,
        E: Executor + ?Sized,
    {
        let (tx, rx) = match config.queue_capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        let (done_tx, done_rx) = bounded(1);
        let shared = Arc::new(Shared::new(config.error_handler));

        let worker = Worker::new(
            rx,
            done_tx,
            transport,
            Arc::clone(&shared),
            config.max_payload_len,
            config.drain_timeout,
        );
        executor.spawn(WORKER_NAME, Box::new(move || worker.run()))?;

        Ok(Self { tx, done_rx, shared, drain_timeout: config.drain_timeout })
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> State {
        self.shared.state()
    }

    /// Queues a single line.
    pub fn send(&self, line: WireLine) {
        self.enqueue(Command::Send(line));
    }

    /// Queues two lines as one unit, so that they are sent back to back.
    pub fn send_pair(&self, first: WireLine, second: WireLine) {
        self.enqueue(Command::SendPair(first, second));
    }

    /// Queues an error to be passed to the error handler.
    pub fn report(&self, error: ClientError) {
        self.enqueue(Command::Report(error));
    }

    fn enqueue(&self, cmd: Command) {
        if self.shared.state() != State::Open {
            trace!("Dispatcher is closed. Ignoring.");
            return;
        }

        match self.tx.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.shared.track_dropped(),
            Err(TrySendError::Disconnected(_)) => trace!("Worker has stopped. Ignoring."),
        }
    }

    /// Closes the dispatcher.
    ///
    /// New lines are rejected immediately. Lines already queued are sent for up to the drain timeout, after which the
    /// worker stops taking lines off the queue. A datagram the worker is already writing when the timeout expires may
    /// still go out after this returns. Calling `close` more than once has no further effect.
    pub fn close(&self) {
        if !self.shared.transition(State::Open, State::Closing) {
            return;
        }

        debug!(drain_timeout = ?self.drain_timeout, "Closing dispatcher.");
        let deadline = Instant::now() + self.drain_timeout;
        if self.tx.send_deadline(Command::Shutdown, deadline).is_ok() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.done_rx.recv_timeout(remaining) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => debug!("Worker finished draining."),
                Err(RecvTimeoutError::Timeout) => debug!("Worker did not finish draining before the timeout."),
            }
        }

        self.shared.set_state(State::Closed);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Dropping the sender disconnects the queue, which stops the worker once it has sent what was queued.
        if self.shared.transition(State::Open, State::Closing) {
            debug!("Dispatcher dropped without being closed.");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
        thread,
        time::{Duration, Instant},
    };

    use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

    use super::{transport::Transport, Dispatcher, DispatcherConfiguration, State};
    use crate::{
        error::{ClientError, ErrorHandler},
        executor::ThreadExecutor,
        format::Formatter,
    };

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    struct MockTransport {
        tx: Sender<String>,
        fail_on: Option<&'static str>,
        gate: Option<Receiver<()>>,
    }

    impl Transport for MockTransport {
        fn send(&mut self, payload: &[u8]) -> Result<usize, ClientError> {
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }

            let payload = String::from_utf8(payload.to_vec()).unwrap();
            if self.fail_on == Some(payload.as_str()) {
                return Err(ClientError::Transmit { source: io::Error::other("destination unreachable") });
            }

            let _ = self.tx.send(payload);
            Ok(0)
        }
    }

    fn mock_transport() -> (MockTransport, Receiver<String>) {
        let (tx, rx) = unbounded();
        (MockTransport { tx, fail_on: None, gate: None }, rx)
    }

    fn recording_handler() -> (ErrorHandler, Arc<Mutex<Vec<String>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors2 = Arc::clone(&errors);
        let handler: ErrorHandler = Arc::new(move |e: &ClientError| errors2.lock().unwrap().push(e.to_string()));
        (handler, errors)
    }

    fn config(error_handler: ErrorHandler) -> DispatcherConfiguration {
        DispatcherConfiguration {
            max_payload_len: 64,
            queue_capacity: None,
            drain_timeout: Duration::from_secs(1),
            error_handler,
        }
    }

    fn line(s: &str) -> crate::format::WireLine {
        Formatter::new(None).set("line", s).unwrap()
    }

    #[test]
    fn sends_lines_in_order() {
        let (transport, rx) = mock_transport();
        let (handler, errors) = recording_handler();
        let dispatcher = Dispatcher::spawn(config(handler), transport, &ThreadExecutor).unwrap();

        dispatcher.send(line("a"));
        dispatcher.send_pair(line("b"), line("c"));
        dispatcher.send(line("d"));

        let received = (0..4).map(|_| rx.recv_timeout(RECV_TIMEOUT).unwrap()).collect::<Vec<_>>();
        assert_eq!(received, ["line:a|s", "line:b|s", "line:c|s", "line:d|s"]);

        dispatcher.close();
        assert!(errors.lock().unwrap().is_empty());
    }

    #[test]
    fn oversized_lines_are_dropped_and_reported() {
        let (transport, rx) = mock_transport();
        let (handler, errors) = recording_handler();
        let dispatcher = Dispatcher::spawn(config(handler), transport, &ThreadExecutor).unwrap();

        dispatcher.send(line(&"x".repeat(100)));
        dispatcher.send(line("small"));

        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), "line:small|s");
        dispatcher.close();

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("exceeds maximum payload length of 64 bytes"), "{}", errors[0]);
    }

    #[test]
    fn transmit_failures_are_reported_and_dispatch_continues() {
        let (mut transport, rx) = mock_transport();
        transport.fail_on = Some("line:bad|s");
        let (handler, errors) = recording_handler();
        let dispatcher = Dispatcher::spawn(config(handler), transport, &ThreadExecutor).unwrap();

        dispatcher.send(line("bad"));
        dispatcher.send(line("good"));

        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), "line:good|s");
        dispatcher.close();

        assert_eq!(*errors.lock().unwrap(), ["failed to send datagram"]);
    }

    #[test]
    fn reports_run_on_the_worker() {
        let (transport, _rx) = mock_transport();
        let (tx, rx) = unbounded();
        let handler: ErrorHandler = Arc::new(move |_: &ClientError| {
            let _ = tx.send(thread::current().name().map(str::to_string));
        });
        let dispatcher = Dispatcher::spawn(config(handler), transport, &ThreadExecutor).unwrap();

        dispatcher.report(ClientError::invalid_metric("bad"));

        let thread_name = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(thread_name.as_deref(), Some("statsd-client-worker"));
        dispatcher.close();
    }

    #[test]
    fn panicking_handler_does_not_stop_the_worker() {
        let (transport, rx) = mock_transport();
        let handler: ErrorHandler = Arc::new(|_: &ClientError| panic!("handler exploded"));
        let dispatcher = Dispatcher::spawn(config(handler), transport, &ThreadExecutor).unwrap();

        dispatcher.report(ClientError::invalid_metric("bad"));
        dispatcher.send(line("after"));

        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), "line:after|s");
        dispatcher.close();
    }

    #[test]
    fn close_drains_then_ignores_sends() {
        let (transport, rx) = mock_transport();
        let (handler, errors) = recording_handler();
        let dispatcher = Dispatcher::spawn(config(handler), transport, &ThreadExecutor).unwrap();

        for i in 0..10 {
            dispatcher.send(line(&i.to_string()));
        }

        dispatcher.close();
        assert_eq!(dispatcher.state(), State::Closed);
        assert_eq!(rx.try_iter().count(), 10);

        dispatcher.send(line("late"));
        dispatcher.report(ClientError::invalid_metric("late"));
        dispatcher.close();

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(errors.lock().unwrap().is_empty());
    }

    #[test]
    fn close_gives_up_on_a_stuck_worker_after_the_drain_timeout() {
        let (mut transport, rx) = mock_transport();
        let (gate_tx, gate_rx) = unbounded();
        transport.gate = Some(gate_rx);

        let mut config = config(crate::error::noop_handler());
        config.drain_timeout = Duration::from_millis(200);
        let dispatcher = Dispatcher::spawn(config, transport, &ThreadExecutor).unwrap();

        // The worker picks up the first line and blocks on the gate, leaving the rest queued behind it.
        dispatcher.send(line("0"));
        thread::sleep(Duration::from_millis(100));
        dispatcher.send(line("1"));
        dispatcher.send(line("2"));

        let start = Instant::now();
        dispatcher.close();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(150), "close returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "close was not bounded: {elapsed:?}");
        assert_eq!(dispatcher.state(), State::Closed);

        // Only the line that was already being written goes out once the transport unblocks.
        for _ in 0..3 {
            gate_tx.send(()).unwrap();
        }
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), "line:0|s");
        assert!(matches!(rx.recv_timeout(RECV_TIMEOUT), Err(RecvTimeoutError::Disconnected)));
    }

    #[test]
    fn full_queue_drops_are_counted_and_reported() {
        let (mut transport, _rx) = mock_transport();
        let (gate_tx, gate_rx) = unbounded();
        transport.gate = Some(gate_rx);

        let (handler, errors) = recording_handler();
        let mut config = config(handler);
        config.queue_capacity = Some(1);
        let dispatcher = Dispatcher::spawn(config, transport, &ThreadExecutor).unwrap();

        // The first line gets picked up by the worker, which then blocks on the gate. The second fills the queue, and
        // everything after that is dropped.
        dispatcher.send(line("0"));
        thread::sleep(Duration::from_millis(100));
        for i in 1..5 {
            dispatcher.send(line(&i.to_string()));
        }

        for _ in 0..5 {
            gate_tx.send(()).unwrap();
        }
        dispatcher.close();

        assert_eq!(*errors.lock().unwrap(), ["queue full: 3 lines dropped"]);
    }

    #[test]
    fn concurrent_senders_lose_nothing() {
        const SENDERS: usize = 8;
        const LINES_PER_SENDER: usize = 500;

        let (transport, rx) = mock_transport();
        let (handler, errors) = recording_handler();
        let dispatcher = Arc::new(Dispatcher::spawn(config(handler), transport, &ThreadExecutor).unwrap());

        let handles = (0..SENDERS)
            .map(|sender| {
                let dispatcher = Arc::clone(&dispatcher);
                thread::spawn(move || {
                    for i in 0..LINES_PER_SENDER {
                        dispatcher.send(line(&format!("{sender}-{i}")));
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut received =
            (0..SENDERS * LINES_PER_SENDER).map(|_| rx.recv_timeout(RECV_TIMEOUT).unwrap()).collect::<Vec<_>>();
        received.sort();
        received.dedup();
        assert_eq!(received.len(), SENDERS * LINES_PER_SENDER);

        dispatcher.close();
        assert!(errors.lock().unwrap().is_empty());
    }

    #[test]
    fn dropping_stops_the_worker() {
        let (transport, rx) = mock_transport();
        let dispatcher =
            Dispatcher::spawn(config(crate::error::noop_handler()), transport, &ThreadExecutor).unwrap();

        dispatcher.send(line("last"));
        drop(dispatcher);

        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), "line:last|s");

        // Once the worker exits, the transport (and its sender) is dropped.
        assert!(matches!(rx.recv_timeout(RECV_TIMEOUT), Err(RecvTimeoutError::Disconnected)));
    }
}
