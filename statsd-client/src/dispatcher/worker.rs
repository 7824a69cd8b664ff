use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, trace};

use super::{transport::Transport, Command, Shared, State};
use crate::{error::ClientError, format::WireLine};

/// Background worker that drains the queue and sends each line as its own datagram.
pub(crate) struct Worker<T> {
    rx: Receiver<Command>,
    done_tx: Sender<()>,
    transport: T,
    shared: Arc<Shared>,
    max_payload_len: usize,
    drain_timeout: Duration,
    datagrams_sent: u64,
    datagrams_dropped: u64,
}

impl<T: Transport> Worker<T> {
    pub fn new(
        rx: Receiver<Command>,
        done_tx: Sender<()>,
        transport: T,
        shared: Arc<Shared>,
        max_payload_len: usize,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            rx,
            done_tx,
            transport,
            shared,
            max_payload_len,
            drain_timeout,
            datagrams_sent: 0,
            datagrams_dropped: 0,
        }
    }

    /// Runs the worker until the dispatcher is closed or dropped.
    pub fn run(mut self) {
        debug!(max_payload_len = self.max_payload_len, "Worker started.");

        loop {
            let cmd = match self.rx.recv() {
                Ok(Command::Shutdown) | Err(_) => break,
                Ok(cmd) => cmd,
            };

            if self.shared.state() == State::Closed {
                break;
            }

            self.process(cmd);
            self.report_queue_drops();
        }

        // Senders that raced with shutdown may still have enqueued lines, so give them a bounded chance to go out.
        let deadline = Instant::now() + self.drain_timeout;
        let mut drained = 0;
        while self.shared.state() != State::Closed && Instant::now() < deadline {
            match self.rx.try_recv() {
                Ok(Command::Shutdown) => {}
                Ok(cmd) => {
                    self.process(cmd);
                    drained += 1;
                }
                Err(_) => break,
            }
        }

        self.report_queue_drops();
        debug!(
            drained,
            datagrams_sent = self.datagrams_sent,
            datagrams_dropped = self.datagrams_dropped,
            "Worker stopped."
        );

        // Nobody is waiting on us if the dispatcher was dropped rather than closed.
        let _ = self.done_tx.send(());
    }

    fn process(&mut self, cmd: Command) {
        match cmd {
            Command::Send(line) => self.transmit(line),
            Command::SendPair(first, second) => {
                self.transmit(first);
                self.transmit(second);
            }
            Command::Report(error) => self.shared.report(&error),
            Command::Shutdown => {}
        }
    }

    fn transmit(&mut self, line: WireLine) {
        if self.shared.state() == State::Closed {
            self.datagrams_dropped += 1;
            return;
        }

        if line.len() > self.max_payload_len {
            self.datagrams_dropped += 1;
            self.shared.report(&ClientError::PayloadTooLarge { len: line.len(), max: self.max_payload_len });
            return;
        }

        match self.transport.send(&line.into_bytes()) {
            Ok(n) => {
                trace!(bytes = n, "Sent datagram.");
                self.datagrams_sent += 1;
            }
            Err(e) => {
                self.datagrams_dropped += 1;
                self.shared.report(&e);
            }
        }
    }

    fn report_queue_drops(&self) {
        let dropped = self.shared.take_dropped();
        if dropped > 0 {
            self.shared.report(&ClientError::QueueFull { dropped });
        }
    }
}
