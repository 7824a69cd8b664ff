//! Background executors for running the client's worker.
use std::io;

/// A unit of work run in the background for the lifetime of a client.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs the client's worker somewhere other than the calling thread.
///
/// The worker is a long-lived, blocking loop: it returns once the client has been closed, or all client handles have
/// been dropped. Implementations only need to get it running; shutdown is signalled to the worker directly.
pub trait Executor {
    /// Spawns the given task in the background.
    ///
    /// # Errors
    ///
    /// If the task could not be spawned, an error is returned and the client will fail to build.
    fn spawn(&self, name: &str, task: Task) -> io::Result<()>;
}

/// Runs the worker on a dedicated, named OS thread.
///
/// This is the default executor.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn spawn(&self, name: &str, task: Task) -> io::Result<()> {
        std::thread::Builder::new().name(name.to_string()).spawn(task).map(|_| ())
    }
}

/// Runs the worker on the blocking thread pool of a Tokio runtime.
#[cfg(feature = "tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
#[derive(Clone, Debug)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio")]
impl TokioExecutor {
    /// Creates a `TokioExecutor` that spawns onto the given runtime.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a `TokioExecutor` that spawns onto the current runtime.
    ///
    /// # Errors
    ///
    /// If called outside of the context of a Tokio runtime, an error is returned.
    pub fn current() -> io::Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(io::Error::other)
    }
}

#[cfg(feature = "tokio")]
impl Executor for TokioExecutor {
    fn spawn(&self, name: &str, task: Task) -> io::Result<()> {
        tracing::debug!(worker = name, "Spawning worker on Tokio blocking pool.");
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }
}
