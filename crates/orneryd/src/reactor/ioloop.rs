//! The poll loop.

use std::io;
use std::net::SocketAddr;
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use camino::Utf8PathBuf;
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, warn};

use crate::registry::ListenerSpec;

use super::errors::ReactorError;
use super::listener::BoundListener;
use super::workers::{WorkerGauge, WorkerSet};
use super::REACTOR_TARGET;

/// Poll timeout. Bounded so the loop revisits the shutdown flag and the
/// completion channel even when no client ever connects.
const POLL_TIMEOUT_MS: u16 = 500;

/// One reactor: the full set of bound listeners plus the workers serving
/// their connections.
///
/// Binding happens eagerly in [`Reactor::bind`], before the loop starts, so
/// a misconfigured listener fails the whole fixture up front.
pub struct Reactor {
    listeners: Vec<BoundListener>,
    workers: WorkerSet,
    log_socket: Utf8PathBuf,
    shutdown: Arc<AtomicBool>,
}

impl Reactor {
    /// Binds every spec in order. The first failure aborts the whole bind;
    /// already-bound listeners are released by drop.
    pub fn bind(
        specs: Vec<ListenerSpec>,
        log_socket: Utf8PathBuf,
    ) -> Result<Self, ReactorError> {
        let listeners = specs
            .into_iter()
            .map(BoundListener::bind)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            listeners,
            workers: WorkerSet::new(),
            log_socket,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Local address of the listener at `index`, for TCP listeners bound to
    /// an ephemeral port.
    #[must_use]
    pub fn local_addr(&self, index: usize) -> Option<SocketAddr> {
        self.listeners.get(index).and_then(BoundListener::local_addr)
    }

    /// Gauge counting live workers.
    #[must_use]
    pub fn worker_gauge(&self) -> WorkerGauge {
        self.workers.gauge()
    }

    /// Runs the loop on the calling thread until shutdown is requested.
    pub fn run(mut self) -> Result<(), ReactorError> {
        let result = self.run_loop();
        // Collect whatever finished; workers still serving (a black hole
        // mid-sleep, say) are left to the process exit.
        self.workers.reap();
        result
    }

    /// Runs the loop on a dedicated thread and returns a handle that can
    /// request shutdown and join the thread.
    pub fn start(self) -> Result<ReactorHandle, ReactorError> {
        let shutdown = Arc::clone(&self.shutdown);
        let gauge = self.workers.gauge();
        let join = thread::Builder::new()
            .name("reactor".to_owned())
            .spawn(move || self.run())
            .map_err(|source| ReactorError::Spawn { source })?;
        Ok(ReactorHandle {
            shutdown,
            gauge,
            join: Some(join),
        })
    }

    fn run_loop(&mut self) -> Result<(), ReactorError> {
        debug!(
            target: REACTOR_TARGET,
            listeners = self.listeners.len(),
            "reactor loop starting"
        );
        while !self.shutdown.load(Ordering::SeqCst) {
            self.workers.reap();

            let mut fds: Vec<PollFd> = self
                .listeners
                .iter()
                .map(|listener| PollFd::new(listener.as_fd(), PollFlags::POLLIN))
                .collect();
            let ready = match poll(&mut fds, PollTimeout::from(POLL_TIMEOUT_MS)) {
                Ok(0) => continue,
                Ok(ready) => ready,
                // Signals land here; the loop condition decides what next.
                Err(Errno::EINTR) => continue,
                Err(source) => return Err(ReactorError::Poll { source }),
            };
            debug!(target: REACTOR_TARGET, ready, "listeners ready");

            let ready_indices: Vec<usize> = fds
                .iter()
                .enumerate()
                .filter(|(_, fd)| {
                    fd.revents()
                        .is_some_and(|revents| revents.contains(PollFlags::POLLIN))
                })
                .map(|(index, _)| index)
                .collect();
            drop(fds);

            for index in ready_indices {
                self.service(index)?;
            }
        }
        debug!(target: REACTOR_TARGET, "reactor loop stopping");
        Ok(())
    }

    /// Accepts from the listener at `index` and dispatches the connection.
    /// Accept-queue emptiness and interruptions are routine; anything else
    /// on the listening socket is fatal.
    fn service(&mut self, index: usize) -> Result<(), ReactorError> {
        let Some(listener) = self.listeners.get(index) else {
            return Ok(());
        };
        match listener.accept() {
            Ok(Some(connection)) => {
                let peer = connection.peer.clone();
                if let Err(error) =
                    self.workers
                        .spawn(listener.spec(), connection, &self.log_socket)
                {
                    // Dropping the connection closed it; the peer sees a
                    // refused exchange rather than a wedged one.
                    warn!(
                        target: REACTOR_TARGET,
                        listener = %listener.spec().name,
                        peer = %peer,
                        error = %error,
                        "failed to spawn worker"
                    );
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(source) => Err(ReactorError::Accept {
                listener: listener.spec().name.clone(),
                source,
            }),
        }
    }
}

/// Control handle for a reactor running on its own thread.
///
/// Dropping the handle requests shutdown but does not wait for it.
pub struct ReactorHandle {
    shutdown: Arc<AtomicBool>,
    gauge: WorkerGauge,
    join: Option<JoinHandle<Result<(), ReactorError>>>,
}

impl ReactorHandle {
    /// Asks the loop to stop. It notices within one poll timeout.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Gauge counting live workers.
    #[must_use]
    pub fn gauge(&self) -> WorkerGauge {
        self.gauge.clone()
    }

    /// Waits for the loop to stop and reports how it ended.
    pub fn join(mut self) -> Result<(), ReactorError> {
        match self.join.take() {
            Some(handle) => handle.join().map_err(|_| ReactorError::ThreadPanic)?,
            None => Ok(()),
        }
    }
}

impl Drop for ReactorHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
