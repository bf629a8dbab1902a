//! Worker lifecycle: spawn, serve, reap.
//!
//! Each accepted connection runs its handler on a dedicated thread. The
//! thread announces completion over a channel rather than being watched; the
//! loop drains that channel once per iteration and joins whatever finished.
//! The completion ticket sends from `Drop`, so a panicking handler is reaped
//! the same way as one that returns.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use ornery_config::ArgValue;

use crate::handlers::{Connection, HandlerFactory};
use crate::logwire::WorkerLog;
use crate::registry::ListenerSpec;

use super::REACTOR_TARGET;

/// Read-only view of how many workers are currently live. Cheap to clone
/// and safe to poll from tests or a shutdown sequence.
#[derive(Debug, Clone)]
pub struct WorkerGauge(Arc<AtomicUsize>);

impl WorkerGauge {
    /// Number of workers spawned and not yet reaped.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sends the worker id on drop, whether the handler returned or panicked.
struct CompletionTicket {
    id: u64,
    done: Sender<u64>,
}

impl Drop for CompletionTicket {
    fn drop(&mut self) {
        // The receiver only disappears when the reactor itself is gone, at
        // which point there is nobody left to reap for.
        let _ = self.done.send(self.id);
    }
}

/// The set of live workers owned by the poll loop.
pub(crate) struct WorkerSet {
    active: HashMap<u64, JoinHandle<()>>,
    next_id: u64,
    done_tx: Sender<u64>,
    done_rx: Receiver<u64>,
    outstanding: Arc<AtomicUsize>,
}

impl WorkerSet {
    pub(crate) fn new() -> Self {
        let (done_tx, done_rx) = channel();
        Self {
            active: HashMap::new(),
            next_id: 0,
            done_tx,
            done_rx,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn gauge(&self) -> WorkerGauge {
        WorkerGauge(Arc::clone(&self.outstanding))
    }

    /// Spawns a worker serving `connection` with the spec's handler. On
    /// spawn failure the connection is dropped, which closes it.
    pub(crate) fn spawn(
        &mut self,
        spec: &ListenerSpec,
        connection: Connection,
        log_socket: &Utf8Path,
    ) -> io::Result<()> {
        let id = self.next_id;
        self.next_id += 1;
        let ticket = CompletionTicket {
            id,
            done: self.done_tx.clone(),
        };
        let factory = spec.factory;
        let handler_name = spec.handler.clone();
        let args = spec.args.clone();
        let socket = log_socket.to_owned();

        let handle = thread::Builder::new()
            .name(format!("{}-{id}", spec.name))
            .spawn(move || {
                let _ticket = ticket;
                serve(factory, &handler_name, connection, &args, socket);
            })?;
        self.active.insert(id, handle);
        self.outstanding.store(self.active.len(), Ordering::SeqCst);
        Ok(())
    }

    /// Joins every worker that has announced completion since the last call.
    /// Never blocks on a worker that is still running.
    pub(crate) fn reap(&mut self) {
        loop {
            let id = match self.done_rx.try_recv() {
                Ok(id) => id,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            };
            let Some(handle) = self.active.remove(&id) else {
                continue;
            };
            if handle.join().is_err() {
                warn!(target: REACTOR_TARGET, worker = id, "worker thread panicked");
            }
        }
        self.outstanding.store(self.active.len(), Ordering::SeqCst);
    }
}

/// Worker body: construct the handler, run it, and contain whatever goes
/// wrong at this boundary.
fn serve(
    factory: HandlerFactory,
    handler_name: &str,
    connection: Connection,
    args: &[ArgValue],
    log_socket: Utf8PathBuf,
) {
    let log = WorkerLog::new(handler_name, log_socket);
    let peer = connection.peer.clone();
    let mut handler = match factory(connection, args, log.clone()) {
        Ok(handler) => handler,
        Err(error) => {
            log.error(format!("failed to construct handler for {peer}: {error}"));
            return;
        }
    };
    if let Err(error) = handler.handle() {
        log.error(format!("handler failed while serving {peer}: {error}"));
    }
}
