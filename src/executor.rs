//! Pluggable dispatch: the trait the Acceptor and Poller hand sockets
//! (and comet events) off to, and the worker-pool-backed implementation
//! `Endpoint` uses by default.

use std::sync::Arc;

use crate::handler::SocketStatus;
use crate::socket::PooledSocket;
use crate::worker::WorkerStack;

/// One unit of work submitted to an `Executor`. Mirrors the two Worker
/// assignment modes that reach a Handler: a fresh socket needing
/// `Handler::process` (whether or not options/TLS setup has already run is
/// tracked on the socket itself, `PooledSocket::needs_setup`), or a comet
/// status event needing `Handler::event`.
pub enum Dispatch {
    Process(PooledSocket),
    Event(PooledSocket, SocketStatus),
}

impl Dispatch {
    /// Drops the task's socket without running the Handler, used when the
    /// endpoint is shutting down before a queued task got a chance to run.
    pub(crate) fn discard(self) {
        match self {
            Dispatch::Process(socket) => socket.close(),
            Dispatch::Event(socket, _) => socket.close(),
        }
    }
}

/// Something that can run a `Dispatch` task, somewhere. An external
/// executor (spec.md §6's `executor` option) replaces the default
/// `WorkerPoolExecutor` and disables the endpoint's internal `WorkerStack`
/// entirely -- the caller's `Executor` impl becomes solely responsible for
/// running the Handler and deciding what happens to the socket next.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Dispatch);
}

/// The default `Executor`: hands the task to the bounded worker thread
/// pool. Most deployments never need another implementation; the trait
/// exists so an embedder can substitute their own thread pool or async
/// runtime instead.
pub struct WorkerPoolExecutor {
    workers: Arc<WorkerStack>,
}

impl WorkerPoolExecutor {
    pub fn new(workers: Arc<WorkerStack>) -> WorkerPoolExecutor {
        WorkerPoolExecutor { workers }
    }
}

impl Executor for WorkerPoolExecutor {
    fn execute(&self, task: Dispatch) {
        self.workers.execute(task);
    }
}
