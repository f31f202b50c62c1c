//! Worker thread pool: a bounded LIFO stack of idle threads, each blocked on
//! a single-slot rendezvous until the Acceptor (or Poller, for keep-alive
//! re-dispatch) hands it a socket.
//!
//! Grounded on a single-slot mutex+condvar rendezvous, reshaped into a LIFO
//! idle stack: reusing the most-recently-idle thread keeps its stack hot,
//! and the bound is `maxThreads` itself rather than an unrelated capacity.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use log::{info, warn};
use slab::Slab;

use crate::executor::Dispatch;
use crate::fleet::RoundRobin;
use crate::handler::{Handler, HandlerSocketState, SocketStatus};
use crate::poller::Poller;
use crate::sendfile::Sendfile;
use crate::socket::PooledSocket;
use crate::sys::thread as sys_thread;

struct Slot {
    task: Mutex<Option<Dispatch>>,
    cond: Condvar,
}

impl Slot {
    fn new() -> Slot {
        Slot {
            task: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    fn assign(&self, task: Dispatch) {
        let mut slot = self.task.lock().unwrap();
        *slot = Some(task);
        self.cond.notify_one();
    }

    fn take(&self) -> Dispatch {
        let mut slot = self.task.lock().unwrap();
        loop {
            if let Some(task) = slot.take() {
                return task;
            }
            slot = self.cond.wait(slot).unwrap();
        }
    }
}

/// A pooled worker thread. Cloning shares the thread's rendezvous slot; the
/// `WorkerStack` keeps the clones that are currently idle.
#[derive(Clone)]
struct Worker {
    id: usize,
    slot: Arc<Slot>,
}

impl Worker {
    fn dispatch(&self, task: Dispatch) {
        self.slot.assign(task);
    }
}

/// Bounded LIFO pool of worker threads backing an `Endpoint`.
///
/// Mirrors the connector's thread-pool invariant: `curThreadsBusy <=
/// curThreads <= maxThreads`, growing lazily up to `maxThreads` and blocking
/// `execute` once the pool is both full and entirely busy.
pub struct WorkerStack {
    idle: Mutex<Vec<Worker>>,
    cond: Condvar,
    max_threads: usize,
    min_spare_threads: usize,
    /// Caps requests served per keep-alive connection before it's force
    /// closed instead of handed back to the Poller. `<= 0` means unlimited,
    /// matching the connector convention.
    max_keep_alive_requests: i32,
    cur_threads: AtomicUsize,
    cur_threads_busy: AtomicUsize,
    /// Worker thread ids, allocated and freed through a slab so a thread
    /// name like `Worker-3` gets reused once that slot exits instead of
    /// counting up forever over the endpoint's lifetime.
    ids: Mutex<Slab<()>>,
    running: Arc<AtomicBool>,
    handler: Arc<dyn Handler>,
    thread_priority: Option<i32>,
    name: String,
    logged_max_threads: AtomicBool,
    setup: Mutex<Option<Arc<dyn Fn(&PooledSocket) -> bool + Send + Sync>>>,
    /// Where a socket goes after a `Handler` call returns `Open`: the
    /// normal keep-alive Poller fleet. `None` until `Endpoint::init` wires
    /// it up (each Poller needs an `Executor` over this `WorkerStack`, so
    /// the two are built in two passes rather than both up front).
    keep_alive: Mutex<Option<Arc<RoundRobin<Poller>>>>,
    /// Where a socket goes after a `Handler` call returns `Long`: the comet
    /// Poller fleet. `None` when the endpoint has `use_comet` disabled.
    comet: Mutex<Option<Arc<RoundRobin<Poller>>>>,
    /// The endpoint's Sendfile fleet, handed to each socket just before
    /// `Handler::process` so it can submit a file range with
    /// `PooledSocket::send_file` without the `Handler` trait needing to
    /// know about the Sendfile type at all.
    sendfile: Mutex<Option<Arc<RoundRobin<Sendfile>>>>,
}

impl WorkerStack {
    pub fn new(
        name: &str,
        max_threads: usize,
        min_spare_threads: usize,
        max_keep_alive_requests: i32,
        thread_priority: Option<i32>,
        running: Arc<AtomicBool>,
        handler: Arc<dyn Handler>,
    ) -> Arc<WorkerStack> {
        let stack = Arc::new(WorkerStack {
            idle: Mutex::new(Vec::new()),
            cond: Condvar::new(),
            max_threads,
            min_spare_threads,
            max_keep_alive_requests,
            cur_threads: AtomicUsize::new(0),
            cur_threads_busy: AtomicUsize::new(0),
            ids: Mutex::new(Slab::new()),
            running,
            handler,
            thread_priority,
            name: name.to_string(),
            logged_max_threads: AtomicBool::new(false),
            setup: Mutex::new(None),
            keep_alive: Mutex::new(None),
            comet: Mutex::new(None),
            sendfile: Mutex::new(None),
        });
        stack.warm_up();
        stack
    }

    /// Pre-spawns idle worker threads up to `minSpareThreads` (capped at
    /// `maxThreads`) so the first requests after startup don't pay a thread
    /// spawn. Does not replenish spares consumed later — a worker taken off
    /// the idle stack is only ever returned by its own request finishing.
    fn warm_up(self: &Arc<Self>) {
        let target = self.min_spare_threads.min(self.max_threads);
        while self.idle.lock().unwrap().len() < target {
            match self.spawn_worker() {
                Some(worker) => self.idle.lock().unwrap().push(worker),
                None => break,
            }
        }
    }

    /// Installs the per-socket setup hook (TCP options plus, if configured,
    /// the TLS handshake) run before every `Handler::process` call. Returns
    /// `false` to abandon the socket without dispatching to the handler.
    pub fn set_setup(&self, setup: Arc<dyn Fn(&PooledSocket) -> bool + Send + Sync>) {
        *self.setup.lock().unwrap() = Some(setup);
    }

    /// Installs the Poller fleet a socket is hoisted onto after a `Handler`
    /// call returns `HandlerSocketState::Open`.
    pub fn set_keep_alive(&self, fleet: Arc<RoundRobin<Poller>>) {
        *self.keep_alive.lock().unwrap() = Some(fleet);
    }

    /// Installs the comet Poller fleet a socket is registered with after a
    /// `Handler` call returns `HandlerSocketState::Long`.
    pub fn set_comet(&self, fleet: Arc<RoundRobin<Poller>>) {
        *self.comet.lock().unwrap() = Some(fleet);
    }

    /// Installs the Sendfile fleet made available to every socket dispatched
    /// through this pool.
    pub fn set_sendfile(&self, fleet: Arc<RoundRobin<Sendfile>>) {
        *self.sendfile.lock().unwrap() = Some(fleet);
    }

    pub fn cur_threads(&self) -> usize {
        self.cur_threads.load(Ordering::Relaxed)
    }

    pub fn cur_threads_busy(&self) -> usize {
        self.cur_threads_busy.load(Ordering::Relaxed)
    }

    /// Hands `task` to an idle worker, spawning one if the pool has not yet
    /// grown to `max_threads`, or blocking until one becomes idle once it
    /// has.
    pub fn execute(self: &Arc<Self>, task: Dispatch) {
        let worker = self.take_or_spawn();
        self.cur_threads_busy.fetch_add(1, Ordering::SeqCst);
        worker.dispatch(task);
    }

    fn take_or_spawn(self: &Arc<Self>) -> Worker {
        let mut idle = self.idle.lock().unwrap();

        loop {
            if let Some(worker) = idle.pop() {
                return worker;
            }

            if self.cur_threads.load(Ordering::SeqCst) < self.max_threads {
                drop(idle);
                if let Some(worker) = self.spawn_worker() {
                    return worker;
                }
                idle = self.idle.lock().unwrap();
                continue;
            }

            if !self.logged_max_threads.swap(true, Ordering::SeqCst) {
                info!("{}: all {} worker threads busy", self.name, self.max_threads);
            }

            idle = self.cond.wait(idle).unwrap();
        }
    }

    fn spawn_worker(self: &Arc<Self>) -> Option<Worker> {
        let id = self.ids.lock().unwrap().insert(());
        self.cur_threads.fetch_add(1, Ordering::SeqCst);

        let worker = Worker {
            id,
            slot: Arc::new(Slot::new()),
        };

        let pool = self.clone();
        let thread_worker = worker.clone();
        let thread_name = crate::naming::worker_thread_name(&pool.name, id);

        let spawned = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                if let Some(priority) = pool.thread_priority {
                    if let Err(e) = sys_thread::set_priority(priority) {
                        warn!("{}: failed to set thread priority: {}", thread_name, e);
                    }
                }
                pool.run_worker(&thread_worker);
            });

        match spawned {
            Ok(_) => Some(worker),
            Err(e) => {
                warn!("failed to spawn {}: {}", thread_name, e);
                self.cur_threads.fetch_sub(1, Ordering::SeqCst);
                self.ids.lock().unwrap().remove(id);
                None
            }
        }
    }

    fn run_worker(self: &Arc<Self>, worker: &Worker) {
        loop {
            let task = worker.slot.take();

            if !self.running.load(Ordering::SeqCst) {
                task.discard();
                break;
            }

            match task {
                Dispatch::Process(socket) => self.run_process(socket),
                Dispatch::Event(socket, status) => self.run_event(socket, status),
            }

            self.cur_threads_busy.fetch_sub(1, Ordering::SeqCst);

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let mut idle = self.idle.lock().unwrap();
            idle.push(worker.clone());
            self.cond.notify_one();
        }

        self.cur_threads.fetch_sub(1, Ordering::SeqCst);
        self.ids.lock().unwrap().remove(worker.id);
    }

    /// Runs the options/TLS setup hook (once per socket), attaches the
    /// Sendfile fleet, then calls `Handler::process` and routes the result.
    fn run_process(self: &Arc<Self>, socket: PooledSocket) {
        let ready = if socket.needs_setup() {
            let setup = self.setup.lock().unwrap().clone();
            match setup {
                Some(setup) => setup(&socket),
                None => true,
            }
        } else {
            true
        };

        if !ready {
            socket.close();
            return;
        }

        let sendfile = self.sendfile.lock().unwrap().clone();
        if let Some(sendfile) = sendfile {
            let keep_alive = self.keep_alive.lock().unwrap().clone();
            if let Some(poller) = keep_alive {
                socket.attach_sendfile_stage(sendfile, poller);
            }
        }

        let state = self.handler.process(&socket);
        if state == HandlerSocketState::Open {
            let served = socket.bump_requests_served();
            let exhausted =
                self.max_keep_alive_requests > 0 && served >= self.max_keep_alive_requests as usize;
            if exhausted {
                socket.close();
                return;
            }
        }
        self.dispatch_result(socket, state);
    }

    /// Calls `Handler::event` for a comet status delivery and routes the
    /// result, same as a fresh `Handler::process` dispatch.
    fn run_event(self: &Arc<Self>, socket: PooledSocket, status: SocketStatus) {
        let state = self.handler.event(&socket, status);
        self.dispatch_result(socket, state);
    }

    /// `Open` re-registers with the normal keep-alive Poller fleet, `Long`
    /// registers with the comet fleet, `Closed` destroys the socket. A
    /// fleet absent from the endpoint's configuration (no comet poller when
    /// a handler still returns `Long`) closes the socket instead of
    /// panicking or leaking it.
    fn dispatch_result(&self, socket: PooledSocket, state: HandlerSocketState) {
        match state {
            HandlerSocketState::Open => match self.keep_alive.lock().unwrap().clone() {
                Some(fleet) => fleet.next().add(socket),
                None => socket.close(),
            },
            HandlerSocketState::Long => match self.comet.lock().unwrap().clone() {
                Some(fleet) => fleet.next().add(socket),
                None => {
                    warn!(
                        "handler returned Long for fd {} with no comet poller configured; closing",
                        socket.fd()
                    );
                    socket.close();
                }
            },
            HandlerSocketState::Closed => socket.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::tcp::TcpStream;
    use crate::pool::Pool;
    use std::net::TcpListener as StdTcpListener;
    use std::net::TcpStream as StdTcpStream;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::mpsc;

    fn accepted_stream() -> TcpStream {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = StdTcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        TcpStream::new(server).unwrap()
    }

    struct CountingHandler {
        seen: StdAtomicUsize,
        tx: Mutex<mpsc::Sender<()>>,
    }

    impl Handler for CountingHandler {
        fn process(&self, _socket: &PooledSocket) -> HandlerSocketState {
            self.seen.fetch_add(1, Ordering::SeqCst);
            self.tx.lock().unwrap().send(()).unwrap();
            HandlerSocketState::Closed
        }

        fn event(&self, _socket: &PooledSocket, _status: SocketStatus) -> HandlerSocketState {
            HandlerSocketState::Closed
        }
    }

    #[test]
    fn reuses_idle_worker() {
        let (tx, rx) = mpsc::channel();
        let handler = Arc::new(CountingHandler {
            seen: StdAtomicUsize::new(0),
            tx: Mutex::new(tx),
        });
        let running = Arc::new(AtomicBool::new(true));
        let stack = WorkerStack::new("test", 4, 0, -1, None, running, handler.clone());

        let root = Pool::new();
        for _ in 0..3 {
            stack.execute(Dispatch::Process(PooledSocket::new(accepted_stream(), &root)));
            rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        }

        assert_eq!(handler.seen.load(Ordering::SeqCst), 3);
        assert!(stack.cur_threads() >= 1 && stack.cur_threads() <= 3);
    }

    struct KeepAliveHandler {
        tx: Mutex<mpsc::Sender<()>>,
    }

    impl Handler for KeepAliveHandler {
        fn process(&self, _socket: &PooledSocket) -> HandlerSocketState {
            self.tx.lock().unwrap().send(()).unwrap();
            HandlerSocketState::Open
        }

        fn event(&self, _socket: &PooledSocket, _status: SocketStatus) -> HandlerSocketState {
            HandlerSocketState::Open
        }
    }

    /// An `Open` result with no keep-alive Poller fleet wired up closes the
    /// socket rather than leaking it or panicking.
    #[test]
    fn open_without_keep_alive_poller_closes_socket() {
        let (tx, rx) = mpsc::channel();
        let handler = Arc::new(KeepAliveHandler { tx: Mutex::new(tx) });
        let running = Arc::new(AtomicBool::new(true));
        let stack = WorkerStack::new("test", 2, 0, -1, None, running, handler);

        let root = Pool::new();
        stack.execute(Dispatch::Process(PooledSocket::new(accepted_stream(), &root)));
        rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
    }

    /// A `Long` result with no comet Poller fleet wired up closes the
    /// socket instead of panicking.
    #[test]
    fn long_without_comet_poller_closes_socket() {
        struct LongHandler {
            tx: Mutex<mpsc::Sender<()>>,
        }
        impl Handler for LongHandler {
            fn process(&self, _socket: &PooledSocket) -> HandlerSocketState {
                self.tx.lock().unwrap().send(()).unwrap();
                HandlerSocketState::Long
            }
            fn event(&self, _socket: &PooledSocket, _status: SocketStatus) -> HandlerSocketState {
                HandlerSocketState::Long
            }
        }

        let (tx, rx) = mpsc::channel();
        let handler = Arc::new(LongHandler { tx: Mutex::new(tx) });
        let running = Arc::new(AtomicBool::new(true));
        let stack = WorkerStack::new("test", 2, 0, -1, None, running, handler);

        let root = Pool::new();
        stack.execute(Dispatch::Process(PooledSocket::new(accepted_stream(), &root)));
        rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
    }

    /// `set_setup` only runs once per socket: a second dispatch of the same
    /// `PooledSocket` (simulating a keep-alive re-entry from the Poller)
    /// must not invoke the setup hook again.
    #[test]
    fn setup_hook_runs_once_per_socket() {
        let (tx, rx) = mpsc::channel();
        let handler = Arc::new(KeepAliveHandler { tx: Mutex::new(tx) });
        let running = Arc::new(AtomicBool::new(true));
        let stack = WorkerStack::new("test", 2, 0, -1, None, running, handler);

        let setup_calls = Arc::new(StdAtomicUsize::new(0));
        let counted = setup_calls.clone();
        stack.set_setup(Arc::new(move |_socket: &PooledSocket| {
            counted.fetch_add(1, Ordering::SeqCst);
            true
        }));

        let root = Pool::new();
        let socket = PooledSocket::new(accepted_stream(), &root);

        stack.execute(Dispatch::Process(socket.clone()));
        rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();

        stack.execute(Dispatch::Process(socket));
        rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();

        assert_eq!(setup_calls.load(Ordering::SeqCst), 1);
    }
}
