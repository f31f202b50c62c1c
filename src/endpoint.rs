//! Endpoint lifecycle: `init` binds and builds every stage, `start` spawns
//! the Acceptor/Poller/Sendfile threads, `pause`/`resume` gate new accepts
//! without tearing anything down, and `stop`/`destroy` unwind it all.
//!
//! `stop` uses the connector's "unlock" trick to break the Acceptor out of
//! a blocking `accept(2)`: a loopback connection to the listener's own
//! address, immediately reset with `SO_LINGER(0, true)` so the kernel
//! doesn't leave it in `TIME_WAIT`. `accept(2)` has no other portable way
//! to be interrupted once the listening socket itself has already been
//! created.

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream as StdTcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::info;

use crate::acceptor::Acceptor;
use crate::config::EndpointConfig;
use crate::error::{EndpointError, Result};
use crate::executor::{Executor, WorkerPoolExecutor};
use crate::fleet::RoundRobin;
use crate::handler::Handler;
use crate::naming;
use crate::net::tcp::TcpListener;
use crate::pool::Pool;
use crate::poller::{FleetKind, Poller};
use crate::sendfile::Sendfile;
use crate::socket::PooledSocket;
use crate::tls::TlsContext;
use crate::worker::WorkerStack;

#[cfg(feature = "stats")]
use crate::stats::ConnectorStats;

/// The wakeup payload `tcpDeferAccept` connectors write to their own
/// listening socket to break an Acceptor thread out of `accept(2)` once it
/// has started deferring the accept behind incoming data: a bare connect is
/// never delivered to userspace, but a peer that writes something,
/// mimicking an HTTP client, is.
const DEFER_ACCEPT_WAKEUP: &[u8] = b"OPTIONS * HTTP/1.0\r\nUser-Agent: Tomcat wakeup connection\r\n\r\n";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    New,
    Initialized,
    Running,
    Paused,
    Stopped,
    Destroyed,
}

struct Threads {
    acceptors: Vec<JoinHandle<()>>,
    normal_poller: Vec<JoinHandle<()>>,
    comet_poller: Vec<JoinHandle<()>>,
    sendfile: Vec<JoinHandle<()>>,
}

/// A single connector: one listening address, its Acceptor(s), Worker pool
/// (or an externally supplied [`Executor`]), keep-alive Poller fleet and
/// optional comet Poller / Sendfile fleets.
pub struct Endpoint {
    name: String,
    config: EndpointConfig,
    state: Mutex<State>,
    running: Arc<AtomicBool>,
    accepting: Arc<AtomicBool>,
    pool: Pool,
    listener: Option<Arc<TcpListener>>,
    /// `None` when an external `Executor` was supplied via
    /// `init_with_executor`: the caller's executor is solely responsible
    /// for running the handler, and there's no internal thread pool to
    /// report stats on.
    workers: Option<Arc<WorkerStack>>,
    executor: Option<Arc<dyn Executor>>,
    normal_poller: Option<Arc<RoundRobin<Poller>>>,
    comet_poller: Option<Arc<RoundRobin<Poller>>>,
    sendfile: Option<Arc<RoundRobin<Sendfile>>>,
    threads: Option<Threads>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, config: EndpointConfig) -> Endpoint {
        Endpoint {
            name: name.into(),
            config,
            state: Mutex::new(State::New),
            running: Arc::new(AtomicBool::new(false)),
            accepting: Arc::new(AtomicBool::new(false)),
            pool: Pool::new(),
            listener: None,
            workers: None,
            executor: None,
            normal_poller: None,
            comet_poller: None,
            sendfile: None,
            threads: None,
        }
    }

    /// Binds the listening socket and builds the Poller fleet(s), internal
    /// Worker pool and (if configured) the Sendfile fleet. Does not start
    /// accepting yet.
    pub fn init(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        self.init_inner(handler, None)
    }

    /// Like `init`, but dispatches every `Handler::process`/`event` call
    /// through `executor` instead of building an internal `WorkerStack`.
    /// The caller's `Executor` becomes solely responsible for running the
    /// handler and deciding what happens to the socket next -- this
    /// endpoint's own keep-alive/comet/sendfile wiring (which lives on
    /// `WorkerStack`) is not built in this mode.
    pub fn init_with_executor(&mut self, handler: Arc<dyn Handler>, executor: Arc<dyn Executor>) -> Result<()> {
        self.init_inner(handler, Some(executor))
    }

    fn init_inner(&mut self, handler: Arc<dyn Handler>, external_executor: Option<Arc<dyn Executor>>) -> Result<()> {
        self.transition(State::New, State::Initialized)?;

        let addr = SocketAddr::new(self.config.address, self.config.port);
        let listener = TcpListener::bind_with_backlog(addr, self.config.backlog).map_err(|e| EndpointError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        if self.config.tcp_defer_accept {
            let _ = listener.set_defer_accept(1);
        }

        self.running.store(true, Ordering::SeqCst);

        let (executor, workers) = match external_executor {
            Some(executor) => (executor, None),
            None => {
                let workers = WorkerStack::new(
                    &format!("{}-Worker", self.name),
                    self.config.max_threads,
                    self.config.min_spare_threads,
                    self.config.max_keep_alive_requests,
                    self.config.thread_priority,
                    self.running.clone(),
                    handler.clone(),
                );

                if self.config.ssl.enabled {
                    let tls = Arc::new(TlsContext::new(&self.config.ssl)?);
                    workers.set_setup(Arc::new(move |socket: &PooledSocket| tls.accept(socket)));
                }

                let executor: Arc<dyn Executor> = Arc::new(WorkerPoolExecutor::new(workers.clone()));
                (executor, Some(workers))
            }
        };

        let normal_poller = self.build_poller_fleet(FleetKind::Normal, self.config.poller_thread_count, &executor)?;

        if let Some(workers) = &workers {
            workers.set_keep_alive(normal_poller.clone());
        }

        let comet_poller = if self.config.use_comet {
            let fleet = self.build_poller_fleet(FleetKind::Comet, self.config.poller_thread_count, &executor)?;
            if let Some(workers) = &workers {
                workers.set_comet(fleet.clone());
            }
            Some(fleet)
        } else {
            None
        };

        let sendfile = if self.config.use_sendfile {
            let fleet = self.build_sendfile_fleet()?;
            if let Some(workers) = &workers {
                workers.set_sendfile(fleet.clone());
            }
            Some(fleet)
        } else {
            None
        };

        self.listener = Some(Arc::new(listener));
        self.workers = workers;
        self.executor = Some(executor);
        self.normal_poller = Some(normal_poller);
        self.comet_poller = comet_poller;
        self.sendfile = sendfile;

        Ok(())
    }

    fn build_poller_fleet(
        &self,
        kind: FleetKind,
        count: usize,
        executor: &Arc<dyn Executor>,
    ) -> Result<Arc<RoundRobin<Poller>>> {
        let mut instances = Vec::with_capacity(count.max(1));
        for _ in 0..count.max(1) {
            let poller = Poller::new(
                kind,
                self.config.keep_alive_timeout,
                self.config.poll_time,
                self.config.poller_size,
                executor.clone(),
                self.running.clone(),
            )
            .map_err(EndpointError::Epoll)?;
            instances.push(poller);
        }
        Ok(Arc::new(RoundRobin::new(instances)))
    }

    fn build_sendfile_fleet(&self) -> Result<Arc<RoundRobin<Sendfile>>> {
        let mut instances = Vec::with_capacity(self.config.sendfile_thread_count.max(1));
        for _ in 0..self.config.sendfile_thread_count.max(1) {
            let sendfile = Sendfile::new(self.config.poll_time, self.config.sendfile_size, self.running.clone())
                .map_err(EndpointError::Epoll)?;
            instances.push(sendfile);
        }
        Ok(Arc::new(RoundRobin::new(instances)))
    }

    /// Spawns the Acceptor, Poller and Sendfile threads and starts
    /// accepting connections.
    pub fn start(&mut self) -> Result<()> {
        self.transition(State::Initialized, State::Running)?;

        let listener = self.listener.clone().expect("init must run before start");
        let normal_poller = self.normal_poller.clone().expect("init must run before start");
        let executor = self.executor.clone().expect("init must run before start");

        self.accepting.store(true, Ordering::SeqCst);

        let mut acceptors = Vec::with_capacity(self.config.acceptor_thread_count);
        for i in 0..self.config.acceptor_thread_count {
            let acceptor = Acceptor::new(
                listener.clone(),
                executor.clone(),
                self.pool.clone(),
                self.running.clone(),
                self.config.clone(),
            );
            let thread_name = naming::stage_thread_name(&self.name, "Acceptor", i);
            let handle = acceptor
                .spawn(thread_name.clone())
                .map_err(|e| EndpointError::Spawn { name: thread_name, source: e })?;
            acceptors.push(handle);
        }

        let normal_poller_handles = spawn_fleet(&normal_poller, &self.name, "Poller")?;

        let comet_poller_handles = match &self.comet_poller {
            Some(fleet) => spawn_fleet(fleet, &self.name, "CometPoller")?,
            None => Vec::new(),
        };

        let sendfile_handles = match &self.sendfile {
            Some(fleet) => spawn_fleet(fleet, &self.name, "Sendfile")?,
            None => Vec::new(),
        };

        self.threads = Some(Threads {
            acceptors,
            normal_poller: normal_poller_handles,
            comet_poller: comet_poller_handles,
            sendfile: sendfile_handles,
        });

        info!("{}: started on port {}", self.name, self.config.port);

        Ok(())
    }

    /// Stops accepting new connections without tearing down any threads;
    /// in-flight keep-alive sockets keep being serviced.
    pub fn pause(&mut self) -> Result<()> {
        self.transition(State::Running, State::Paused)?;
        self.accepting.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.transition(State::Paused, State::Running)?;
        self.accepting.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stops every stage: flips `running` false, unblocks any Acceptor
    /// stuck in `accept(2)` with a loopback connect/reset, and joins every
    /// thread.
    pub fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != State::Running && *state != State::Paused {
                return Err(EndpointError::WrongState {
                    expected: "Running or Paused",
                    actual: state_name(*state),
                });
            }
            *state = State::Stopped;
        }

        self.running.store(false, Ordering::SeqCst);
        self.unlock_accept();

        if let Some(threads) = self.threads.take() {
            for handle in threads.acceptors {
                let _ = handle.join();
            }
            for handle in threads.normal_poller {
                let _ = handle.join();
            }
            for handle in threads.comet_poller {
                let _ = handle.join();
            }
            for handle in threads.sendfile {
                let _ = handle.join();
            }
        }

        info!("{}: stopped", self.name);

        Ok(())
    }

    /// Releases the listening socket and the endpoint's root memory pool.
    /// Idempotent: calling `destroy` twice, or on an endpoint that was
    /// never `init`-ed, is a no-op rather than an error, matching the
    /// `Pool::destroy` contract it delegates to.
    pub fn destroy(&mut self) {
        self.pool.destroy();
        self.listener = None;
        self.workers = None;
        self.executor = None;
        self.normal_poller = None;
        self.comet_poller = None;
        self.sendfile = None;
        *self.state.lock().unwrap() = State::Destroyed;
    }

    /// The listening socket's local address, e.g. to recover the ephemeral
    /// port chosen when `port=0` was requested. `None` before `init()`.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn unlock_accept(&self) {
        let listener = match &self.listener {
            Some(listener) => listener,
            None => return,
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        if let Ok(mut stream) = StdTcpStream::connect_timeout(&addr, Duration::from_millis(100)) {
            if self.config.tcp_defer_accept {
                // A bare connect is never delivered to an Acceptor blocked
                // behind tcpDeferAccept; write something so the kernel
                // hands the socket to accept(2).
                let _ = stream.write_all(DEFER_ACCEPT_WAKEUP);
            }
            let _ = stream.set_linger(Some(Duration::from_secs(0)));
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// A snapshot of worker and keep-alive Poller occupancy. `None` if the
    /// endpoint hasn't been `init`-ed yet, or was `init_with_executor`-ed
    /// and so has no internal `WorkerStack` to report on.
    #[cfg(feature = "stats")]
    pub fn stats(&self) -> Option<ConnectorStats> {
        let workers = self.workers.as_ref()?;
        let normal_poller = self.normal_poller.as_ref()?;
        Some(ConnectorStats {
            cur_threads: workers.cur_threads(),
            cur_threads_busy: workers.cur_threads_busy(),
            keep_alive_count: normal_poller.iter().map(|p| p.keep_alive_count()).collect(),
        })
    }

    fn transition(&self, from: State, to: State) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state != from {
            return Err(EndpointError::WrongState {
                expected: state_name(from),
                actual: state_name(*state),
            });
        }
        *state = to;
        Ok(())
    }
}

/// Spawns one thread per instance in a fleet, named
/// `"{endpoint}-{stage}-{index}"`. Bails out on the first spawn failure,
/// leaving any already-spawned threads running and unjoined; this mirrors
/// `init`/`start`'s existing behavior of surfacing the first `io::Error` on
/// thread creation rather than attempting a partial rollback.
fn spawn_fleet<T>(
    fleet: &RoundRobin<T>,
    endpoint_name: &str,
    stage: &str,
) -> Result<Vec<JoinHandle<()>>>
where
    Arc<T>: Spawnable,
{
    let mut handles = Vec::with_capacity(fleet.len());
    for (i, instance) in fleet.iter().enumerate() {
        let thread_name = naming::stage_thread_name(endpoint_name, stage, i);
        let handle = instance
            .clone()
            .spawn_self(thread_name.clone())
            .map_err(|e| EndpointError::Spawn { name: thread_name, source: e })?;
        handles.push(handle);
    }
    Ok(handles)
}

trait Spawnable {
    fn spawn_self(self, name: String) -> std::io::Result<JoinHandle<()>>;
}

impl Spawnable for Arc<Poller> {
    fn spawn_self(self, name: String) -> std::io::Result<JoinHandle<()>> {
        self.spawn(name)
    }
}

impl Spawnable for Arc<Sendfile> {
    fn spawn_self(self, name: String) -> std::io::Result<JoinHandle<()>> {
        self.spawn(name)
    }
}

fn state_name(state: State) -> &'static str {
    match state {
        State::New => "New",
        State::Initialized => "Initialized",
        State::Running => "Running",
        State::Paused => "Paused",
        State::Stopped => "Stopped",
        State::Destroyed => "Destroyed",
    }
}
