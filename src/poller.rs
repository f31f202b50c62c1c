//! Keep-alive multiplexer: one epoll instance shared by every socket a
//! Worker has finished an initial request on and handed back for the next
//! request (or, in the comet fleet, handed over for the rest of its
//! lifetime).
//!
//! `Poller` is generic over [`FleetKind`] rather than duplicated: the
//! normal and comet fleets share the add-queue, the epoll wait loop and the
//! keep-alive maintenance sweep, and differ only in what happens when a
//! registered socket becomes readable.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use concurrent_queue::{ConcurrentQueue, PushError};
use log::{error, warn};

use crate::epoll::{Epoll, EpollOpt, Event, Events, Ready, Token};
use crate::executor::{Dispatch, Executor};
use crate::handler::SocketStatus;
use crate::socket::PooledSocket;
use crate::sys::eventfd::EventFd;

const WAKEUP_TOKEN: Token = Token(usize::MAX);

/// Which fleet a `Poller` is running: the distinction only affects what
/// happens to a socket once it's readable again.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FleetKind {
    /// Keep-alive: a readable socket goes back to the worker pool to run
    /// the next request through `Handler::process`.
    Normal,
    /// Comet (long poll / streaming): a readable socket is delivered
    /// straight to `Handler::event` without leaving the poller thread.
    Comet,
}

struct Entry {
    socket: PooledSocket,
    last_access: Instant,
}

pub struct Poller {
    epoll: Epoll,
    add_queue: ConcurrentQueue<PooledSocket>,
    wakeup: EventFd,
    registered: Mutex<HashMap<RawFd, Entry>>,
    kind: FleetKind,
    keep_alive_timeout: Duration,
    poll_time: Duration,
    executor: Arc<dyn Executor>,
    running: Arc<AtomicBool>,
}

impl Poller {
    pub fn new(
        kind: FleetKind,
        keep_alive_timeout: Duration,
        poll_time: Duration,
        queue_size: usize,
        executor: Arc<dyn Executor>,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<Arc<Poller>> {
        let epoll = Epoll::new()?;
        let wakeup = EventFd::new()?;
        epoll.add(&wakeup, WAKEUP_TOKEN, Ready::readable(), EpollOpt::edge())?;

        Ok(Arc::new(Poller {
            epoll,
            add_queue: ConcurrentQueue::bounded(queue_size.max(1)),
            wakeup,
            registered: Mutex::new(HashMap::new()),
            kind,
            keep_alive_timeout,
            poll_time,
            executor,
            running,
        }))
    }

    /// Hands a socket to the poller for keep-alive (or comet) multiplexing.
    /// Safe to call from any thread; the actual `epoll_ctl` registration
    /// happens on the poller's own thread on its next wake-up. A full
    /// add-queue destroys the socket outright in the normal fleet; in the
    /// comet fleet it's instead delivered to the handler as a `SocketStatus`
    /// error through the worker pool, so application state tied to the
    /// socket still gets a chance to clean up.
    pub fn add(&self, socket: PooledSocket) {
        match self.add_queue.push(socket) {
            Ok(()) => {
                let _ = self.wakeup.write(1);
            }
            Err(PushError::Closed(socket)) => socket.close(),
            Err(PushError::Full(socket)) => self.reject(socket),
        }
    }

    fn reject(&self, socket: PooledSocket) {
        match self.kind {
            FleetKind::Normal => {
                warn!("poller add-queue full, dropping socket fd {}", socket.fd());
                socket.close();
            }
            FleetKind::Comet => {
                warn!(
                    "comet poller add-queue full, delivering Error to handler for fd {}",
                    socket.fd()
                );
                self.executor.execute(Dispatch::Event(socket, SocketStatus::Error));
            }
        }
    }

    /// Registered socket count, for `ConnectorStats::keep_alive_count`.
    pub fn keep_alive_count(&self) -> usize {
        self.registered.lock().unwrap().len()
    }

    pub fn spawn(self: Arc<Self>, name: String) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(move || self.run())
    }

    fn run(&self) {
        let mut events = Events::with_capacity(1024);
        let mut last_maintenance = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            self.drain_add_queue();

            match self.epoll.wait(&mut events, Some(self.poll_time)) {
                Ok(_) => {
                    for event in events.iter() {
                        self.dispatch(event);
                    }
                }
                Err(e) => {
                    error!("poller wait failed: {}", e);
                }
            }

            if last_maintenance.elapsed() >= self.keep_alive_timeout / 2 {
                self.maintain();
                last_maintenance = Instant::now();
            }
        }
    }

    fn drain_add_queue(&self) {
        while let Ok(socket) = self.add_queue.pop() {
            let fd = socket.fd();
            if let Err(e) = self.epoll.add(&fd, Token(fd as usize), Ready::readable(), EpollOpt::level()) {
                warn!("failed to register fd {} with poller: {}", fd, e);
                socket.close();
                continue;
            }
            self.registered.lock().unwrap().insert(
                fd,
                Entry {
                    socket,
                    last_access: Instant::now(),
                },
            );
        }
    }

    fn dispatch(&self, event: Event) {
        if event.token() == WAKEUP_TOKEN {
            let _ = self.wakeup.read();
            return;
        }

        let fd = event.token().0 as RawFd;
        let entry = self.registered.lock().unwrap().remove(&fd);
        let entry = match entry {
            Some(entry) => entry,
            None => return,
        };

        let _ = self.epoll.delete(&fd);

        match self.kind {
            FleetKind::Normal => {
                self.executor.execute(Dispatch::Process(entry.socket));
            }
            FleetKind::Comet => {
                self.executor
                    .execute(Dispatch::Event(entry.socket, SocketStatus::Open));
            }
        }
    }

    /// Sweeps registered sockets for keep-alive expiry, delivering a
    /// `Timeout` event (comet fleet) or simply closing the socket (normal
    /// fleet keep-alive has no handler state worth notifying).
    fn maintain(&self) {
        let expired: Vec<(RawFd, Entry)> = {
            let mut registered = self.registered.lock().unwrap();
            let now = Instant::now();
            let expired_fds: Vec<RawFd> = registered
                .iter()
                .filter(|(_, e)| now.duration_since(e.last_access) >= self.keep_alive_timeout)
                .map(|(fd, _)| *fd)
                .collect();

            expired_fds
                .into_iter()
                .filter_map(|fd| registered.remove(&fd).map(|e| (fd, e)))
                .collect()
        };

        for (fd, entry) in expired {
            let _ = self.epoll.delete(&fd);

            match self.kind {
                FleetKind::Normal => entry.socket.close(),
                FleetKind::Comet => {
                    self.executor
                        .execute(Dispatch::Event(entry.socket, SocketStatus::Timeout));
                }
            }
        }
    }
}
