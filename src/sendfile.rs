//! Non-blocking kernel sendfile stage: drives a `sendfile(2)` transfer to
//! completion across however many `POLLOUT` events it takes, independent of
//! the Worker that queued it.
//!
//! Grounded on the same add-queue + epoll wait-loop shape as
//! [`crate::poller::Poller`], but keyed on `RawFd` -> in-flight transfer
//! state via `indexmap::IndexMap` rather than a plain `HashMap`: completed
//! transfers are removed from the middle of the map as they finish, and
//! iteration order during a maintenance sweep should stay close to
//! insertion (oldest transfers first) rather than hash order.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use concurrent_queue::{ConcurrentQueue, PushError};
use indexmap::IndexMap;
use log::{error, warn};

use crate::epoll::{Epoll, EpollOpt, Events, Ready, Token};
use crate::poller::Poller;
use crate::socket::PooledSocket;
use crate::sys::sendfile as sys_sendfile;

/// One in-flight `sendfile(2)` transfer.
pub struct SendfileData {
    pub socket: PooledSocket,
    pub file_fd: RawFd,
    pub pos: i64,
    pub end: i64,
    /// Where to put the socket once the transfer completes: back on the
    /// keep-alive poller, or nowhere (close it).
    pub keep_alive: Option<Arc<Poller>>,
}

pub struct Sendfile {
    epoll: Epoll,
    add_queue: ConcurrentQueue<SendfileData>,
    registered: Mutex<IndexMap<RawFd, SendfileData>>,
    poll_time: Duration,
    running: Arc<AtomicBool>,
}

impl Sendfile {
    pub fn new(poll_time: Duration, capacity: usize, running: Arc<AtomicBool>) -> std::io::Result<Arc<Sendfile>> {
        Ok(Arc::new(Sendfile {
            epoll: Epoll::new()?,
            add_queue: ConcurrentQueue::bounded(capacity.max(1)),
            registered: Mutex::new(IndexMap::new()),
            poll_time,
            running,
        }))
    }

    /// Attempts the transfer inline, non-blocking, before ever touching the
    /// add-queue or epoll: a transfer that completes in one burst (the
    /// common case for small static files) never needs a round trip
    /// through this stage's own thread. Only a transfer that hits
    /// `WouldBlock` gets queued for `run`'s epoll loop to finish; a queue
    /// at capacity drops the transfer and closes the socket rather than
    /// blocking the caller.
    pub fn add(&self, mut data: SendfileData) {
        loop {
            let remaining = (data.end - data.pos) as usize;
            if remaining == 0 {
                self.finish(data);
                return;
            }

            match sys_sendfile::sendfile(data.socket.fd(), data.file_fd, &mut data.pos, remaining) {
                Ok(0) => {
                    self.finish(data);
                    return;
                }
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("sendfile on fd {} failed: {}", data.socket.fd(), e);
                    data.socket.close();
                    return;
                }
            }
        }

        if let Err(e) = self.add_queue.push(data) {
            match e {
                PushError::Full(data) => {
                    warn!("sendfile add-queue full, dropping transfer for fd {}", data.socket.fd());
                    data.socket.close();
                }
                PushError::Closed(data) => data.socket.close(),
            }
        }
    }

    fn finish(&self, data: SendfileData) {
        match data.keep_alive {
            Some(poller) => poller.add(data.socket),
            None => data.socket.close(),
        }
    }

    pub fn spawn(self: Arc<Self>, name: String) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(move || self.run())
    }

    fn run(&self) {
        let mut events = Events::with_capacity(1024);

        while self.running.load(Ordering::SeqCst) {
            self.drain_add_queue();

            if self.registered.lock().unwrap().is_empty() {
                thread::sleep(self.poll_time);
                continue;
            }

            match self.epoll.wait(&mut events, Some(self.poll_time)) {
                Ok(_) => {
                    for event in events.iter() {
                        let fd = event.token().0 as RawFd;
                        self.advance(fd);
                    }
                }
                Err(e) => error!("sendfile poller wait failed: {}", e),
            }
        }
    }

    fn drain_add_queue(&self) {
        while let Ok(data) = self.add_queue.pop() {
            let fd = data.socket.fd();
            if let Err(e) = self.epoll.add(&fd, Token(fd as usize), Ready::writable(), EpollOpt::level()) {
                warn!("failed to register fd {} for sendfile: {}", fd, e);
                data.socket.close();
                continue;
            }
            self.registered.lock().unwrap().insert(fd, data);
        }
    }

    /// Pushes one fd's transfer as far as it will go without blocking,
    /// finishing it (closing or handing back to keep-alive) once `pos`
    /// reaches `end`.
    fn advance(&self, fd: RawFd) {
        let mut registered = self.registered.lock().unwrap();
        let data = match registered.get_mut(&fd) {
            Some(data) => data,
            None => return,
        };

        loop {
            let remaining = (data.end - data.pos) as usize;
            if remaining == 0 {
                break;
            }

            match sys_sendfile::sendfile(data.socket.fd(), data.file_fd, &mut data.pos, remaining) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("sendfile on fd {} failed: {}", fd, e);
                    let data = registered.swap_remove(&fd).unwrap();
                    let _ = self.epoll.delete(&fd);
                    data.socket.close();
                    return;
                }
            }
        }

        let data = registered.swap_remove(&fd).unwrap();
        let _ = self.epoll.delete(&fd);
        drop(registered);

        self.finish(data);
    }
}
