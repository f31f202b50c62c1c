//! The handle the endpoint's stages pass between each other: a connection's
//! transport (plain or TLS), the pool its per-connection state lives in, and
//! the raw fd used as its epoll/sendfile token.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use openssl::ssl::{HandshakeError, SslAcceptor, SslStream};

use crate::fleet::RoundRobin;
use crate::net::tcp::TcpStream;
use crate::poller::Poller;
use crate::pool::Pool;
use crate::sendfile::{Sendfile, SendfileData};

/// Blocks until `fd` is readable or writable, for resuming a mid-handshake
/// TLS accept that returned `WouldBlock`. A handshake can need either
/// direction depending which leg it's on, so both are polled for.
fn wait_for_handshake_io(fd: RawFd) -> io::Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN | libc::POLLOUT,
        revents: 0,
    };
    loop {
        let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "handshake socket in error state"));
        }
        return Ok(());
    }
}

enum Transport {
    Plain(TcpStream),
    Tls(SslStream<TcpStream>),
}

impl Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }
}

/// Where a `Handler` hands a file range off to the Sendfile stage: the
/// fleet to pick an instance from, plus the keep-alive Poller fleet to put
/// the socket back on once the transfer completes.
#[derive(Clone)]
struct SendfileStage {
    sendfile: Arc<RoundRobin<Sendfile>>,
    normal_poller: Arc<RoundRobin<Poller>>,
}

/// A connection passed between Acceptor, Worker, Poller and Sendfile.
///
/// The fd is cached separately from the transport so poller registration
/// (`epoll` tokens are raw fds) doesn't need to reach through the transport
/// lock, and stays stable across the plain -> TLS upgrade a Worker performs
/// during the handshake step.
pub struct PooledSocket {
    fd: RawFd,
    pool: Pool,
    transport: Arc<Mutex<Option<Transport>>>,
    requests_served: Arc<AtomicUsize>,
    sendfile_stage: Arc<Mutex<Option<SendfileStage>>>,
    setup_done: Arc<AtomicBool>,
}

impl Clone for PooledSocket {
    fn clone(&self) -> PooledSocket {
        PooledSocket {
            fd: self.fd,
            pool: self.pool.clone(),
            transport: self.transport.clone(),
            requests_served: self.requests_served.clone(),
            sendfile_stage: self.sendfile_stage.clone(),
            setup_done: self.setup_done.clone(),
        }
    }
}

impl PooledSocket {
    pub fn new(stream: TcpStream, parent: &Pool) -> PooledSocket {
        let fd = stream.as_raw_fd();
        PooledSocket {
            fd,
            pool: parent.create(),
            transport: Arc::new(Mutex::new(Some(Transport::Plain(stream)))),
            requests_served: Arc::new(AtomicUsize::new(0)),
            sendfile_stage: Arc::new(Mutex::new(None)),
            setup_done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `true` the first time it's called for this socket, `false` on every
    /// call after: lets a Worker run the options/TLS-handshake setup hook
    /// exactly once per connection, even though the same socket is
    /// dispatched to a Worker again for every keep-alive request.
    pub(crate) fn needs_setup(&self) -> bool {
        !self.setup_done.swap(true, Ordering::SeqCst)
    }

    /// Counts one more request served on this keep-alive connection and
    /// returns the new total, for `maxKeepAliveRequests` enforcement.
    pub fn bump_requests_served(&self) -> usize {
        self.requests_served.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Lets the socket submit a file range to the Sendfile stage itself;
    /// installed by the Worker right before `Handler::process` runs.
    pub(crate) fn attach_sendfile_stage(
        &self,
        sendfile: Arc<RoundRobin<Sendfile>>,
        normal_poller: Arc<RoundRobin<Poller>>,
    ) {
        *self.sendfile_stage.lock().unwrap() = Some(SendfileStage { sendfile, normal_poller });
    }

    /// Hands `(file_fd, start..end)` off to a Sendfile instance picked
    /// round-robin from the fleet, re-registering the socket with a
    /// round-robin keep-alive Poller on completion if `keep_alive` is set.
    /// Returns `false` (the caller should fall back to a blocking write)
    /// when no Sendfile stage is configured for this endpoint.
    pub fn send_file(&self, file_fd: RawFd, start: i64, end: i64, keep_alive: bool) -> bool {
        let stage = self.sendfile_stage.lock().unwrap().clone();
        let stage = match stage {
            Some(stage) => stage,
            None => return false,
        };

        stage.sendfile.next().add(SendfileData {
            socket: self.clone(),
            file_fd,
            pos: start,
            end,
            keep_alive: if keep_alive { Some(stage.normal_poller.next()) } else { None },
        });
        true
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.transport.lock().unwrap();
        match guard.as_mut() {
            Some(t) => t.read(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed")),
        }
    }

    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.transport.lock().unwrap();
        match guard.as_mut() {
            Some(t) => t.write(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed")),
        }
    }

    /// Runs the TLS server handshake in place, swapping the plain transport
    /// for the negotiated TLS one on success. The underlying socket is
    /// non-blocking, so a `WouldBlock` mid-handshake isn't a failure: it
    /// means the next leg of the handshake needs more I/O, and the
    /// handshake is resumed after `poll(2)` says the fd is ready. Returns
    /// `false` on a genuine handshake failure, leaving the socket with no
    /// usable transport; the caller should close it.
    pub fn upgrade_tls(&self, acceptor: &SslAcceptor) -> bool {
        let mut guard = self.transport.lock().unwrap();
        let plain = match guard.take() {
            Some(Transport::Plain(s)) => s,
            other => {
                *guard = other;
                return false;
            }
        };

        let mut result = acceptor.accept(plain);
        loop {
            match result {
                Ok(tls) => {
                    *guard = Some(Transport::Tls(tls));
                    return true;
                }
                Err(HandshakeError::WouldBlock(mid)) => {
                    if wait_for_handshake_io(mid.get_ref().as_raw_fd()).is_err() {
                        return false;
                    }
                    result = mid.handshake();
                }
                Err(HandshakeError::Failure(_)) | Err(HandshakeError::SetupFailure(_)) => {
                    return false;
                }
            }
        }
    }

    pub fn close(&self) {
        *self.transport.lock().unwrap() = None;
        self.pool.destroy();
    }
}
