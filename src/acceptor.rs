//! Accept loop: blocks on `accept(2)`, applies the connector's socket
//! options to each new connection, and hands it to the Worker pool.
//!
//! The HP-UX `errno 233` case is carried over from the connector this is
//! modeled on: some HP-UX kernels report a transient `ECONNABORTED`-like
//! condition through an undocumented errno on that platform's accept path,
//! which is not fatal and should be logged once and retried rather than
//! treated like every other accept error.

use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{error, warn};

use crate::config::EndpointConfig;
use crate::executor::{Dispatch, Executor};
use crate::net::tcp::TcpListener;
use crate::pool::Pool;
use crate::socket::PooledSocket;

const HP_UX_ECONNABORTED_ERRNO: i32 = 233;

pub struct Acceptor {
    listener: Arc<TcpListener>,
    executor: Arc<dyn Executor>,
    pool: Pool,
    running: Arc<AtomicBool>,
    config: EndpointConfig,
}

impl Acceptor {
    pub fn new(
        listener: Arc<TcpListener>,
        executor: Arc<dyn Executor>,
        pool: Pool,
        running: Arc<AtomicBool>,
        config: EndpointConfig,
    ) -> Acceptor {
        Acceptor {
            listener,
            executor,
            pool,
            running,
            config,
        }
    }

    pub fn spawn(self, name: String) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(move || self.run())
    }

    fn run(&self) {
        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    if !self.running.load(Ordering::SeqCst) {
                        let _ = stream.shutdown(Shutdown::Both);
                        break;
                    }

                    if let Err(e) = stream.set_nodelay(self.config.tcp_no_delay) {
                        warn!("failed to set TCP_NODELAY on accepted socket: {}", e);
                    }
                    if self.config.so_keep_alive {
                        if let Err(e) = stream.set_keepalive(true) {
                            warn!("failed to set SO_KEEPALIVE on accepted socket: {}", e);
                        }
                    }
                    if self.config.so_linger.is_some() {
                        if let Err(e) = stream.set_linger(self.config.so_linger) {
                            warn!("failed to set SO_LINGER on accepted socket: {}", e);
                        }
                    }

                    let socket = PooledSocket::new(stream, &self.pool);
                    self.executor.execute(Dispatch::Process(socket));
                }
                Err(e) if e.raw_os_error() == Some(HP_UX_ECONNABORTED_ERRNO) => {
                    warn!("accept: HP-UX errno 233 (spurious ECONNABORTED), retrying");
                    continue;
                }
                Err(e) if !self.running.load(Ordering::SeqCst) => {
                    // Expected: the listener's fd was closed out from under
                    // us as part of shutdown.
                    let _ = e;
                    break;
                }
                Err(e) => {
                    error!("accept failed: {}", e);
                }
            }
        }
    }
}
