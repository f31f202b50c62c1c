//! A high-throughput TCP connection endpoint built directly on epoll,
//! `libc` sockets and kernel `sendfile`, modeled on a Tomcat-style
//! NIO/APR connector: an Acceptor thread hands freshly-accepted sockets to
//! a bounded Worker pool for options setup and (optionally) a TLS
//! handshake, completed requests go back on an epoll-based Poller for
//! keep-alive multiplexing, and large responses are driven through an
//! independent non-blocking Sendfile stage.
//!
//! ## Usage
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use std::sync::Arc;
//!
//! use nio_endpoint::config::EndpointConfig;
//! use nio_endpoint::endpoint::Endpoint;
//! use nio_endpoint::handler::{Handler, HandlerSocketState, SocketStatus};
//! use nio_endpoint::socket::PooledSocket;
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn process(&self, socket: &PooledSocket) -> HandlerSocketState {
//!         let mut buf = [0u8; 1024];
//!         match socket.read(&mut buf) {
//!             Ok(0) => HandlerSocketState::Closed,
//!             Ok(n) => {
//!                 let _ = socket.write(&buf[..n]);
//!                 HandlerSocketState::Open
//!             }
//!             Err(_) => HandlerSocketState::Closed,
//!         }
//!     }
//!
//!     fn event(&self, _socket: &PooledSocket, _status: SocketStatus) -> HandlerSocketState {
//!         HandlerSocketState::Closed
//!     }
//! }
//!
//! let config = EndpointConfig::new(Ipv4Addr::LOCALHOST.into(), 0).with_max_threads(64);
//! let mut endpoint = Endpoint::new("example", config);
//! endpoint.init(Arc::new(Echo)).unwrap();
//! endpoint.start().unwrap();
//! # endpoint.stop().unwrap();
//! # endpoint.destroy();
//! ```

pub mod acceptor;
pub mod config;
pub mod endpoint;
pub mod epoll;
pub mod error;
pub mod executor;
pub mod fleet;
pub mod handler;
pub mod naming;
pub mod net;
pub mod pool;
pub mod poller;
pub mod sendfile;
pub mod socket;
#[cfg(feature = "stats")]
pub mod stats;
mod sys;
pub mod tls;
pub mod worker;

pub use config::EndpointConfig;
pub use endpoint::Endpoint;
pub use error::{EndpointError, Result};
pub use handler::{Handler, HandlerSocketState, SocketStatus};
