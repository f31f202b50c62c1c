//! Errors the endpoint can fail to start with.
//!
//! Once the endpoint is running, failures at the per-socket level never
//! propagate up as `Result` -- they're handled in place by destroying the
//! socket and logging, per the error-handling design. `EndpointError` only
//! covers the init-time path, where a failure really does mean the
//! endpoint never starts.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to create epoll instance: {0}")]
    Epoll(#[source] io::Error),

    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid SSLProtocol token: {0}")]
    InvalidSslProtocol(String),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] openssl::error::ErrorStack),

    #[error("endpoint is in the wrong state for this operation: expected {expected}, was {actual}")]
    WrongState {
        expected: &'static str,
        actual: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, EndpointError>;
