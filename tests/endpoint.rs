//! End-to-end exercise of the full Acceptor -> Worker -> Poller pipeline
//! against real loopback sockets.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nio_endpoint::config::EndpointConfig;
use nio_endpoint::endpoint::Endpoint;
use nio_endpoint::handler::{Handler, HandlerSocketState, SocketStatus};
use nio_endpoint::socket::PooledSocket;

struct Echo {
    requests: AtomicUsize,
}

impl Handler for Echo {
    fn process(&self, socket: &PooledSocket) -> HandlerSocketState {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mut buf = [0u8; 256];
        match socket.read(&mut buf) {
            Ok(0) => HandlerSocketState::Closed,
            Ok(n) => {
                if socket.write(&buf[..n]).is_err() {
                    return HandlerSocketState::Closed;
                }
                HandlerSocketState::Open
            }
            Err(_) => HandlerSocketState::Closed,
        }
    }

    fn event(&self, _socket: &PooledSocket, _status: SocketStatus) -> HandlerSocketState {
        HandlerSocketState::Closed
    }
}

#[test]
fn echoes_one_request_and_closes_on_disconnect() {
    let handler = Arc::new(Echo { requests: AtomicUsize::new(0) });
    let config = EndpointConfig::new(Ipv4Addr::LOCALHOST.into(), 0)
        .with_max_threads(4)
        .with_use_sendfile(false);

    let mut endpoint = Endpoint::new("echo-test", config);
    endpoint.init(handler.clone()).unwrap();
    let port = endpoint.local_addr().unwrap().port();
    endpoint.start().unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.write_all(b"hello").unwrap();

    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    drop(stream);
    std::thread::sleep(Duration::from_millis(100));

    endpoint.stop().unwrap();
    endpoint.destroy();

    assert!(handler.requests.load(Ordering::SeqCst) >= 1);
}

#[test]
fn keep_alive_serves_a_second_request_on_the_same_connection() {
    let handler = Arc::new(Echo { requests: AtomicUsize::new(0) });
    let config = EndpointConfig::new(Ipv4Addr::LOCALHOST.into(), 0)
        .with_max_threads(4)
        .with_use_sendfile(false)
        .with_keep_alive_timeout(Duration::from_secs(5));

    let mut endpoint = Endpoint::new("keepalive-test", config);
    endpoint.init(handler.clone()).unwrap();
    let port = endpoint.local_addr().unwrap().port();
    endpoint.start().unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();

    stream.write_all(b"first").unwrap();
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"first");

    stream.write_all(b"next!").unwrap();
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"next!");

    endpoint.stop().unwrap();
    endpoint.destroy();

    assert_eq!(handler.requests.load(Ordering::SeqCst), 2);
}

#[test]
fn max_keep_alive_requests_forces_close_after_the_cap() {
    let handler = Arc::new(Echo { requests: AtomicUsize::new(0) });
    let config = EndpointConfig::new(Ipv4Addr::LOCALHOST.into(), 0)
        .with_max_threads(4)
        .with_use_sendfile(false)
        .with_max_keep_alive_requests(1);

    let mut endpoint = Endpoint::new("cap-test", config);
    endpoint.init(handler.clone()).unwrap();
    let port = endpoint.local_addr().unwrap().port();
    endpoint.start().unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.write_all(b"once!").unwrap();
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"once!");

    // The cap is hit after the first request, so the endpoint closes the
    // connection instead of leaving it registered for keep-alive.
    let mut tail = [0u8; 1];
    let n = stream.read(&mut tail).unwrap();
    assert_eq!(n, 0);

    endpoint.stop().unwrap();
    endpoint.destroy();
}

#[test]
fn max_threads_bounds_concurrent_dispatch() {
    let handler = Arc::new(Echo { requests: AtomicUsize::new(0) });
    let config = EndpointConfig::new(Ipv4Addr::LOCALHOST.into(), 0)
        .with_max_threads(2)
        .with_use_sendfile(false);

    let mut endpoint = Endpoint::new("maxthreads-test", config);
    endpoint.init(handler.clone()).unwrap();
    let port = endpoint.local_addr().unwrap().port();
    endpoint.start().unwrap();

    let mut streams: Vec<TcpStream> = (0..3)
        .map(|_| TcpStream::connect(("127.0.0.1", port)).unwrap())
        .collect();

    for stream in streams.iter_mut() {
        stream.write_all(b"ping!").unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping!");
    }

    endpoint.stop().unwrap();
    endpoint.destroy();

    assert_eq!(handler.requests.load(Ordering::SeqCst), 3);
}
