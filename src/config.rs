//! Connector configuration. One `EndpointConfig` is built once, fluently,
//! and handed to [`crate::endpoint::Endpoint::new`]; nothing here is mutable
//! after `init()` runs.

use std::net::IpAddr;
use std::time::Duration;

/// TLS-specific settings, broken out of [`EndpointConfig`] the way the
/// connector's `SSL*` attributes group separately from the plain socket
/// ones.
#[derive(Clone, Debug)]
pub struct SslConfig {
    pub enabled: bool,
    /// `SSLProtocol`: a `+`/`-`-token spec parsed by
    /// [`crate::tls::parse_ssl_protocol`] (e.g. `"all -SSLv2 -SSLv3"` or
    /// `"TLSv1.2 +TLSv1.3"`). An unknown token fails `init()`.
    pub protocol_spec: String,
    pub cipher_suite: Option<String>,
    pub certificate_file: Option<String>,
    pub certificate_key_file: Option<String>,
    pub ca_file: Option<String>,
    pub verify_client: VerifyClient,
    pub verify_depth: u32,
    pub honor_cipher_order: bool,
    pub disable_compression: bool,
}

impl Default for SslConfig {
    fn default() -> SslConfig {
        SslConfig {
            enabled: false,
            protocol_spec: "TLSv1.2 +TLSv1.3".to_string(),
            cipher_suite: None,
            certificate_file: None,
            certificate_key_file: None,
            ca_file: None,
            verify_client: VerifyClient::None,
            verify_depth: 10,
            honor_cipher_order: true,
            disable_compression: true,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VerifyClient {
    None,
    Optional,
    Require,
}

/// Builder for the socket, threading and poller behavior of a single
/// `Endpoint`. Fields mirror the connector attributes named in the
/// external-interfaces section: `maxThreads`, `minSpareThreads`,
/// `acceptCount`, `tcpNoDelay`, `soLinger`, `soKeepAlive`,
/// `tcpDeferAccept`, `pollerThreadCount`, `acceptorThreadCount`,
/// `useSendfile`, `sendfileSize`, `keepAliveTimeout`,
/// `maxKeepAliveRequests`, `threadPriority`.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    pub address: IpAddr,
    pub port: u16,
    pub backlog: i32,

    pub max_threads: usize,
    pub min_spare_threads: usize,
    pub acceptor_thread_count: usize,
    pub poller_thread_count: usize,
    pub sendfile_thread_count: usize,
    /// Target add-queue/PollSet capacity per Poller instance; subject to
    /// the 1024 fallback if left at the default.
    pub poller_size: usize,
    pub thread_priority: Option<i32>,

    pub tcp_no_delay: bool,
    pub so_linger: Option<Duration>,
    pub so_keep_alive: bool,
    pub tcp_defer_accept: bool,

    pub use_comet: bool,
    pub keep_alive_timeout: Duration,
    pub max_keep_alive_requests: i32,
    pub poll_time: Duration,

    pub use_sendfile: bool,
    /// Target add-queue/PollSet capacity per Sendfile instance; subject to
    /// the 1024 fallback if left at the default.
    pub sendfile_size: usize,

    pub ssl: SslConfig,
}

impl EndpointConfig {
    pub fn new(address: IpAddr, port: u16) -> EndpointConfig {
        EndpointConfig {
            address,
            port,
            backlog: 100,

            max_threads: 200,
            min_spare_threads: 10,
            acceptor_thread_count: 1,
            poller_thread_count: 1,
            sendfile_thread_count: 1,
            poller_size: 1024,
            thread_priority: None,

            tcp_no_delay: true,
            so_linger: None,
            so_keep_alive: false,
            tcp_defer_accept: false,

            use_comet: false,
            keep_alive_timeout: Duration::from_secs(60),
            max_keep_alive_requests: 100,
            poll_time: Duration::from_micros(2000),

            use_sendfile: true,
            sendfile_size: 1024,

            ssl: SslConfig::default(),
        }
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_min_spare_threads(mut self, min_spare_threads: usize) -> Self {
        self.min_spare_threads = min_spare_threads;
        self
    }

    pub fn with_acceptor_thread_count(mut self, count: usize) -> Self {
        self.acceptor_thread_count = count;
        self
    }

    pub fn with_poller_thread_count(mut self, count: usize) -> Self {
        self.poller_thread_count = count;
        self
    }

    pub fn with_sendfile_thread_count(mut self, count: usize) -> Self {
        self.sendfile_thread_count = count;
        self
    }

    pub fn with_poller_size(mut self, size: usize) -> Self {
        self.poller_size = size;
        self
    }

    pub fn with_thread_priority(mut self, priority: i32) -> Self {
        self.thread_priority = Some(priority);
        self
    }

    pub fn with_tcp_no_delay(mut self, enabled: bool) -> Self {
        self.tcp_no_delay = enabled;
        self
    }

    pub fn with_so_linger(mut self, linger: Option<Duration>) -> Self {
        self.so_linger = linger;
        self
    }

    pub fn with_so_keep_alive(mut self, enabled: bool) -> Self {
        self.so_keep_alive = enabled;
        self
    }

    pub fn with_tcp_defer_accept(mut self, enabled: bool) -> Self {
        self.tcp_defer_accept = enabled;
        self
    }

    pub fn with_use_comet(mut self, enabled: bool) -> Self {
        self.use_comet = enabled;
        self
    }

    pub fn with_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    pub fn with_max_keep_alive_requests(mut self, max: i32) -> Self {
        self.max_keep_alive_requests = max;
        self
    }

    pub fn with_poll_time(mut self, poll_time: Duration) -> Self {
        self.poll_time = poll_time;
        self
    }

    pub fn with_use_sendfile(mut self, enabled: bool) -> Self {
        self.use_sendfile = enabled;
        self
    }

    pub fn with_sendfile_size(mut self, size: usize) -> Self {
        self.sendfile_size = size;
        self
    }

    pub fn with_ssl(mut self, ssl: SslConfig) -> Self {
        self.ssl = ssl;
        self
    }
}
