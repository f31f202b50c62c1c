//! Point-in-time connector statistics, gated behind the `stats` Cargo
//! feature: an endpoint that doesn't want the bookkeeping (or the
//! `Endpoint::stats` accessor's lock traffic) builds without any of it.

/// A snapshot of the worker pool and keep-alive Poller fleet, readable at
/// any point while the endpoint is running. Mirrors the connector's
/// `curThreads`/`curThreadsBusy` JMX attributes, plus a per-Poller
/// `keepAliveCount` the original exposes per-`Processor` for the normal
/// fleet.
#[derive(Clone, Debug)]
pub struct ConnectorStats {
    /// Live worker threads, spawned up to `maxThreads`.
    pub cur_threads: usize,
    /// Worker threads currently dispatched on a socket.
    pub cur_threads_busy: usize,
    /// Registered keep-alive socket count for each Poller in the normal
    /// fleet, in fleet order.
    pub keep_alive_count: Vec<usize>,
}
