//! Centralizes the stage-thread-name formatting spec.md §6 specifies
//! (`<name>-Acceptor-N`, `<name>-Poller-N`, `<name>-CometPoller-N`,
//! `<name>-Sendfile-N`, worker `<name>-<sequence>`), so Acceptor, Poller,
//! Sendfile and Worker can't drift from one another or from what a
//! `ConnectorStats` consumer expects to see in a thread dump.

/// A numbered stage thread: `<name>-<stage>-<index>`.
pub fn stage_thread_name(endpoint: &str, stage: &str, index: usize) -> String {
    format!("{}-{}-{}", endpoint, stage, index)
}

/// A worker thread: `<name>-<sequence>`, no stage word.
pub fn worker_thread_name(endpoint: &str, sequence: usize) -> String {
    format!("{}-{}", endpoint, sequence)
}
