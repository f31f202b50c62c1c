//! Non-blocking wrapper over `sendfile(2)`.
//!
//! A single call only ever moves as much as the socket send buffer will
//! currently take; `EAGAIN` means "register for `POLLOUT` and call again
//! later", not an error, so callers drive this in a loop keyed off the
//! poller rather than looping here.

use std::io;
use std::os::unix::io::RawFd;

/// Copies up to `count` bytes from `in_fd` at `offset` into `out_fd`.
///
/// Returns `Ok(0)` with `offset` unchanged and `Err(WouldBlock)` when the
/// socket send buffer is full; the caller should wait for writability and
/// retry with the same offset.
pub fn sendfile(
    out_fd: RawFd,
    in_fd: RawFd,
    offset: &mut libc::off_t,
    count: usize,
) -> io::Result<usize> {
    let res = unsafe { libc::sendfile(out_fd, in_fd, offset, count) };

    if res == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(res as usize)
    }
}
