//! Socket option helpers used by [`crate::net`] and the endpoint's setup
//! phase (`SO_REUSEADDR`, `SO_KEEPALIVE`, `SO_LINGER`, `TCP_NODELAY`,
//! `TCP_DEFER_ACCEPT`).

use std::io;
use std::mem;
use std::net::{IpAddr, SocketAddr};
use std::os::unix::io::RawFd;
use std::time::Duration;

use libc::{c_int, c_void};

pub fn setsockopt<T>(fd: RawFd, level: c_int, opt: c_int, payload: T) -> io::Result<()> {
    let payload = &payload as *const T as *const c_void;
    crate::syscall!(setsockopt(
        fd,
        level,
        opt,
        payload,
        mem::size_of::<T>() as libc::socklen_t
    ))?;
    Ok(())
}

pub fn getsockopt<T: Copy>(fd: RawFd, level: c_int, opt: c_int) -> io::Result<T> {
    let mut slot: T = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<T>() as libc::socklen_t;
    crate::syscall!(getsockopt(
        fd,
        level,
        opt,
        &mut slot as *mut _ as *mut _,
        &mut len
    ))?;
    assert_eq!(len as usize, mem::size_of::<T>());
    Ok(slot)
}

/// `SO_REUSEADDR` — set before `bind()` on Unix (spec §4.1 step 3).
pub fn set_reuseaddr(fd: RawFd, reuse: bool) -> io::Result<()> {
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, reuse as c_int)
}

/// `SO_KEEPALIVE` — always set on the listening socket (spec §4.1 step 3).
pub fn set_keepalive(fd: RawFd, keepalive: bool) -> io::Result<()> {
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, keepalive as c_int)
}

/// `SO_LINGER`. `None` disables lingering (`soLinger < 0`, spec §4.3).
pub fn set_linger(fd: RawFd, linger: Option<Duration>) -> io::Result<()> {
    let l_linger = linger.map(|d| d.as_secs() as c_int).unwrap_or(0);
    let raw = libc::linger {
        l_onoff: linger.is_some() as c_int,
        l_linger,
    };
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_LINGER, raw)
}

/// Best-effort `TCP_DEFER_ACCEPT` (Linux). Returns `Ok(false)` instead of an
/// error when the platform's kernel rejects the option as unsupported, so
/// the caller can clear `deferAccept` silently per spec §4.1 step 4.
pub fn set_defer_accept(fd: RawFd, timeout_secs: i32) -> io::Result<bool> {
    match setsockopt(fd, libc::IPPROTO_TCP, libc::TCP_DEFER_ACCEPT, timeout_secs) {
        Ok(()) => Ok(true),
        Err(e) if e.raw_os_error() == Some(libc::ENOPROTOOPT) => Ok(false),
        Err(e) => Err(e),
    }
}

pub fn nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let mut flag = nonblocking as c_int;
    crate::syscall!(ioctl(fd, libc::FIONBIO, &mut flag)).map(|_| ())
}

/// Creates, binds and starts listening on `addr` by hand instead of going
/// through `std::net::TcpListener::bind`, so `SO_REUSEADDR` lands between
/// `socket(2)` and `bind(2)` (spec §4.1 step 3 -- `std`'s own bind already
/// has the listener live with its own fixed backlog by the time it returns,
/// too late to set the option or choose a backlog) and `backlog` reaches a
/// real `listen(2)` call instead of `std`'s internal default.
pub fn bind_listen(addr: SocketAddr, backlog: i32) -> io::Result<RawFd> {
    let domain = match addr.ip() {
        IpAddr::V4(_) => libc::AF_INET,
        IpAddr::V6(_) => libc::AF_INET6,
    };

    let fd = crate::syscall!(socket(domain, libc::SOCK_STREAM, 0))?;

    let result = (|| -> io::Result<()> {
        set_reuseaddr(fd, true)?;

        match addr.ip() {
            IpAddr::V4(ip) => {
                let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = addr.port().to_be();
                sin.sin_addr = libc::in_addr {
                    s_addr: u32::from_ne_bytes(ip.octets()),
                };
                let sa = &sin as *const libc::sockaddr_in as *const libc::sockaddr;
                crate::syscall!(bind(fd, sa, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t))
                    .map(|_| ())
            }
            IpAddr::V6(ip) => {
                let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = addr.port().to_be();
                sin6.sin6_addr = libc::in6_addr { s6_addr: ip.octets() };
                let sa = &sin6 as *const libc::sockaddr_in6 as *const libc::sockaddr;
                crate::syscall!(bind(fd, sa, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t))
                    .map(|_| ())
            }
        }?;

        crate::syscall!(listen(fd, backlog)).map(|_| ())
    })();

    match result {
        Ok(()) => Ok(fd),
        Err(e) => {
            unsafe {
                libc::close(fd);
            }
            Err(e)
        }
    }
}
