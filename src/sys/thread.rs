//! Best-effort OS thread priority, mirroring the `threadPriority` connector
//! option. Linux's `setpriority(2)` operates on niceness, which is a much
//! coarser knob than a Java `Thread` priority; failures here are logged and
//! swallowed by the caller rather than treated as fatal.

use std::io;

#[cfg(target_os = "linux")]
pub fn set_priority(nice: i32) -> io::Result<()> {
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
    crate::syscall!(setpriority(libc::PRIO_PROCESS, tid, nice))?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_priority(_nice: i32) -> io::Result<()> {
    Ok(())
}
