//! Client side of the GNU make jobserver protocol.
//!
//! Make advertises an inherited pipe via `MAKEFLAGS` (`--jobserver-fds=R,W`,
//! spelled `--jobserver-auth=R,W` by newer make versions). Every byte read
//! from the receive fd is one ceded job slot; every slot taken must be
//! written back to the return fd, or sibling `make -j` invocations starve.
//! Each process implicitly owns one free slot without reading it.

use std::collections::HashMap;
use std::env;
use std::io;

use regex::Regex;

use crate::error::{NightrunError, Result};

/// Allocates job slots from the `make -j` jobserver and returns them.
///
/// All operations are no-ops when no jobserver was inherited. SIGINT and
/// SIGTERM are ignored for as long as the process holds allocated slots, so
/// an interrupt cannot orphan unreturned tokens mid-transaction.
pub struct Jobserver {
    /// `(receive, return)` fds inherited from make, or `None` when inactive.
    fds: Option<(i32, i32)>,
    allocated: usize,
    /// Previous SIGINT/SIGTERM dispositions, saved only while slots are held.
    saved_handlers: HashMap<i32, libc::sighandler_t>,
}

impl Jobserver {
    /// Detect a jobserver from the inherited `MAKEFLAGS` environment.
    pub fn from_env() -> Self {
        Self::from_makeflags(&env::var("MAKEFLAGS").unwrap_or_default())
    }

    /// Parse a `MAKEFLAGS` value. Unrecognized content yields an inactive
    /// client rather than an error.
    pub fn from_makeflags(flags: &str) -> Self {
        // MAKEFLAGS= --jobserver-fds=3,4 -j
        let re = Regex::new(r"--jobserver-(?:fds|auth)=(\d+),(\d+)").unwrap();
        let fds = re.captures(flags).and_then(|caps| {
            let receive = caps[1].parse::<i32>().ok()?;
            let ret = caps[2].parse::<i32>().ok()?;
            Some((receive, ret))
        });
        match fds {
            Some(_) => tracing::debug!("using jobserver"),
            None => tracing::debug!("not using jobserver"),
        }
        Self {
            fds,
            allocated: 0,
            saved_handlers: HashMap::new(),
        }
    }

    /// Build a client from explicit pipe fds. The fds are borrowed: the
    /// client never closes them.
    pub fn from_fds(receive: i32, ret: i32) -> Self {
        Self {
            fds: Some((receive, ret)),
            allocated: 0,
            saved_handlers: HashMap::new(),
        }
    }

    pub fn active(&self) -> bool {
        self.fds.is_some()
    }

    /// Slots currently held.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Take `n` slots, blocking one single-byte read per slot.
    ///
    /// If acquisition is interrupted after `k < n` reads, the `k` slots
    /// already taken are written back before the error propagates, so the
    /// pipe's token balance never leaks.
    pub fn alloc(&mut self, n: usize) -> Result<()> {
        let Some((receive, ret)) = self.fds else {
            return Ok(());
        };
        if n == 0 {
            return Ok(());
        }
        self.block_signals();
        let mut taken = 0;
        let res = read_tokens(receive, n, &mut taken);
        match res {
            Ok(()) => {
                self.allocated += taken;
                self.unblock_if_idle();
                Ok(())
            }
            Err(e) => {
                if taken > 0 {
                    // Best effort: the original error is the one to report.
                    let _ = write_tokens(ret, taken);
                }
                self.unblock_if_idle();
                Err(e)
            }
        }
    }

    /// Return `n` slots by writing `n` bytes back to make.
    pub fn free(&mut self, n: usize) -> Result<()> {
        let Some((_, ret)) = self.fds else {
            return Ok(());
        };
        if n == 0 {
            return Ok(());
        }
        self.allocated = self.allocated.saturating_sub(n);
        let res = write_tokens(ret, n);
        self.unblock_if_idle();
        res
    }

    /// Ignore SIGINT/SIGTERM, remembering the previous dispositions.
    fn block_signals(&mut self) {
        if !self.saved_handlers.is_empty() {
            return;
        }
        for sig in [libc::SIGINT, libc::SIGTERM] {
            let prev = unsafe { libc::signal(sig, libc::SIG_IGN) };
            if prev != libc::SIG_ERR {
                self.saved_handlers.insert(sig, prev);
            }
        }
    }

    /// Restore the saved dispositions once no slots are held.
    fn unblock_if_idle(&mut self) {
        if self.saved_handlers.is_empty() || self.allocated != 0 {
            return;
        }
        for (sig, handler) in self.saved_handlers.drain() {
            unsafe {
                libc::signal(sig, handler);
            }
        }
    }
}

fn read_tokens(fd: i32, n: usize, taken: &mut usize) -> Result<()> {
    let mut buf = [0u8; 1];
    while *taken < n {
        let rc = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), 1) };
        match rc {
            1 => *taken += 1,
            0 => return Err(NightrunError::JobserverClosed),
            _ => {
                return Err(NightrunError::Sys {
                    call: "read",
                    source: io::Error::last_os_error(),
                })
            }
        }
    }
    Ok(())
}

fn write_tokens(fd: i32, n: usize) -> Result<()> {
    let buf = vec![b'+'; n];
    let mut written = 0;
    while written < n {
        let rc = unsafe { libc::write(fd, buf[written..].as_ptr().cast(), n - written) };
        if rc < 0 {
            return Err(NightrunError::Sys {
                call: "write",
                source: io::Error::last_os_error(),
            });
        }
        written += rc as usize;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe() -> (i32, i32) {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    fn set_nonblocking(fd: i32) {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }

    /// Drain and count every byte currently readable from `fd`.
    fn drain_count(fd: i32) -> usize {
        set_nonblocking(fd);
        let mut buf = [0u8; 64];
        let mut total = 0;
        loop {
            let rc = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
            if rc <= 0 {
                break;
            }
            total += rc as usize;
        }
        total
    }

    fn close(fd: i32) {
        unsafe {
            libc::close(fd);
        }
    }

    #[test]
    fn parses_jobserver_fds_from_makeflags() {
        let js = Jobserver::from_makeflags(" --jobserver-fds=3,4 -j");
        assert!(js.active());

        let js = Jobserver::from_makeflags("--jobserver-auth=11,12 -j8");
        assert!(js.active());
    }

    #[test]
    fn ignores_makeflags_without_jobserver() {
        assert!(!Jobserver::from_makeflags("").active());
        assert!(!Jobserver::from_makeflags("-k -j4").active());
        assert!(!Jobserver::from_makeflags("--jobserver-fds=x,y").active());
    }

    #[test]
    fn inactive_client_is_a_noop() {
        let mut js = Jobserver::from_makeflags("");
        js.alloc(3).unwrap();
        assert_eq!(js.allocated(), 0);
        js.free(3).unwrap();
    }

    #[test]
    fn alloc_then_free_round_trips_tokens() {
        let (receive, ret) = pipe();
        // Seed the pipe with two slots ceded by make.
        write_tokens(ret, 2).unwrap();

        let mut js = Jobserver::from_fds(receive, ret);
        js.alloc(2).unwrap();
        assert_eq!(js.allocated(), 2);
        // Both slots consumed; nothing left to read.
        js.free(2).unwrap();
        assert_eq!(js.allocated(), 0);
        assert_eq!(drain_count(receive), 2);

        close(receive);
        close(ret);
    }

    #[test]
    fn interrupted_alloc_returns_partial_tokens() {
        let (receive, ret) = pipe();
        // One slot available, but two requested. The read fd is nonblocking
        // so the second read fails instead of blocking the test.
        write_tokens(ret, 1).unwrap();
        set_nonblocking(receive);

        let mut js = Jobserver::from_fds(receive, ret);
        let err = js.alloc(2).unwrap_err();
        assert!(matches!(err, NightrunError::Sys { call: "read", .. }));
        assert_eq!(js.allocated(), 0);
        // The one token taken must have been written back.
        assert_eq!(drain_count(receive), 1);

        close(receive);
        close(ret);
    }

    #[test]
    fn signals_stay_blocked_while_slots_are_held() {
        let (receive, ret) = pipe();
        write_tokens(ret, 2).unwrap();

        let mut js = Jobserver::from_fds(receive, ret);
        js.alloc(2).unwrap();
        assert!(!js.saved_handlers.is_empty());
        js.free(1).unwrap();
        assert!(!js.saved_handlers.is_empty());
        js.free(1).unwrap();
        assert!(js.saved_handlers.is_empty());

        close(receive);
        close(ret);
    }
}
