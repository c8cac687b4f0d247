//! Graceful-to-forceful shutdown of long-running child daemons.
//!
//! Actions that start a server are expected to tear it down with
//! [`shutdown_subprocess`] and treat a `false` return as a hard failure: a
//! process that needs SIGKILL has hung or broken its signal handling.

use std::io;
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{NightrunError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Send `sig` to `pid`, tolerating the process having already exited.
pub fn try_kill(pid: i32, sig: i32) -> Result<()> {
    let rc = unsafe { libc::kill(pid, sig) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Quit in the meantime; the race is expected.
        Ok(())
    } else {
        Err(NightrunError::Sys {
            call: "kill",
            source: err,
        })
    }
}

/// Spawn `cmd` as the leader of a fresh process group, so that
/// [`shutdown_subprocess`] with `kill_group` reaches forked grandchildren
/// such as a wrapped server.
pub fn spawn_in_group(cmd: &mut Command) -> Result<Child> {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
    Ok(cmd.spawn()?)
}

/// Escalating shutdown: SIGTERM, poll every 10ms up to `timeout`, then
/// SIGKILL and poll up to one further second.
///
/// Returns `Ok(true)` if the process exited on its own after SIGTERM and
/// `Ok(false)` if SIGKILL was required (the process is confirmed dead in
/// that case). A process that survives even SIGKILL is an error, never a
/// silent pass.
///
/// With `kill_group`, signals also go to the child's process group; the
/// child must have been spawned as a group leader (see [`spawn_in_group`]).
pub fn shutdown_subprocess(child: &mut Child, timeout: Duration, kill_group: bool) -> Result<bool> {
    let pid = child.id() as i32;

    if child.try_wait()?.is_none() {
        signal_tree(pid, libc::SIGTERM, kill_group)?;
    }
    if poll_until_exit(child, timeout)? {
        return Ok(true);
    }

    signal_tree(pid, libc::SIGKILL, kill_group)?;
    if poll_until_exit(child, KILL_GRACE)? {
        return Ok(false);
    }
    Err(NightrunError::Unkillable { pid })
}

fn signal_tree(pid: i32, sig: i32, kill_group: bool) -> Result<()> {
    try_kill(pid, sig)?;
    if kill_group {
        try_kill(-pid, sig)?;
    }
    Ok(())
}

fn poll_until_exit(child: &mut Child, timeout: Duration) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if child.try_wait()?.is_some() {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_kill_tolerates_missing_process() {
        let mut child = Command::new("true").spawn().unwrap();
        child.wait().unwrap();
        try_kill(child.id() as i32, libc::SIGTERM).unwrap();
    }

    #[test]
    fn sigterm_is_enough_for_a_cooperative_process() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let clean = shutdown_subprocess(&mut child, Duration::from_secs(5), false).unwrap();
        assert!(clean);
    }

    #[test]
    fn sigkill_is_reported_for_a_process_ignoring_sigterm() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .unwrap();
        // Give the shell a moment to install the trap.
        thread::sleep(Duration::from_millis(200));
        let clean = shutdown_subprocess(&mut child, Duration::from_millis(300), false).unwrap();
        assert!(!clean);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn already_exited_process_counts_as_clean() {
        let mut child = Command::new("true").spawn().unwrap();
        thread::sleep(Duration::from_millis(100));
        let clean = shutdown_subprocess(&mut child, Duration::from_secs(1), false).unwrap();
        assert!(clean);
    }

    #[test]
    fn group_kill_reaches_grandchildren() {
        // The shell forks a sleep; killing the group must take both down.
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30 & wait"]);
        let mut child = spawn_in_group(&mut cmd).unwrap();
        thread::sleep(Duration::from_millis(200));
        let clean = shutdown_subprocess(&mut child, Duration::from_secs(5), true).unwrap();
        assert!(clean);
    }
}
