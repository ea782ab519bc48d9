//! Process management for the container launch: the cloned child, the
//! synchronization channel between it and the supervisor, and waits.

pub mod channel;
pub mod fork;
pub mod init;
pub mod launcher;
pub mod message;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

/// waitpid(2), resuming when the wait is interrupted.
pub fn waitpid_retrying(pid: Pid) -> Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => return Ok(status),
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
            Err(errno) => return Err(errno).with_context(|| format!("waitpid {}", pid)),
        }
    }
}
