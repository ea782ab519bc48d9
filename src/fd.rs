//! Owned kernel file descriptors with the single-byte I/O used by the
//! launch synchronization protocol.

use std::fmt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::unistd;

/// Signals that the peer of a descriptor has shut down cleanly. A read
/// returning zero bytes is an orderly close, not an I/O failure, and some
/// callers treat it as a successful termination.
#[derive(Debug)]
pub struct ClosedError;

impl std::error::Error for ClosedError {}

impl fmt::Display for ClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "file descriptor is closed".fmt(f)
    }
}

/// Exclusive owner of a kernel descriptor. The descriptor is closed on
/// drop; moves transfer ownership.
#[derive(Debug)]
pub struct FileDescriptor(RawFd);

impl FileDescriptor {
    pub fn new(fd: RawFd) -> Self {
        Self(fd)
    }

    /// Duplicates the descriptor into a new owner.
    pub fn try_clone(&self) -> Result<Self> {
        let fd = unistd::dup(self.0).context("dup failed")?;
        Ok(Self(fd))
    }

    /// Writes exactly one byte, retrying on EINTR and EAGAIN.
    pub fn write_byte(&self, byte: u8) -> Result<()> {
        let buf = [byte];
        loop {
            match unistd::write(self.0, &buf) {
                Ok(1) => return Ok(()),
                Ok(_) => continue,
                Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
                Err(errno) => return Err(errno).context("write"),
            }
        }
    }

    /// Reads exactly one byte, retrying on EINTR and EAGAIN. Fails with
    /// [`ClosedError`] when the peer has closed its end.
    pub fn read_byte(&self) -> Result<u8> {
        let mut buf = [0u8; 1];
        loop {
            match unistd::read(self.0, &mut buf) {
                Ok(0) => return Err(ClosedError.into()),
                Ok(_) => return Ok(buf[0]),
                Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
                Err(errno) => return Err(errno).context("read"),
            }
        }
    }

    /// Names the open descriptor through procfs. The name stays valid even
    /// if the directory entry the descriptor was opened from is renamed or
    /// replaced.
    pub fn proc_path(&self) -> PathBuf {
        PathBuf::from(format!("/proc/self/fd/{}", self.0))
    }

    /// Consumes the owner, returning the raw descriptor without closing it.
    pub fn release(self) -> RawFd {
        let fd = self.0;
        std::mem::forget(self);
        fd
    }
}

impl AsRawFd for FileDescriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for FileDescriptor {
    fn drop(&mut self) {
        let _ = unistd::close(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::stat;

    fn pipe_pair() -> (FileDescriptor, FileDescriptor) {
        let (read, write) = unistd::pipe().unwrap();
        (FileDescriptor::new(read), FileDescriptor::new(write))
    }

    #[test]
    fn test_byte_round_trip() -> Result<()> {
        let (read, write) = pipe_pair();
        write.write_byte(0x42)?;
        assert_eq!(read.read_byte()?, 0x42);
        Ok(())
    }

    #[test]
    fn test_read_from_closed_peer() {
        let (read, write) = pipe_pair();
        drop(write);
        let err = read.read_byte().unwrap_err();
        assert!(err.is::<ClosedError>());
    }

    #[test]
    fn test_proc_path() {
        let (read, _write) = pipe_pair();
        assert_eq!(
            read.proc_path(),
            PathBuf::from(format!("/proc/self/fd/{}", read.as_raw_fd()))
        );
    }

    #[test]
    fn test_release_does_not_close() {
        let (read, _write) = pipe_pair();
        let raw = read.release();
        assert!(stat::fstat(raw).is_ok());
        unistd::close(raw).unwrap();
    }

    #[test]
    fn test_drop_closes() {
        let (read, _write) = pipe_pair();
        let raw = read.as_raw_fd();
        drop(read);
        assert!(stat::fstat(raw).is_err());
    }
}
