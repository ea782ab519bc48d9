//! The synchronization socket between the supervisor and the container
//! process. One byte per message; an orderly close is a valid terminator
//! only where the protocol expects one.

use std::convert::TryFrom;
use std::os::unix::io::{AsRawFd, RawFd};

use anyhow::{bail, Context, Result};
use nix::sys::socket::{self, AddressFamily, SockFlag, SockType};

use crate::fd::{ClosedError, FileDescriptor};
use crate::process::message::{SyncMessage, UnexpectedMessage};

pub struct SyncSocket {
    fd: FileDescriptor,
}

impl SyncSocket {
    /// Creates the anonymous SEQPACKET pair. The supervisor keeps one end;
    /// the other travels to the child in the clone argument.
    pub fn pair() -> Result<(SyncSocket, SyncSocket)> {
        let (supervisor, child) = socket::socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .context("failed to create sync socket pair")?;

        Ok((SyncSocket::from_raw(supervisor), SyncSocket::from_raw(child)))
    }

    pub fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: FileDescriptor::new(fd),
        }
    }

    pub fn send(&mut self, message: SyncMessage) -> Result<()> {
        log::debug!("sending sync message {}", message);
        self.fd
            .write_byte(message as u8)
            .with_context(|| format!("failed to send {}", message))
    }

    pub fn recv(&mut self) -> Result<SyncMessage> {
        let byte = self.fd.read_byte()?;
        let message = SyncMessage::try_from(byte)?;
        log::debug!("received sync message {}", message);
        Ok(message)
    }

    /// Receives one message and verifies it is the expected one.
    pub fn expect(&mut self, expected: SyncMessage) -> Result<()> {
        let actual = self
            .recv()
            .with_context(|| format!("waiting for {}", expected))?;
        if actual != expected {
            return Err(UnexpectedMessage { expected, actual }.into());
        }
        Ok(())
    }

    /// Blocks until the peer closes its end. Receiving a message here is a
    /// protocol violation.
    pub fn wait_closed(&mut self) -> Result<()> {
        match self.recv() {
            Ok(message) => bail!(
                "unexpected sync message {} while waiting for the peer to close",
                message
            ),
            Err(err) if err.is::<ClosedError>() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Consumes the socket without closing the underlying descriptor.
    pub fn release(self) -> RawFd {
        self.fd.release()
    }
}

impl AsRawFd for SyncSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
