//! Spawns the container process into its new namespace set.

use std::path::Path;

use anyhow::Result;
use nix::unistd::{self, Pid};

use crate::config::Config;
use crate::namespaces;
use crate::process::channel::SyncSocket;
use crate::process::fork::{self, ChildStack};
use crate::process::init;

/// Creates the container process. The clone flags are computed first so a
/// contradictory namespace list fails before any other side effect. The
/// returned socket is the supervisor's end of the sync pair.
pub fn launch(config: &Config, bundle: &Path) -> Result<(Pid, SyncSocket)> {
    let flags = namespaces::clone_flags(&config.namespaces)?;

    let (supervisor_socket, child_socket) = SyncSocket::pair()?;
    let child_fd = child_socket.release();
    let stack = ChildStack::new()?;

    let child_config = config.clone();
    let child_bundle = bundle.to_path_buf();
    let pid = fork::clone(
        Box::new(move || {
            match init::container_init_from_raw(&child_config, &child_bundle, child_fd) {
                Ok(()) => 0,
                Err(err) => {
                    eprintln!("{:#}", err);
                    -1
                }
            }
        }),
        flags,
        &stack,
    )?;

    // the child holds its own copy of this end now
    let _ = unistd::close(child_fd);

    Ok((pid, supervisor_socket))
}
