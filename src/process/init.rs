//! The container side of the launch: everything that runs between clone(2)
//! and execvpe(2), inside the new namespaces.

use std::os::unix::io::RawFd;
use std::path::Path;

use anyhow::{Context, Result};
use nix::fcntl::OFlag;
use nix::unistd::{self, Gid, Uid};

use crate::config::{Config, Process};
use crate::dirfs;
use crate::hooks;
use crate::process::channel::SyncSocket;
use crate::process::fork;
use crate::process::message::SyncMessage;
use crate::rootfs::Mounter;
use crate::utils;

/// Entry point of the cloned child. The raw socket descriptor is the only
/// resource inherited beyond the standard streams.
pub fn container_init_from_raw(config: &Config, bundle: &Path, socket_fd: RawFd) -> Result<()> {
    fork::close_other_fds(&[
        libc::STDIN_FILENO,
        libc::STDOUT_FILENO,
        libc::STDERR_FILENO,
        socket_fd,
    ])?;

    let socket = SyncSocket::from_raw(socket_fd);
    container_init(config, bundle, socket)
}

fn container_init(config: &Config, bundle: &Path, mut socket: SyncSocket) -> Result<()> {
    socket.send(SyncMessage::RequestConfigureUserNamespace)?;
    socket.expect(SyncMessage::UserNamespaceConfigured)?;

    configure_mounts(config, bundle).context("failed to configure mounts")?;

    if !config.hooks.prestart.is_empty() {
        socket.expect(SyncMessage::PrestartHooksExecuted)?;
    }
    if !config.hooks.create_runtime.is_empty() {
        socket.expect(SyncMessage::CreateRuntimeHooksExecuted)?;
    }

    hooks::run_hooks(&config.hooks.create_container)
        .context("create_container hooks failed")?;
    if !config.hooks.create_container.is_empty() {
        socket.send(SyncMessage::CreateContainerHooksExecuted)?;
    }

    hooks::run_hooks(&config.hooks.start_container).context("start_container hooks failed")?;

    // closing the socket is the signal that the payload is about to run
    drop(socket);

    execute_process(&config.process)
}

fn configure_mounts(config: &Config, bundle: &Path) -> Result<()> {
    let bundle_fd = dirfs::open(bundle, OFlag::O_PATH)?;
    let root = dirfs::open_at(&bundle_fd, &config.root.path, OFlag::O_PATH)?;

    let mut mounter = Mounter::new(root);
    for mount in &config.mounts {
        mounter
            .mount(mount)
            .with_context(|| format!("failed to mount {:?}", mount.destination))?;
    }
    mounter.finalize()
}

fn execute_process(process: &Process) -> Result<()> {
    unistd::chdir(&process.cwd)
        .with_context(|| format!("failed to chdir to {:?}", process.cwd))?;

    unistd::setgid(Gid::from_raw(process.gid)).context("setgid failed")?;
    if let Some(gids) = &process.additional_gids {
        let groups: Vec<Gid> = gids.iter().copied().map(Gid::from_raw).collect();
        unistd::setgroups(&groups).context("setgroups failed")?;
    }
    unistd::setuid(Uid::from_raw(process.uid)).context("setuid failed")?;

    let args = utils::to_cstring_vec(&process.args)?;
    let env = utils::env_to_cstring_vec(&process.env)?;
    unistd::execvpe(&args[0], &args, &env).context("execvpe failed")?;
    unreachable!("execvpe returned without an error");
}
