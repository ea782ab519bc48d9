//! Implementation of the syscall interface against the running kernel.

use std::any::Any;
use std::path::Path;

use nix::errno::Errno;
use nix::mount::{self, MsFlags};
use nix::sys::stat::{Mode, SFlag};

use super::Syscall;
use crate::dirfs;
use crate::fd::FileDescriptor;

pub struct LinuxSyscall;

impl Syscall for LinuxSyscall {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), Errno> {
        mount::mount(source, target, fstype, flags, data)
    }

    fn mknod(
        &self,
        root: &FileDescriptor,
        path: &Path,
        kind: SFlag,
        perm: Mode,
        dev: u64,
    ) -> Result<(), Errno> {
        dirfs::mknod(root, path, kind, perm, dev)
    }
}
