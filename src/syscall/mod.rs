//! An interface trait for the mount related kernel calls so that the mount
//! planner can be exercised without touching the running system.

pub mod linux;

use std::any::Any;
use std::path::Path;

use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sys::stat::{Mode, SFlag};

use crate::fd::FileDescriptor;

pub trait Syscall {
    fn as_any(&self) -> &dyn Any;

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), Errno>;

    fn mknod(
        &self,
        root: &FileDescriptor,
        path: &Path,
        kind: SFlag,
        perm: Mode,
        dev: u64,
    ) -> Result<(), Errno>;
}

pub fn create_syscall() -> Box<dyn Syscall> {
    if cfg!(test) {
        Box::new(test::TestHelperSyscall::default())
    } else {
        Box::new(linux::LinuxSyscall)
    }
}
