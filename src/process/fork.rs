//! clone(2) with a user-managed stack, and the descriptor hygiene applied
//! in the child before anything else runs.

use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;

use anyhow::{Context, Result};
use libc::{c_int, c_void};
use nix::errno::Errno;
use nix::sched::CloneFlags;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use nix::sys::signal::Signal;
use nix::unistd::Pid;

const CHILD_STACK_SIZE: usize = 8 * 1024 * 1024;

pub type CloneCb = Box<dyn FnMut() -> isize>;

/// Anonymous read/write mapping used as the child stack. The mapping is
/// private, so the parent side may unmap its copy once clone has returned;
/// the child's copy lives until it execs or terminates.
pub struct ChildStack {
    base: *mut c_void,
}

impl ChildStack {
    pub fn new() -> Result<Self> {
        let base = unsafe {
            mman::mmap(
                ptr::null_mut(),
                CHILD_STACK_SIZE,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS | MapFlags::MAP_STACK,
                -1,
                0,
            )
        }
        .context("failed to map the child stack")?;

        // one guard page at the low end
        unsafe { mman::mprotect(base, page_size(), ProtFlags::PROT_NONE) }
            .context("failed to protect the stack guard page")?;

        Ok(Self { base })
    }

    /// clone(2) takes the top of the stack; it grows downward on every
    /// architecture supported here.
    #[cfg(any(
        target_arch = "x86",
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "arm",
        target_arch = "riscv64"
    ))]
    pub fn top(&self) -> *mut c_void {
        unsafe { (self.base as *mut u8).add(CHILD_STACK_SIZE) as *mut c_void }
    }
}

impl Drop for ChildStack {
    fn drop(&mut self) {
        let _ = unsafe { mman::munmap(self.base, CHILD_STACK_SIZE) };
    }
}

fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) } {
        -1 => 4 * 1024,
        size => size as usize,
    }
}

/// Creates the child with clone(2) on the provided stack. SIGCHLD is added
/// to the flag set so the child reports termination like a forked one.
pub fn clone(mut cb: CloneCb, flags: CloneFlags, stack: &ChildStack) -> Result<Pid> {
    extern "C" fn callback(data: *mut CloneCb) -> c_int {
        let cb: &mut CloneCb = unsafe { &mut *data };
        (*cb)() as c_int
    }

    let res = unsafe {
        libc::clone(
            mem::transmute(callback as extern "C" fn(*mut CloneCb) -> c_int),
            stack.top(),
            combine_with_child_signal(flags),
            &mut cb as *mut _ as *mut c_void,
        )
    };
    let pid = Errno::result(res).map(Pid::from_raw).context("clone failed")?;

    Ok(pid)
}

pub fn combine_with_child_signal(flags: CloneFlags) -> c_int {
    flags.bits() | Signal::SIGCHLD as c_int
}

/// Closes every descriptor outside `keep` with ranged close_range(2)
/// calls, one per gap between the kept descriptors.
pub fn close_other_fds(keep: &[RawFd]) -> Result<()> {
    let mut keep: Vec<RawFd> = keep.to_vec();
    keep.sort_unstable();
    keep.dedup();

    let mut low: RawFd = 0;
    for fd in keep {
        if fd > low {
            close_range(low as u32, (fd - 1) as u32)?;
        }
        low = fd + 1;
    }
    close_range(low as u32, u32::MAX)
}

fn close_range(first: u32, last: u32) -> Result<()> {
    let ret = unsafe { libc::syscall(libc::SYS_close_range, first, last, 0u32) };
    Errno::result(ret).map(drop).context("close_range failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::waitpid_retrying;
    use anyhow::bail;
    use nix::sys::stat;
    use nix::sys::wait::WaitStatus;
    use nix::unistd::{self, ForkResult};

    fn assert_child_exits_zero(pid: Pid) -> Result<()> {
        match waitpid_retrying(pid)? {
            WaitStatus::Exited(_, 0) => Ok(()),
            status => bail!("child failed: {:?}", status),
        }
    }

    #[test]
    fn test_clone_into_new_pid_and_user_namespace() -> Result<()> {
        // a user namespace lets the test run unprivileged
        let flags = CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWUSER;
        let stack = ChildStack::new()?;
        let pid = clone(
            Box::new(|| {
                if unistd::getpid() == Pid::from_raw(1) {
                    0
                } else {
                    -1
                }
            }),
            flags,
            &stack,
        )?;

        assert_child_exits_zero(pid)
    }

    #[test]
    fn test_clone_stack_is_usable() -> Result<()> {
        let stack = ChildStack::new()?;
        let pid = clone(
            Box::new(|| {
                let mut array_on_stack = [0u8; 4096];
                array_on_stack.iter_mut().for_each(|x| *x = 0);
                0
            }),
            CloneFlags::empty(),
            &stack,
        )?;

        assert_child_exits_zero(pid)
    }

    #[test]
    fn test_combined_flags_include_sigchld() {
        let flags = CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWNS;
        let combined = combine_with_child_signal(flags);
        assert_eq!(combined & libc::SIGCHLD, libc::SIGCHLD);
        assert_eq!(combined & !libc::SIGCHLD, flags.bits());
    }

    #[test]
    fn test_close_other_fds_leaves_only_the_kept_set() -> Result<()> {
        match unsafe { unistd::fork()? } {
            ForkResult::Parent { child } => assert_child_exits_zero(child),
            ForkResult::Child => {
                let kept = unistd::pipe().unwrap();
                let closed = unistd::pipe().unwrap();

                let keep = [
                    libc::STDIN_FILENO,
                    libc::STDOUT_FILENO,
                    libc::STDERR_FILENO,
                    kept.0,
                ];
                if close_other_fds(&keep).is_err() {
                    std::process::exit(2);
                }

                let kept_alive = stat::fstat(kept.0).is_ok();
                let others_gone = stat::fstat(kept.1).is_err()
                    && stat::fstat(closed.0).is_err()
                    && stat::fstat(closed.1).is_err();
                std::process::exit(if kept_alive && others_gone { 0 } else { 1 });
            }
        }
    }
}
