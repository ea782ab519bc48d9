//! OCI lifecycle hook execution: fork, execvpe with the hook's explicit
//! argv and environment, then wait.

use std::ffi::CString;

use anyhow::{bail, Context, Result};
use nix::sys::wait::WaitStatus;
use nix::unistd::{self, ForkResult};

use crate::config::Hook;
use crate::process;
use crate::utils;

/// Runs the hooks of one phase in order, failing on the first one that does
/// not exit cleanly.
pub fn run_hooks(hooks: &[Hook]) -> Result<()> {
    for hook in hooks {
        execute_hook(hook).with_context(|| format!("hook {:?} failed", hook.path))?;
    }
    Ok(())
}

/// Runs the hooks of a phase whose failures must not abort the caller;
/// errors are logged instead.
pub fn run_hooks_logging_errors(hooks: &[Hook]) {
    for hook in hooks {
        if let Err(err) = execute_hook(hook) {
            log::error!("hook {:?} failed: {:#}", hook.path, err);
        }
    }
}

fn execute_hook(hook: &Hook) -> Result<()> {
    let path = utils::path_to_cstring(&hook.path)?;
    let args: Vec<CString> = if hook.args.is_empty() {
        vec![path.clone()]
    } else {
        utils::to_cstring_vec(&hook.args)?
    };
    let env = utils::env_to_cstring_vec(&hook.env)?;

    let child = match unsafe { unistd::fork() }.context("failed to fork hook process")? {
        ForkResult::Child => {
            if let Err(errno) = unistd::execvpe(&path, &args, &env) {
                eprintln!("execvpe {:?}: {}", hook.path, errno);
            }
            std::process::exit(127);
        }
        ForkResult::Parent { child } => child,
    };

    match process::waitpid_retrying(child)? {
        WaitStatus::Exited(_, 0) => Ok(()),
        WaitStatus::Exited(_, code) => bail!("hook exited with code {}", code),
        WaitStatus::Signaled(_, signal, _) => bail!("hook terminated by signal {}", signal),
        status => bail!("unexpected hook wait status {:?}", status),
    }
}
