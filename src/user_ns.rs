//! User namespace id mappings, written through the privileged shadow-utils
//! helpers. Mapping a freshly cloned child has to happen from outside the
//! namespace, which is why the supervisor owns this step.

use anyhow::{bail, Context, Result};
use nix::sys::wait::WaitStatus;
use nix::unistd::{self, ForkResult, Pid};

use crate::config::IdMapping;
use crate::process;
use crate::utils;

/// Writes the gid mappings, then the uid mappings, for the given child. A
/// phase with no mappings is skipped entirely.
pub fn configure_id_mappings(
    pid: Pid,
    uid_mappings: &[IdMapping],
    gid_mappings: &[IdMapping],
) -> Result<()> {
    write_mappings("newgidmap", pid, gid_mappings)?;
    write_mappings("newuidmap", pid, uid_mappings)?;
    Ok(())
}

fn write_mappings(helper: &str, pid: Pid, mappings: &[IdMapping]) -> Result<()> {
    if mappings.is_empty() {
        return Ok(());
    }

    let args = helper_args(helper, pid, mappings);
    run_helper(&args).with_context(|| format!("{} failed for pid {}", helper, pid))
}

fn helper_args(helper: &str, pid: Pid, mappings: &[IdMapping]) -> Vec<String> {
    let mut args = vec![helper.to_string(), pid.as_raw().to_string()];
    for mapping in mappings {
        args.push(mapping.host_id.to_string());
        args.push(mapping.container_id.to_string());
        args.push(mapping.size.to_string());
    }
    args
}

/// Runs a helper found on PATH and insists on a clean exit.
fn run_helper(args: &[String]) -> Result<()> {
    let argv = utils::to_cstring_vec(args)?;

    let child = match unsafe { unistd::fork() }.context("failed to fork helper process")? {
        ForkResult::Child => {
            if let Err(errno) = unistd::execvp(&argv[0], &argv) {
                eprintln!("execvp {:?}: {}", args[0], errno);
            }
            std::process::exit(127);
        }
        ForkResult::Parent { child } => child,
    };

    match process::waitpid_retrying(child)? {
        WaitStatus::Exited(_, 0) => Ok(()),
        WaitStatus::Exited(_, code) => bail!("exited with code {}", code),
        status => bail!("exited abnormally: {:?}", status),
    }
}
